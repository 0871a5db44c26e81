use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{AggregationLevel, Settings};
use crate::constants::{
    INTERIM_FILE, INTERIM_STAGE, PARTIAL_SUFFIX, PROCESSED_FILE_NO_GLOBAL,
    PROCESSED_FILE_WITH_GLOBAL, PROCESSED_STAGE, RAW_STAGE,
};
use crate::error::Result;

/// On-disk areas of one run: `<root>/<region>/<org>/<year>/<stage>/<data_name>`.
#[derive(Debug, Clone)]
pub struct DataLayout {
    year_dir: PathBuf,
    data_name: String,
}

impl DataLayout {
    pub fn new(root: &Path, region: &str, org: &str, year: &str, data_name: &str) -> Self {
        Self {
            year_dir: root.join(region).join(org).join(year),
            data_name: data_name.to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.root_path,
            &settings.global.region,
            &settings.global.org,
            &settings.global.year,
            &settings.census.data_name,
        )
    }

    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.year_dir.join(stage)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.stage_dir(RAW_STAGE).join(&self.data_name)
    }

    /// Staging directory the raw stage downloads into before promoting it
    pub fn raw_partial_dir(&self) -> PathBuf {
        self.stage_dir(RAW_STAGE)
            .join(format!("{}.{}", self.data_name, PARTIAL_SUFFIX))
    }

    /// Reference file location; absolute names are used as given.
    pub fn reference_file(&self, ref_file: &str) -> PathBuf {
        self.stage_dir(RAW_STAGE).join(ref_file)
    }

    pub fn interim_file(&self) -> PathBuf {
        self.stage_dir(INTERIM_STAGE)
            .join(&self.data_name)
            .join(INTERIM_FILE)
    }

    pub fn processed_file(&self, level: AggregationLevel, with_global: bool) -> PathBuf {
        let name = if with_global {
            PROCESSED_FILE_WITH_GLOBAL
        } else {
            PROCESSED_FILE_NO_GLOBAL
        };
        self.stage_dir(PROCESSED_STAGE)
            .join(&self.data_name)
            .join(level.as_str())
            .join(name)
    }
}

/// True if `dir` holds at least one regular file, at any depth.
pub fn contains_files(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() || (path.is_dir() && contains_files(&path)?) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// CSV files of `dir` (non-recursive), sorted by name for a stable order.
pub fn csv_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("csv"));
        if path.is_file() && is_csv {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Subdirectories of `dir`, sorted by name.
pub fn subdirs_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_keyed_by_region_org_year() {
        let layout = DataLayout::new(Path::new("/data"), "brazil", "IBGE", "2010", "census");
        assert_eq!(layout.raw_dir(), PathBuf::from("/data/brazil/IBGE/2010/raw/census"));
        assert_eq!(
            layout.raw_partial_dir(),
            PathBuf::from("/data/brazil/IBGE/2010/raw/census.partial")
        );
        assert_eq!(
            layout.interim_file(),
            PathBuf::from("/data/brazil/IBGE/2010/interim/census/data.csv")
        );
        assert_eq!(
            layout.processed_file(AggregationLevel::Uf, false),
            PathBuf::from("/data/brazil/IBGE/2010/processed/census/uf/data_no_global.csv")
        );
        assert_eq!(
            layout.reference_file("/ref/geo.csv"),
            PathBuf::from("/ref/geo.csv")
        );
    }

    #[test]
    fn empty_directory_trees_hold_no_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!contains_files(&dir.path().join("missing")).unwrap());
        fs::create_dir_all(dir.path().join("a").join("b")).unwrap();
        assert!(!contains_files(dir.path()).unwrap());
        fs::write(dir.path().join("a").join("b").join("x.csv"), "x").unwrap();
        assert!(contains_files(dir.path()).unwrap());
    }
}
