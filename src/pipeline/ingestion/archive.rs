use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::Result;

/// Extract the `.csv` members of a ZIP archive into `dest`, flattening the
/// archive's folders and renaming each file to its topic name.
pub fn extract_csv_members(archive_path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    fs::create_dir_all(dest)?;

    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        if member.is_dir() {
            continue;
        }
        // Only the base name is used, so member paths cannot escape `dest`.
        let base_name = Path::new(member.name())
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let Some(base_name) = base_name else {
            continue;
        };
        if !base_name.to_lowercase().ends_with(".csv") {
            continue;
        }

        let target = dest.join(topic_file_name(&base_name));
        if target.exists() {
            warn!(
                "{} maps to {} which already exists, overwriting it",
                base_name,
                target.display()
            );
        }
        let mut out = File::create(&target)?;
        io::copy(&mut member, &mut out)?;
        debug!("Extracted {} -> {}", base_name, target.display());
        if !written.contains(&target) {
            written.push(target);
        }
    }
    Ok(written)
}

/// `Domicilio01_AC.csv` → `DOMICILIO01`: the part before the first `_`, upper-cased.
pub fn topic_name(file_name: &str) -> String {
    let stem = stem_of(file_name);
    stem.split('_').next().unwrap_or(stem).to_uppercase()
}

/// `Domicilio01_AC.csv` → `DOMICILIO01.csv`
pub fn topic_file_name(file_name: &str) -> String {
    format!("{}.csv", topic_name(file_name))
}

/// `Domicilio01_AC.csv` → `AC`: what follows the topic, naming the state
/// folder a loose CSV belongs in.
pub fn group_name(file_name: &str) -> Option<&str> {
    stem_of(file_name)
        .split_once('_')
        .map(|(_, rest)| rest)
        .filter(|rest| !rest.is_empty())
}

fn stem_of(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}

pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("zip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    #[test]
    fn topic_names_drop_state_suffix() {
        assert_eq!(topic_file_name("Domicilio01_AC.csv"), "DOMICILIO01.csv");
        assert_eq!(topic_file_name("Basico_AC_2010.CSV"), "BASICO.csv");
        assert_eq!(topic_file_name("Entorno01.csv"), "ENTORNO01.csv");
        assert_eq!(topic_name("Pessoa13_RS.csv"), "PESSOA13");
    }

    #[test]
    fn group_is_the_state_suffix() {
        assert_eq!(group_name("Domicilio01_AC.csv"), Some("AC"));
        assert_eq!(group_name("Basico_SP_Capital.csv"), Some("SP_Capital"));
        assert_eq!(group_name("Entorno01.csv"), None);
        assert_eq!(group_name("Entorno01_.csv"), None);
    }

    #[test]
    fn extracts_only_csv_members() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("AC.zip");
        {
            let file = File::create(&archive_path).unwrap();
            let mut writer = ZipWriter::new(file);
            let options = FileOptions::default();
            writer.add_directory("AC/Base informacoes/", options).unwrap();
            writer
                .start_file("AC/Base informacoes/CSV/Pessoa01_AC.csv", options)
                .unwrap();
            writer.write_all(b"Cod_setor;V001\n1;2\n").unwrap();
            writer.start_file("AC/leiame.txt", options).unwrap();
            writer.write_all(b"readme").unwrap();
            writer.finish().unwrap();
        }

        let dest = dir.path().join("AC");
        let written = extract_csv_members(&archive_path, &dest).unwrap();
        assert_eq!(written, vec![dest.join("PESSOA01.csv")]);
        assert_eq!(
            fs::read_to_string(dest.join("PESSOA01.csv")).unwrap(),
            "Cod_setor;V001\n1;2\n"
        );
        assert!(!dest.join("leiame.txt").exists());
    }

    #[test]
    fn repeated_topic_keeps_the_last_member() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("AC.zip");
        {
            let file = File::create(&archive_path).unwrap();
            let mut writer = ZipWriter::new(file);
            let options = FileOptions::default();
            writer.start_file("v1/Basico_AC.csv", options).unwrap();
            writer.write_all(b"Cod_setor;V001\n1;1\n").unwrap();
            writer.start_file("v2/Basico_AC.csv", options).unwrap();
            writer.write_all(b"Cod_setor;V001\n1;2\n").unwrap();
            writer.finish().unwrap();
        }

        let dest = dir.path().join("AC");
        let written = extract_csv_members(&archive_path, &dest).unwrap();
        assert_eq!(written, vec![dest.join("BASICO.csv")]);
        assert_eq!(
            fs::read_to_string(dest.join("BASICO.csv")).unwrap(),
            "Cod_setor;V001\n1;2\n"
        );
    }
}
