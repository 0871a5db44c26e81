use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{run_phases, PipelineStep, StepResult};
use crate::app::ports::HttpClientPort;
use crate::config::Settings;
use crate::constants::RAW_STAGE;
use crate::error::{PrepError, Result};
use crate::observability::metrics;
use crate::pipeline::ingestion::{archive, listing};
use crate::pipeline::layout::{contains_files, DataLayout};

/// Downloads the published files into the raw area.
///
/// Files land in a staging directory first and are promoted in one rename,
/// so the raw area is either complete or absent.
pub struct RawStep {
    settings: Arc<Settings>,
    layout: DataLayout,
    http: Arc<dyn HttpClientPort>,
}

impl RawStep {
    pub fn new(settings: Arc<Settings>, http: Arc<dyn HttpClientPort>) -> Self {
        let layout = DataLayout::from_settings(&settings);
        Self {
            settings,
            layout,
            http,
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .await
            .map_err(|e| PrepError::Download(format!("{}: {}", url, e)))?;
        debug!(
            "Fetched {} (status {}, {} bytes, {})",
            url, response.status, response.content_length, response.content_type
        );
        response.into_body(url).map_err(PrepError::Download)
    }

    /// A CSV linked directly gets the same treatment as an archive member:
    /// its topic name, inside a folder named after its state suffix.
    fn file_loose_csv(&self, path: &Path) -> Result<PathBuf> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let partial = self.layout.raw_partial_dir();
        let dest = match archive::group_name(&file_name) {
            Some(group) => partial.join(group),
            None => partial,
        };
        fs::create_dir_all(&dest)?;

        let target = dest.join(archive::topic_file_name(&file_name));
        if target.exists() {
            warn!(
                "{} maps to {} which already exists, overwriting it",
                file_name,
                target.display()
            );
        }
        fs::rename(path, &target)?;
        debug!("Filed {} as {}", file_name, target.display());
        Ok(target)
    }

    fn discard_partial(&self) {
        let partial = self.layout.raw_partial_dir();
        if partial.exists() {
            match fs::remove_dir_all(&partial) {
                Ok(()) => warn!("Removed partial download {}", partial.display()),
                Err(e) => warn!("Failed to remove partial download {}: {}", partial.display(), e),
            }
        }
    }
}

#[async_trait]
impl PipelineStep for RawStep {
    type Input = Vec<PathBuf>;
    type Output = usize;

    fn step_name(&self) -> &'static str {
        RAW_STAGE
    }

    fn precheck(&self) -> Result<Option<StepResult>> {
        let raw_dir = self.layout.raw_dir();
        if contains_files(&raw_dir)? {
            warn!(
                "Raw area {} is not empty, skipping download",
                raw_dir.display()
            );
            return Ok(Some(
                StepResult::skipped(RAW_STAGE, "raw files already present".to_string())
                    .with_output(raw_dir),
            ));
        }
        Ok(None)
    }

    async fn load(&self) -> Result<Vec<PathBuf>> {
        let url = &self.settings.census.url_data;
        info!("📡 Downloading raw data from {}", url);

        let partial = self.layout.raw_partial_dir();
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        fs::create_dir_all(&partial)?;

        let page = self.fetch(url).await?;
        let links = listing::extract_data_links(&String::from_utf8_lossy(&page), url)?;
        if links.is_empty() {
            return Err(PrepError::Download(format!(
                "no download links at {}, check the url_data parameter",
                url
            )));
        }
        info!("Found {} files to download", links.len());

        let mut downloaded = Vec::with_capacity(links.len());
        for link in &links {
            let bytes = self.fetch(link).await?;
            let target = partial.join(listing::file_name_of(link)?);
            if target.exists() {
                warn!(
                    "{} has the same file name as an earlier link, overwriting {}",
                    link,
                    target.display()
                );
            }
            fs::write(&target, &bytes)?;
            metrics::raw::file_downloaded(bytes.len());
            debug!("Saved {}", target.display());
            downloaded.push(target);
        }
        Ok(downloaded)
    }

    fn transform(&self, downloaded: Vec<PathBuf>) -> Result<usize> {
        let mut csv_files = 0;
        for path in downloaded {
            if archive::is_zip(&path) {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("archive")
                    .to_string();
                let dest = self.layout.raw_partial_dir().join(stem);
                let extracted = archive::extract_csv_members(&path, &dest)?;
                info!(
                    "Unzipped {} CSV files from {}",
                    extracted.len(),
                    path.display()
                );
                metrics::raw::csv_extracted(extracted.len());
                csv_files += extracted.len();
                fs::remove_file(&path)?;
            } else {
                self.file_loose_csv(&path)?;
                csv_files += 1;
            }
        }
        Ok(csv_files)
    }

    fn save(&self, csv_files: usize) -> Result<StepResult> {
        let raw_dir = self.layout.raw_dir();
        // Only an empty tree can be here, otherwise precheck would have skipped.
        if raw_dir.exists() {
            fs::remove_dir_all(&raw_dir)?;
        }
        if let Some(parent) = raw_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(self.layout.raw_partial_dir(), &raw_dir)?;
        info!("Raw data ready in {}", raw_dir.display());

        Ok(StepResult::completed(
            RAW_STAGE,
            format!("{} CSV files downloaded", csv_files),
        )
        .with_rows(0, csv_files)
        .with_output(raw_dir))
    }

    #[instrument(skip(self), fields(url = %self.settings.census.url_data))]
    async fn execute(&self) -> Result<StepResult> {
        let started = Instant::now();
        let result = run_phases(self).await;
        match &result {
            Ok(r) if r.is_skipped() => metrics::pipeline::stage_skipped(RAW_STAGE),
            Ok(_) => metrics::pipeline::stage_run(RAW_STAGE, started.elapsed().as_secs_f64()),
            Err(_) => self.discard_partial(),
        }
        result
    }
}
