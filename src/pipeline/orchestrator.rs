use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::app::ports::HttpClientPort;
use crate::config::{Settings, Switches};
use crate::constants::{INTERIM_STAGE, PROCESSED_STAGE, RAW_STAGE};
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::steps::{InterimStep, PipelineStep, ProcessedStep, RawStep, StepResult};

/// Result of a complete pipeline run
#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepResult>,
}

impl PipelineReport {
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step == name)
    }
}

/// One pipeline stage, for running it on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Raw,
    Interim,
    Processed,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Raw => RAW_STAGE,
            Stage::Interim => INTERIM_STAGE,
            Stage::Processed => PROCESSED_STAGE,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs raw, interim and processed in that order, each gated by its switch.
pub struct Orchestrator {
    settings: Arc<Settings>,
    switches: Switches,
    http: Arc<dyn HttpClientPort>,
}

impl Orchestrator {
    pub fn new(settings: Arc<Settings>, switches: Switches, http: Arc<dyn HttpClientPort>) -> Self {
        Self {
            settings,
            switches,
            http,
        }
    }

    #[instrument(skip(self), fields(
        region = %self.settings.global.region,
        year = %self.settings.global.year,
        level = %self.settings.global.aggregation_level,
    ))]
    pub async fn run(&self) -> Result<PipelineReport> {
        let started_at = Utc::now();
        info!("🚀 Starting census pipeline ({:?})", self.switches);

        let raw = RawStep::new(self.settings.clone(), self.http.clone());
        let interim = InterimStep::new(self.settings.clone());
        let processed = ProcessedStep::new(self.settings.clone());

        let steps = vec![
            gated(&raw, self.switches.raw).await?,
            gated(&interim, self.switches.interim).await?,
            gated(&processed, self.switches.processed).await?,
        ];

        info!("✅ Census pipeline finished");
        Ok(PipelineReport {
            started_at,
            finished_at: Utc::now(),
            steps,
        })
    }

    /// Run one stage regardless of the switches.
    pub async fn run_stage(&self, stage: Stage) -> Result<StepResult> {
        match stage {
            Stage::Raw => {
                run_logged(&RawStep::new(self.settings.clone(), self.http.clone())).await
            }
            Stage::Interim => run_logged(&InterimStep::new(self.settings.clone())).await,
            Stage::Processed => run_logged(&ProcessedStep::new(self.settings.clone())).await,
        }
    }
}

async fn gated<S: PipelineStep>(step: &S, enabled: bool) -> Result<StepResult> {
    if !enabled {
        info!("⏭️  Stage {} disabled, skipping", step.step_name());
        metrics::pipeline::stage_skipped(step.step_name());
        return Ok(StepResult::skipped(
            step.step_name(),
            "disabled by switch".to_string(),
        ));
    }
    run_logged(step).await
}

async fn run_logged<S: PipelineStep>(step: &S) -> Result<StepResult> {
    info!("▶️  Running stage {}", step.step_name());
    match step.execute().await {
        Ok(result) => {
            info!("Stage {} {:?}: {}", result.step, result.status, result.message);
            Ok(result)
        }
        Err(e) => {
            error!("Stage {} failed: {}", step.step_name(), e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::HttpGetResult;
    use crate::config::Parameters;
    use crate::pipeline::steps::StepStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHttp(AtomicUsize);

    #[async_trait]
    impl HttpClientPort for CountingHttp {
        async fn get(&self, _url: &str) -> std::result::Result<HttpGetResult, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err("offline".to_string())
        }
    }

    fn settings(root: &std::path::Path) -> Arc<Settings> {
        let parameters: Parameters = serde_json::from_value(json!({
            "global": { "region": "brazil", "org": "IBGE", "year": 2010, "aggregation_level": "uf" },
            "census": {
                "url_data": "https://example.org/census",
                "ref_file": "reference.csv",
                "id_col": "Cod_setor",
                "char_col_census": "V",
                "na_threshold": 0.5
            }
        }))
        .unwrap();
        Arc::new(Settings::new(parameters, root.to_path_buf()).unwrap())
    }

    #[tokio::test]
    async fn disabled_stages_are_reported_as_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(CountingHttp(AtomicUsize::new(0)));
        let orchestrator =
            Orchestrator::new(settings(dir.path()), Switches::default(), http.clone());

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.steps.len(), 3);
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Skipped));
        assert_eq!(
            report.steps.iter().map(|s| s.step).collect::<Vec<_>>(),
            vec![RAW_STAGE, INTERIM_STAGE, PROCESSED_STAGE]
        );
        assert_eq!(http.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_stage_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(CountingHttp(AtomicUsize::new(0)));
        let orchestrator = Orchestrator::new(settings(dir.path()), Switches::all(), http.clone());

        assert!(orchestrator.run().await.is_err());
        assert_eq!(http.0.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("brazil/IBGE/2010/interim").exists());
    }

    #[tokio::test]
    async fn single_stage_ignores_the_switches() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(CountingHttp(AtomicUsize::new(0)));
        let orchestrator =
            Orchestrator::new(settings(dir.path()), Switches::default(), http.clone());

        assert!(orchestrator.run_stage(Stage::Raw).await.is_err());
        assert_eq!(http.0.load(Ordering::SeqCst), 1);
        assert!(matches!(
            orchestrator.run_stage(Stage::Processed).await,
            Err(crate::error::PrepError::Io(_))
        ));
    }

    #[test]
    fn stage_names_match_step_names() {
        assert_eq!(Stage::Raw.to_string(), RAW_STAGE);
        assert_eq!(Stage::Interim.name(), INTERIM_STAGE);
        assert_eq!(Stage::Processed.name(), PROCESSED_STAGE);
    }
}
