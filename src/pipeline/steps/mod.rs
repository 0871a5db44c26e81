use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Result;

pub mod interim;
pub mod processed;
pub mod raw;

pub use interim::InterimStep;
pub use processed::ProcessedStep;
pub use raw::RawStep;

/// Common contract of the three stages: load, transform, save.
///
/// Each stage owns its intermediate types; `execute` composes the phases.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    type Input: Send;
    type Output: Send;

    /// Get the name of this pipeline step
    fn step_name(&self) -> &'static str;

    /// Checked before loading; `Some` ends the step with that result.
    fn precheck(&self) -> Result<Option<StepResult>> {
        Ok(None)
    }

    async fn load(&self) -> Result<Self::Input>;

    fn transform(&self, input: Self::Input) -> Result<Self::Output>;

    fn save(&self, output: Self::Output) -> Result<StepResult>;

    async fn execute(&self) -> Result<StepResult> {
        run_phases(self).await
    }
}

/// precheck → load → transform → save
pub async fn run_phases<S: PipelineStep + ?Sized>(step: &S) -> Result<StepResult> {
    if let Some(result) = step.precheck()? {
        return Ok(result);
    }
    let input = step.load().await?;
    let output = step.transform(input)?;
    step.save(output)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Skipped,
}

/// Result of executing a pipeline step
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: &'static str,
    pub status: StepStatus,
    pub rows_in: usize,
    pub rows_out: usize,
    pub output: Option<PathBuf>,
    pub message: String,
    pub metadata: BTreeMap<String, String>,
    pub finished_at: DateTime<Utc>,
}

impl StepResult {
    pub fn completed(step: &'static str, message: String) -> Self {
        Self::new(step, StepStatus::Completed, message)
    }

    pub fn skipped(step: &'static str, message: String) -> Self {
        Self::new(step, StepStatus::Skipped, message)
    }

    fn new(step: &'static str, status: StepStatus, message: String) -> Self {
        Self {
            step,
            status,
            rows_in: 0,
            rows_out: 0,
            output: None,
            message,
            metadata: BTreeMap::new(),
            finished_at: Utc::now(),
        }
    }

    pub fn with_rows(mut self, rows_in: usize, rows_out: usize) -> Self {
        self.rows_in = rows_in;
        self.rows_out = rows_out;
        self
    }

    pub fn with_output(mut self, path: PathBuf) -> Self {
        self.output = Some(path);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.status == StepStatus::Skipped
    }
}
