// Data processing pipeline: layout, ingestion, processing, and stages

pub mod ingestion;
pub mod layout;
pub mod orchestrator;
pub mod processing;
pub mod steps;

pub use layout::DataLayout;
pub use orchestrator::{Orchestrator, PipelineReport, Stage};
