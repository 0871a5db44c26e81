// Observability: metrics for the pipeline stages

pub mod metrics;
