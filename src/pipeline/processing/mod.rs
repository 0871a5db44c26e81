// Pipeline processing: column filters, aggregation and normalization

pub mod aggregate;
pub mod normalize;
pub mod quality_gate;

pub use aggregate::{aggregate, Aggregated};
pub use normalize::{NormalizeReport, RowNormalizer};
pub use quality_gate::{drop_duplicate_columns, QualityGate, QualityGateConfig};
