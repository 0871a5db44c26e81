use std::collections::{HashMap, HashSet};

use polars::prelude::*;
use tracing::{debug, info};

use crate::constants::is_census_column;
use crate::error::Result;
use crate::table::drop_columns;

/// Thresholds applied to census columns before aggregation.
#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    /// Minimum fraction of non-NA cells a column needs to be kept
    pub na_threshold: f64,
    /// Minimum column sum, when the global-feature filter is enabled
    pub global_threshold: Option<f64>,
}

/// Column-level filters over `[CENSUS]_` columns.
///
/// Columns in `protected` (the family totals) are never dropped, since
/// normalization needs them.
pub struct QualityGate {
    config: QualityGateConfig,
    protected: HashSet<String>,
}

impl QualityGate {
    pub fn new(config: QualityGateConfig, protected: HashSet<String>) -> Self {
        Self { config, protected }
    }

    /// Drop census columns whose non-NA fraction is strictly below `na_threshold`.
    pub fn drop_sparse_columns(&self, df: &mut DataFrame) -> Result<Vec<String>> {
        let height = df.height();
        if height == 0 {
            return Ok(Vec::new());
        }
        let threshold = self.config.na_threshold;
        let sparse: Vec<String> = df
            .get_columns()
            .iter()
            .filter(|c| self.is_candidate(c.name()))
            .filter(|c| ((height - c.null_count()) as f64 / height as f64) < threshold)
            .map(|c| c.name().to_string())
            .collect();

        self.drop(df, sparse, "sparse")
    }

    /// Drop census columns whose sum over the table is strictly below
    /// `global_threshold`. Does nothing when the filter is disabled.
    pub fn drop_minor_columns(&self, df: &mut DataFrame) -> Result<Vec<String>> {
        let Some(threshold) = self.config.global_threshold else {
            return Ok(Vec::new());
        };
        let mut minor = Vec::new();
        for column in df.get_columns() {
            if !self.is_candidate(column.name()) || !column.dtype().is_float() {
                continue;
            }
            let sum = column.as_materialized_series().f64()?.sum().unwrap_or(0.0);
            if sum < threshold {
                minor.push(column.name().to_string());
            }
        }

        self.drop(df, minor, "below global threshold")
    }

    fn is_candidate(&self, name: &str) -> bool {
        is_census_column(name) && !self.protected.contains(name)
    }

    fn drop(&self, df: &mut DataFrame, names: Vec<String>, reason: &str) -> Result<Vec<String>> {
        if names.is_empty() {
            return Ok(names);
        }
        for name in &names {
            debug!("Dropping column {} ({})", name, reason);
        }
        drop_columns(df, &names)?;
        info!("Dropped {} columns ({})", names.len(), reason);
        Ok(names)
    }
}

/// Remove census columns whose values repeat an earlier census column
/// exactly, NA matching NA. Columns in `protected` are always kept.
pub fn drop_duplicate_columns(
    df: &mut DataFrame,
    protected: &HashSet<String>,
) -> Result<Vec<String>> {
    let mut seen: HashMap<Vec<Option<u64>>, String> = HashMap::new();
    let mut duplicates = Vec::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        if !is_census_column(name) || !column.dtype().is_float() {
            continue;
        }
        let fingerprint: Vec<Option<u64>> = column
            .as_materialized_series()
            .f64()?
            .into_iter()
            .map(|v| v.map(f64::to_bits))
            .collect();
        match seen.get(&fingerprint) {
            Some(original) if !protected.contains(name) => {
                debug!("Column {} duplicates {}", name, original);
                duplicates.push(name.to_string());
            }
            Some(_) => {}
            None => {
                seen.insert(fingerprint, name.to_string());
            }
        }
    }
    if !duplicates.is_empty() {
        drop_columns(df, &duplicates)?;
        info!("Dropped {} duplicate columns", duplicates.len());
    }
    Ok(duplicates)
}
