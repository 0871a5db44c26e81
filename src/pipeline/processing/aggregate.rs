use polars::prelude::*;
use tracing::{info, warn};

use crate::config::AggregationLevel;
use crate::constants::{is_census_column, is_geo_column};
use crate::error::Result;
use crate::table::require;

#[derive(Debug)]
pub struct Aggregated {
    pub table: DataFrame,
    /// Input rows discarded because their key was NA
    pub rows_without_key: usize,
    /// Geographic columns finer than the aggregation level
    pub removed_columns: Vec<String>,
}

/// Group rows by the identifier column of `level`.
///
/// Groups keep first-appearance order. Census columns are summed with NA
/// skipped, and a group with no value at all stays NA. Geographic columns
/// at `level` or coarser take the group's first value; finer ones are removed.
pub fn aggregate(df: &DataFrame, level: AggregationLevel) -> Result<Aggregated> {
    let key = level.id_column();
    let rows_without_key = require(df, &key)?.null_count();
    if rows_without_key > 0 {
        warn!("Dropped {} rows with no {} value", rows_without_key, key);
    }

    let kept_levels = level.ancestors();
    let mut order = Vec::with_capacity(df.width());
    let mut aggregations = Vec::with_capacity(df.width());
    let mut removed_columns = Vec::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == key {
            order.push(col(name));
            continue;
        }
        if is_census_column(name) && column.dtype().is_float() {
            aggregations.push(
                when(col(name).count().gt(lit(0)))
                    .then(col(name).sum())
                    .otherwise(lit(NULL).cast(DataType::Float64))
                    .alias(name),
            );
        } else {
            let finer = is_geo_column(name)
                && AggregationLevel::of_geo_column(name)
                    .is_some_and(|column_level| !kept_levels.contains(&column_level));
            if finer {
                removed_columns.push(name.to_string());
                continue;
            }
            aggregations.push(col(name).first());
        }
        order.push(col(name));
    }

    let table = df
        .clone()
        .lazy()
        .filter(col(key.as_str()).is_not_null())
        .group_by_stable([col(key.as_str())])
        .agg(aggregations)
        .select(order)
        .collect()?;

    info!(
        "Aggregated {} rows into {} {} units",
        df.height(),
        table.height(),
        level
    );
    Ok(Aggregated {
        table,
        rows_without_key,
        removed_columns,
    })
}
