//! Dataframe helpers shared by the stages.
//!
//! Identifier and geographic columns are `String` so identifiers keep their
//! published form; census columns are `Float64`. Null is NA.

pub mod csv_io;

pub use csv_io::{read_csv, read_csv_from, write_csv, ColumnKind, CsvFormat};

use polars::prelude::*;

use crate::error::{PrepError, Result};

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

pub fn require<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column> {
    df.column(name)
        .map_err(|_| PrepError::MissingColumn(name.to_string()))
}

/// Remove `names`, keeping the order of the remaining columns.
pub fn drop_columns(df: &mut DataFrame, names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Ok(());
    }
    let keep: Vec<String> = column_names(df)
        .into_iter()
        .filter(|name| !names.contains(name))
        .collect();
    *df = df.select(keep)?;
    Ok(())
}

pub fn numbers(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = require(df, name)?.as_materialized_series();
    Ok(series.f64()?.into_iter().collect())
}

pub fn texts(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = require(df, name)?.as_materialized_series();
    Ok(series
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_keeps_column_order() {
        let mut df = df!(
            "a" => [1.0, 2.0],
            "b" => [3.0, 4.0],
            "c" => [5.0, 6.0],
        )
        .unwrap();
        drop_columns(&mut df, &["b".to_string()]).unwrap();
        assert_eq!(column_names(&df), vec!["a", "c"]);
        assert!(!has_column(&df, "b"));
    }

    #[test]
    fn missing_column_is_named() {
        let df = df!("a" => [1.0]).unwrap();
        match require(&df, "[GEO]_ID_CITY") {
            Err(PrepError::MissingColumn(name)) => assert_eq!(name, "[GEO]_ID_CITY"),
            other => panic!("unexpected result: {:?}", other.map(|c| c.name().to_string())),
        }
    }
}
