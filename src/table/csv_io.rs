use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::Path;
use std::sync::Arc;

use polars::prelude::*;

use crate::error::{PrepError, Result};

/// CSV dialect: field delimiter, decimal separator and NA markers.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvFormat {
    pub delimiter: u8,
    pub decimal: char,
    pub na_values: Vec<String>,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            delimiter: b',',
            decimal: '.',
            na_values: Vec::new(),
        }
    }
}

impl CsvFormat {
    /// Marker written for NA cells
    pub fn na_marker(&self) -> &str {
        self.na_values.first().map(String::as_str).unwrap_or("")
    }

    /// Empty fields are null on top of the configured markers.
    fn parse_options(&self) -> CsvParseOptions {
        let null_values = (!self.na_values.is_empty()).then(|| {
            NullValues::AllColumns(self.na_values.iter().map(|v| v.trim().into()).collect())
        });
        CsvParseOptions::default()
            .with_separator(self.delimiter)
            .with_decimal_comma(self.decimal == ',')
            .with_null_values(null_values)
            .with_truncate_ragged_lines(true)
    }
}

/// How a header is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Number,
    Skip,
}

pub fn read_csv<F>(path: &Path, format: &CsvFormat, classify: F) -> Result<DataFrame>
where
    F: Fn(&str) -> ColumnKind,
{
    let bytes = fs::read(path).map_err(|e| {
        PrepError::Io(io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    read_csv_from(bytes, format, classify)
}

/// Read a CSV, typing each column with `classify`: text columns are
/// `String`, number columns `Float64`, skipped columns are not returned.
///
/// Input that is not valid UTF-8 is decoded as Latin-1. Numeric cells that
/// do not parse are null.
pub fn read_csv_from<F>(bytes: Vec<u8>, format: &CsvFormat, classify: F) -> Result<DataFrame>
where
    F: Fn(&str) -> ColumnKind,
{
    let bytes = to_utf8(bytes);

    let header = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_n_rows(Some(1))
        .with_parse_options(format.parse_options())
        .into_reader_with_file_handle(Cursor::new(bytes.clone()))
        .finish()?;

    let mut schema = Schema::with_capacity(header.width());
    let mut kept = Vec::with_capacity(header.width());
    for name in header.get_column_names() {
        let kind = classify(name.as_str());
        if kind != ColumnKind::Skip {
            kept.push(name.to_string());
        }
        let dtype = match kind {
            ColumnKind::Number => DataType::Float64,
            ColumnKind::Text | ColumnKind::Skip => DataType::String,
        };
        schema.with_column(name.clone(), dtype);
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_schema(Some(Arc::new(schema)))
        .with_ignore_errors(true)
        .with_parse_options(format.parse_options())
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()?;
    Ok(df.select(kept)?)
}

pub fn write_csv(path: &Path, df: &mut DataFrame, format: &CsvFormat) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(format.delimiter)
        .with_decimal_comma(format.decimal == ',')
        .with_null_value(format.na_marker().to_string())
        .finish(df)?;
    Ok(())
}

fn to_utf8(bytes: Vec<u8>) -> Vec<u8> {
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    };
    match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.as_bytes().to_vec(),
        None => text.into_bytes(),
    }
}
