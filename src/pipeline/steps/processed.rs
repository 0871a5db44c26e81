use async_trait::async_trait;
use polars::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

use super::{run_phases, PipelineStep, StepResult};
use crate::config::Settings;
use crate::constants::{is_census_column, PROCESSED_STAGE};
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::layout::DataLayout;
use crate::pipeline::processing::{
    aggregate, drop_duplicate_columns, QualityGate, QualityGateConfig, RowNormalizer,
};
use crate::table::{read_csv, write_csv, ColumnKind, CsvFormat};

pub struct ProcessedOutput {
    pub table: DataFrame,
    pub rows_in: usize,
    pub dropped_na: usize,
    pub dropped_global: usize,
    pub dropped_duplicate: usize,
    pub undefined_cells: usize,
}

/// Filters, aggregates and normalizes the interim table.
pub struct ProcessedStep {
    settings: Arc<Settings>,
    layout: DataLayout,
    format: CsvFormat,
}

impl ProcessedStep {
    pub fn new(settings: Arc<Settings>) -> Self {
        let layout = DataLayout::from_settings(&settings);
        let format = settings.csv_format();
        Self {
            settings,
            layout,
            format,
        }
    }
}

#[async_trait]
impl PipelineStep for ProcessedStep {
    type Input = DataFrame;
    type Output = ProcessedOutput;

    fn step_name(&self) -> &'static str {
        PROCESSED_STAGE
    }

    async fn load(&self) -> Result<DataFrame> {
        let path = self.layout.interim_file();
        info!("Reading interim table {}", path.display());
        read_csv(&path, &self.format, |name| {
            if is_census_column(name) {
                ColumnKind::Number
            } else {
                ColumnKind::Text
            }
        })
    }

    fn transform(&self, mut table: DataFrame) -> Result<ProcessedOutput> {
        let census = &self.settings.census;
        let level = self.settings.global.aggregation_level;
        let rows_in = table.height();
        let normalizer = RowNormalizer::new(&census.families, &census.unnormalized_tags);

        let totals = normalizer.totals();

        let gate = QualityGate::new(
            QualityGateConfig {
                na_threshold: census.na_threshold,
                global_threshold: census.global_cols.then_some(census.global_threshold),
            },
            totals.clone(),
        );
        let dropped_na = gate.drop_sparse_columns(&mut table)?.len();
        let dropped_global = gate.drop_minor_columns(&mut table)?.len();

        let aggregated = aggregate(&table, level)?;
        let mut table = aggregated.table;

        let report = normalizer.normalize(&mut table)?;
        let dropped_duplicate = drop_duplicate_columns(&mut table, &totals)?.len();

        metrics::processed::columns_dropped_na(dropped_na);
        metrics::processed::columns_dropped_global(dropped_global);
        metrics::processed::columns_dropped_duplicate(dropped_duplicate);
        metrics::processed::cells_undefined(report.undefined_cells);

        Ok(ProcessedOutput {
            table,
            rows_in,
            dropped_na,
            dropped_global,
            dropped_duplicate,
            undefined_cells: report.undefined_cells,
        })
    }

    fn save(&self, mut output: ProcessedOutput) -> Result<StepResult> {
        let path = self.layout.processed_file(
            self.settings.global.aggregation_level,
            self.settings.census.global_cols,
        );
        write_csv(&path, &mut output.table, &self.format)?;
        metrics::processed::rows_written(output.table.height());
        info!(
            "💾 Saved {} {} rows to {}",
            output.table.height(),
            self.settings.global.aggregation_level,
            path.display()
        );

        Ok(StepResult::completed(
            PROCESSED_STAGE,
            format!(
                "{} rows, {} columns",
                output.table.height(),
                output.table.width()
            ),
        )
        .with_rows(output.rows_in, output.table.height())
        .with_output(path)
        .with_meta("columns_dropped_na", output.dropped_na)
        .with_meta("columns_dropped_global", output.dropped_global)
        .with_meta("columns_dropped_duplicate", output.dropped_duplicate)
        .with_meta("cells_undefined", output.undefined_cells))
    }

    #[instrument(skip(self), fields(level = %self.settings.global.aggregation_level))]
    async fn execute(&self) -> Result<StepResult> {
        let started = Instant::now();
        let result = run_phases(self).await?;
        metrics::pipeline::stage_run(PROCESSED_STAGE, started.elapsed().as_secs_f64());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parameters;
    use crate::error::PrepError;
    use crate::table::{has_column, numbers};
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    fn settings(root: &Path, global_cols: bool) -> Arc<Settings> {
        let parameters: Parameters = serde_json::from_value(json!({
            "global": { "region": "brazil", "org": "IBGE", "year": 2010, "aggregation_level": "city" },
            "census": {
                "url_data": "https://example.org/census",
                "ref_file": "reference.csv",
                "id_col": "Cod_setor",
                "char_col_census": "V",
                "na_threshold": 0.5,
                "global_cols": global_cols,
                "global_threshold": 5
            }
        }))
        .unwrap();
        Arc::new(Settings::new(parameters, root.to_path_buf()).unwrap())
    }

    fn read_output(path: &Path) -> DataFrame {
        let format = CsvFormat {
            delimiter: b';',
            ..CsvFormat::default()
        };
        read_csv(path, &format, |name| {
            if is_census_column(name) {
                ColumnKind::Number
            } else {
                ColumnKind::Text
            }
        })
        .unwrap()
    }

    fn seed_interim(root: &Path) {
        let dir = root.join("brazil/IBGE/2010/interim/census");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("data.csv"),
            "[GEO]_ID_CENSUS_TRACT;[GEO]_ID_CITY;[GEO]_CITY;[CENSUS]_DOMICILIO01_V001;[CENSUS]_DOMICILIO01_V002;[CENSUS]_DOMICILIO01_V003;[CENSUS]_ENTORNO01_V001;[CENSUS]_BASICO_V001\n\
             1;1200013;Acrelândia;10;6;;1;1\n\
             2;1200013;Acrelândia;10;4;;1;1\n\
             3;1200054;Assis Brasil;0;0;;1;1\n",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn filters_aggregates_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        seed_interim(dir.path());
        let step = ProcessedStep::new(settings(dir.path(), false));

        let result = step.execute().await.unwrap();

        assert_eq!(result.rows_in, 3);
        assert_eq!(result.rows_out, 2);
        assert_eq!(result.metadata["columns_dropped_na"], "1");
        let output = result.output.unwrap();
        assert!(output.ends_with("processed/census/city/data_no_global.csv"));

        let table = read_output(&output);
        assert!(!has_column(&table, "[GEO]_ID_CENSUS_TRACT"));
        assert!(!has_column(&table, "[CENSUS]_DOMICILIO01_V003"));
        assert_eq!(
            numbers(&table, "[CENSUS]_DOMICILIO01_V001").unwrap(),
            vec![Some(20.0), Some(0.0)]
        );
        assert_eq!(
            numbers(&table, "[CENSUS]_DOMICILIO01_V002").unwrap(),
            vec![Some(0.5), None]
        );
        assert_eq!(
            numbers(&table, "[CENSUS]_ENTORNO01_V001").unwrap(),
            vec![Some(0.1), None]
        );
        // unnormalized topics keep their sums
        assert_eq!(
            numbers(&table, "[CENSUS]_BASICO_V001").unwrap(),
            vec![Some(2.0), Some(1.0)]
        );
    }

    #[tokio::test]
    async fn family_total_survives_duplicate_removal() {
        let dir = tempfile::tempdir().unwrap();
        let interim = dir.path().join("brazil/IBGE/2010/interim/census");
        fs::create_dir_all(&interim).unwrap();
        fs::write(
            interim.join("data.csv"),
            "[GEO]_ID_CENSUS_TRACT;[GEO]_ID_CITY;[CENSUS]_BASICO_V002;[CENSUS]_DOMICILIO02_V002;[CENSUS]_PESSOA01_V001\n\
             1;1200013;5;5;2\n\
             2;1200054;3;3;3\n",
        )
        .unwrap();
        let step = ProcessedStep::new(settings(dir.path(), false));

        let result = step.execute().await.unwrap();

        assert_eq!(result.metadata["columns_dropped_duplicate"], "0");
        let table = read_output(&result.output.unwrap());
        assert_eq!(
            numbers(&table, "[CENSUS]_DOMICILIO02_V002").unwrap(),
            vec![Some(5.0), Some(3.0)]
        );
        assert_eq!(
            numbers(&table, "[CENSUS]_PESSOA01_V001").unwrap(),
            vec![Some(0.4), Some(1.0)]
        );
    }

    #[tokio::test]
    async fn global_filter_changes_output_name() {
        let dir = tempfile::tempdir().unwrap();
        seed_interim(dir.path());
        let step = ProcessedStep::new(settings(dir.path(), true));

        let result = step.execute().await.unwrap();

        assert!(result
            .output
            .unwrap()
            .ends_with("processed/census/city/data_with_global.csv"));
        // ENTORNO01 and BASICO sum to 3, below the threshold of 5
        assert_eq!(result.metadata["columns_dropped_global"], "2");
    }

    #[tokio::test]
    async fn missing_interim_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let step = ProcessedStep::new(settings(dir.path(), false));
        assert!(matches!(step.execute().await, Err(PrepError::Io(_))));
    }
}
