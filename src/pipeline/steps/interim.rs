use async_trait::async_trait;
use polars::prelude::*;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{run_phases, PipelineStep, StepResult};
use crate::config::{Settings, UnmatchedPolicy};
use crate::constants::{census_column, INTERIM_STAGE};
use crate::error::{PrepError, Result};
use crate::observability::metrics;
use crate::pipeline::ingestion::archive::topic_name;
use crate::pipeline::layout::{csv_files_in, subdirs_in, DataLayout};
use crate::table::{
    column_names, has_column, read_csv, require, texts, write_csv, ColumnKind, CsvFormat,
};

// Scratch columns, never written out
const ROW_ORDER: &str = "__row_order";
const JOIN_KEY: &str = "__join_key";
const MATCHED: &str = "__matched";

/// Raw topics read back from disk, one entry per group
pub struct InterimInput {
    pub groups: Vec<TopicGroup>,
    pub reference: DataFrame,
}

/// CSV files read from one folder of the raw area
pub struct TopicGroup {
    pub source: PathBuf,
    pub topics: Vec<(String, DataFrame)>,
}

pub struct InterimOutput {
    pub table: DataFrame,
    pub distinct_ids: usize,
    pub unmatched: Vec<String>,
}

/// Merges raw topic tables and attaches geographic reference columns.
pub struct InterimStep {
    settings: Arc<Settings>,
    layout: DataLayout,
    format: CsvFormat,
}

impl InterimStep {
    pub fn new(settings: Arc<Settings>) -> Self {
        let layout = DataLayout::from_settings(&settings);
        let format = settings.csv_format();
        Self {
            settings,
            layout,
            format,
        }
    }

    fn read_group(&self, dir: &Path) -> Result<Option<TopicGroup>> {
        let id_col = &self.settings.census.id_col;
        let prefix = &self.settings.census.char_col_census;
        let classify = |name: &str| {
            if name == id_col.as_str() {
                ColumnKind::Text
            } else if name.starts_with(prefix.as_str()) {
                ColumnKind::Number
            } else {
                ColumnKind::Skip
            }
        };

        let mut topics = Vec::new();
        for path in csv_files_in(dir)? {
            let df = read_csv(&path, &self.format, classify)?;
            if !has_column(&df, id_col) {
                warn!("{} has no {} column, ignoring it", path.display(), id_col);
                continue;
            }
            let file_name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let topic = topic_name(file_name);
            debug!(
                "Read topic {} from {} ({} rows)",
                topic,
                path.display(),
                df.height()
            );
            metrics::interim::rows_read(df.height());
            topics.push((topic, df));
        }

        if topics.is_empty() {
            return Ok(None);
        }
        Ok(Some(TopicGroup {
            source: dir.to_path_buf(),
            topics,
        }))
    }

    /// Outer merge of a group's topics on the identifier column, keys in
    /// first-appearance order. Within a topic the first row of an id wins.
    fn merge_group(&self, group: TopicGroup) -> Result<DataFrame> {
        let id_col = self.settings.census.id_col.as_str();
        let mut seen: HashSet<String> = HashSet::from([id_col.to_string()]);
        let mut frames = Vec::with_capacity(group.topics.len());

        for (topic, df) in group.topics {
            let mut columns = vec![col(id_col).str().strip_chars(lit(NULL))];
            for name in column_names(&df) {
                if name == id_col {
                    continue;
                }
                let renamed = census_column(&topic, &name);
                if !seen.insert(renamed.clone()) {
                    warn!(
                        "Column {} appears twice in {}, keeping the first",
                        renamed,
                        group.source.display()
                    );
                    continue;
                }
                columns.push(col(name.as_str()).alias(renamed.as_str()));
            }
            frames.push(
                df.lazy()
                    .select(columns)
                    .filter(col(id_col).is_not_null())
                    .filter(col(id_col).is_first_distinct()),
            );
        }

        let keys: Vec<LazyFrame> = frames
            .iter()
            .map(|frame| frame.clone().select([col(id_col)]))
            .collect();
        let keys = concat_lf_diagonal(keys, UnionArgs::default())?
            .filter(col(id_col).is_first_distinct())
            .with_row_index(ROW_ORDER, None);

        let merged = frames.into_iter().fold(keys, |merged, frame| {
            merged.join(
                frame,
                [col(id_col)],
                [col(id_col)],
                JoinArgs::new(JoinType::Left),
            )
        });
        let merged = merged
            .sort([ROW_ORDER], SortMultipleOptions::default())
            .collect()?;
        Ok(merged.drop(ROW_ORDER)?)
    }

    /// Inner join with the reference table. Returns the joined table, the
    /// number of distinct identifiers and the identifiers with no match.
    fn join_reference(&self, merged: DataFrame, reference: DataFrame) -> Result<InterimOutput> {
        let census = &self.settings.census;
        let id_col = census.id_col.as_str();
        let ref_id = census.ref_id_col.as_str();
        require(&reference, ref_id)?;

        let reference_columns = column_names(&reference);
        let census_columns: Vec<String> = column_names(&merged)
            .into_iter()
            .filter(|name| name != id_col && !reference_columns.contains(name))
            .collect();

        let merged = merged
            .lazy()
            .filter(col(id_col).is_first_distinct())
            .with_row_index(ROW_ORDER, None)
            .collect()?;
        let distinct_ids = merged.height();

        let reference = reference
            .lazy()
            .with_column(col(ref_id).str().strip_chars(lit(NULL)).alias(JOIN_KEY))
            .filter(col(JOIN_KEY).is_not_null())
            .filter(col(JOIN_KEY).is_first_distinct())
            .with_column(lit(true).alias(MATCHED));

        let joined = merged
            .lazy()
            .join(
                reference,
                [col(id_col)],
                [col(JOIN_KEY)],
                JoinArgs::new(JoinType::Left),
            )
            .sort([ROW_ORDER], SortMultipleOptions::default())
            .collect()?;

        let matched = require(&joined, MATCHED)?.is_not_null();
        let unmatched = joined.filter(&!&matched)?;
        let unmatched: Vec<String> = texts(&unmatched, id_col)?.into_iter().flatten().collect();

        let table = joined
            .filter(&matched)?
            .select(reference_columns.into_iter().chain(census_columns))?;

        Ok(InterimOutput {
            table,
            distinct_ids,
            unmatched,
        })
    }
}

#[async_trait]
impl PipelineStep for InterimStep {
    type Input = InterimInput;
    type Output = InterimOutput;

    fn step_name(&self) -> &'static str {
        INTERIM_STAGE
    }

    async fn load(&self) -> Result<InterimInput> {
        let raw_dir = self.layout.raw_dir();
        if !raw_dir.is_dir() {
            return Err(PrepError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "raw area {} does not exist, run the raw stage first",
                    raw_dir.display()
                ),
            )));
        }

        let mut groups = Vec::new();
        let mut dirs = vec![raw_dir.clone()];
        dirs.extend(subdirs_in(&raw_dir)?);
        for dir in dirs {
            if let Some(group) = self.read_group(&dir)? {
                groups.push(group);
            }
        }
        if groups.is_empty() {
            return Err(PrepError::InvalidTable(format!(
                "no CSV file with a {} column under {}",
                self.settings.census.id_col,
                raw_dir.display()
            )));
        }

        let reference_path = self.layout.reference_file(&self.settings.census.ref_file);
        info!("Reading reference table {}", reference_path.display());
        let reference = read_csv(&reference_path, &self.format, |_| ColumnKind::Text)?;

        Ok(InterimInput { groups, reference })
    }

    fn transform(&self, input: InterimInput) -> Result<InterimOutput> {
        let mut merged = Vec::with_capacity(input.groups.len());
        for group in input.groups {
            debug!(
                "Merging {} topics from {}",
                group.topics.len(),
                group.source.display()
            );
            merged.push(self.merge_group(group)?.lazy());
        }
        // A group lacking a topic gets NA in that topic's columns.
        let merged = concat_lf_diagonal(merged, UnionArgs::default())?.collect()?;
        let output = self.join_reference(merged, input.reference)?;

        if let Some(first) = output.unmatched.first() {
            metrics::interim::rows_unmatched(output.unmatched.len());
            if self.settings.census.unmatched == UnmatchedPolicy::Fail {
                return Err(PrepError::UnmatchedIdentifiers {
                    count: output.unmatched.len(),
                    first: first.clone(),
                });
            }
            warn!(
                "Dropped {} of {} identifiers not found in the reference table (first: {})",
                output.unmatched.len(),
                output.distinct_ids,
                first
            );
        }
        Ok(output)
    }

    fn save(&self, mut output: InterimOutput) -> Result<StepResult> {
        let path = self.layout.interim_file();
        write_csv(&path, &mut output.table, &self.format)?;
        metrics::interim::rows_written(output.table.height());
        info!(
            "💾 Saved {} rows x {} columns to {}",
            output.table.height(),
            output.table.width(),
            path.display()
        );

        let mut result = StepResult::completed(
            INTERIM_STAGE,
            format!("{} rows written", output.table.height()),
        )
        .with_rows(output.distinct_ids, output.table.height())
        .with_output(path)
        .with_meta("unmatched", output.unmatched.len());
        if let Some(first) = output.unmatched.first() {
            result = result.with_meta("first_unmatched", first);
        }
        Ok(result)
    }

    #[instrument(skip(self), fields(data_name = %self.settings.census.data_name))]
    async fn execute(&self) -> Result<StepResult> {
        let started = Instant::now();
        let result = run_phases(self).await?;
        metrics::pipeline::stage_run(INTERIM_STAGE, started.elapsed().as_secs_f64());
        Ok(result)
    }
}
