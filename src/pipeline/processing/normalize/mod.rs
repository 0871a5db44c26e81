//! Row-local normalization.
//!
//! Every census column belongs to at most one family. Members are divided
//! by the family total of the same row, so a row's shares are comparable
//! across units of different size.

use std::collections::HashSet;

use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::config::FamilyConfig;
use crate::constants::is_census_column;
use crate::error::Result;
use crate::table::column_names;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct NormalizeReport {
    /// Columns divided by their family total
    pub normalized_columns: usize,
    /// Member cells set to NA because the row total was zero or NA
    pub undefined_cells: usize,
    /// Families left as absolute values because their total column is absent
    pub skipped_families: Vec<String>,
}

pub struct RowNormalizer<'a> {
    families: &'a [FamilyConfig],
    unnormalized_tags: &'a [String],
}

impl<'a> RowNormalizer<'a> {
    pub fn new(families: &'a [FamilyConfig], unnormalized_tags: &'a [String]) -> Self {
        Self {
            families,
            unnormalized_tags,
        }
    }

    /// Total columns of every family; they stay absolute.
    pub fn totals(&self) -> HashSet<String> {
        self.families.iter().map(|f| f.total.clone()).collect()
    }

    /// Index of the family a column belongs to: the first whose tag appears
    /// in the name. Totals and unnormalized topics belong to none.
    pub fn family_of(&self, column: &str) -> Option<usize> {
        if !is_census_column(column) || self.families.iter().any(|f| f.total == column) {
            return None;
        }
        if self
            .unnormalized_tags
            .iter()
            .any(|tag| column.contains(tag.as_str()))
        {
            return None;
        }
        self.families.iter().position(|family| {
            family
                .tags
                .iter()
                .filter(|tag| !tag.trim().is_empty())
                .any(|tag| column.contains(tag.as_str()))
        })
    }

    pub fn normalize(&self, df: &mut DataFrame) -> Result<NormalizeReport> {
        let mut report = NormalizeReport::default();
        let names = column_names(df);
        let mut shares = Vec::new();

        for (idx, family) in self.families.iter().enumerate() {
            let members: Vec<&String> = names
                .iter()
                .filter(|name| self.family_of(name) == Some(idx))
                .collect();
            if members.is_empty() {
                continue;
            }

            let Ok(total) = df.column(&family.total) else {
                warn!(
                    "Total column {} missing, {} columns of family {} left unnormalized",
                    family.total,
                    members.len(),
                    family.name
                );
                report.skipped_families.push(family.name.clone());
                continue;
            };
            let totals = total.as_materialized_series().f64()?;

            for name in members {
                let values = df.column(name)?.as_materialized_series().f64()?;
                report.undefined_cells += values
                    .into_iter()
                    .zip(totals.into_iter())
                    .filter(|(value, total)| value.is_some() && !matches!(total, Some(t) if *t != 0.0))
                    .count();
                shares.push(
                    when(col(family.total.as_str()).neq(lit(0.0)))
                        .then(col(name.as_str()) / col(family.total.as_str()))
                        .otherwise(lit(NULL).cast(DataType::Float64))
                        .alias(name.as_str()),
                );
                report.normalized_columns += 1;
            }
            debug!("Normalized family {} by {}", family.name, family.total);
        }

        if !shares.is_empty() {
            *df = std::mem::take(df).lazy().with_columns(shares).collect()?;
        }
        info!(
            "Normalized {} columns, {} cells undefined",
            report.normalized_columns, report.undefined_cells
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_families;
    use crate::table::numbers;

    fn tags() -> Vec<String> {
        vec!["BASICO".to_string()]
    }

    #[test]
    fn income_families_win_over_their_substrings() {
        let families = default_families();
        let tags = tags();
        let normalizer = RowNormalizer::new(&families, &tags);

        let name_of = |column: &str| normalizer.family_of(column).map(|i| families[i].name.as_str());
        assert_eq!(name_of("[CENSUS]_PESSOARENDA_V001"), Some("income_person"));
        assert_eq!(name_of("[CENSUS]_RESPONSAVELRENDA_V010"), Some("income_person"));
        assert_eq!(name_of("[CENSUS]_DOMICILIORENDA_V003"), Some("income_domicile"));
        assert_eq!(name_of("[CENSUS]_PESSOA03_V002"), Some("person"));
        assert_eq!(name_of("[CENSUS]_ENTORNO02_V010"), Some("domicile"));
        assert_eq!(name_of("[CENSUS]_BASICO_V002"), None);
        assert_eq!(name_of("[CENSUS]_DOMICILIO01_V001"), None);
        assert_eq!(name_of("[GEO]_CITY"), None);
    }

    #[test]
    fn shares_of_a_positive_total_sum_to_one() {
        let families = default_families();
        let tags = tags();
        let mut table = df!(
            "[CENSUS]_DOMICILIO01_V001" => [10.0, 4.0],
            "[CENSUS]_DOMICILIO01_V002" => [7.0, 1.0],
            "[CENSUS]_DOMICILIO01_V003" => [3.0, 3.0],
        )
        .unwrap();

        let report = RowNormalizer::new(&families, &tags)
            .normalize(&mut table)
            .unwrap();

        assert_eq!(report.normalized_columns, 2);
        assert_eq!(report.undefined_cells, 0);
        let a = numbers(&table, "[CENSUS]_DOMICILIO01_V002").unwrap();
        let b = numbers(&table, "[CENSUS]_DOMICILIO01_V003").unwrap();
        for (a, b) in a.into_iter().zip(b) {
            assert!((a.unwrap() + b.unwrap() - 1.0).abs() < 1e-9);
        }
        // the total itself stays absolute
        assert_eq!(
            numbers(&table, "[CENSUS]_DOMICILIO01_V001").unwrap(),
            vec![Some(10.0), Some(4.0)]
        );
    }

    #[test]
    fn zero_or_missing_total_yields_na() {
        let families = default_families();
        let tags = tags();
        let mut table = df!(
            "[CENSUS]_DOMICILIO02_V002" => [Some(0.0), None, Some(5.0)],
            "[CENSUS]_PESSOA01_V001" => [Some(2.0), Some(3.0), Some(1.0)],
            "[CENSUS]_PESSOA01_V002" => [Some(0.0), None, Some(4.0)],
        )
        .unwrap();

        let report = RowNormalizer::new(&families, &tags)
            .normalize(&mut table)
            .unwrap();

        assert_eq!(report.undefined_cells, 3);
        assert_eq!(
            numbers(&table, "[CENSUS]_PESSOA01_V001").unwrap(),
            vec![None, None, Some(0.2)]
        );
        assert_eq!(
            numbers(&table, "[CENSUS]_PESSOA01_V002").unwrap(),
            vec![None, None, Some(0.8)]
        );
    }

    #[test]
    fn family_without_total_is_skipped() {
        let families = default_families();
        let tags = tags();
        let mut table = df!("[CENSUS]_ENTORNO01_V003" => [8.0]).unwrap();

        let report = RowNormalizer::new(&families, &tags)
            .normalize(&mut table)
            .unwrap();

        assert_eq!(report.skipped_families, vec!["domicile".to_string()]);
        assert_eq!(
            numbers(&table, "[CENSUS]_ENTORNO01_V003").unwrap(),
            vec![Some(8.0)]
        );
    }
}
