use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{CENSUS_PREFIX, GEO_PREFIX, ROOT_DATA_ENV};
use crate::error::{PrepError, Result};
use crate::table::CsvFormat;

/// The `parameters` document: global settings plus the census domain block.
#[derive(Debug, Clone, Deserialize)]
pub struct Parameters {
    pub global: GlobalParams,
    pub census: CensusParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalParams {
    pub region: String,
    pub org: String,
    #[serde(deserialize_with = "text_or_number")]
    pub year: String,
    pub aggregation_level: AggregationLevel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CensusParams {
    #[serde(default = "default_data_name")]
    pub data_name: String,
    pub url_data: String,
    pub ref_file: String,
    pub id_col: String,
    #[serde(default = "default_ref_id_col")]
    pub ref_id_col: String,
    pub char_col_census: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub char_na_values: Vec<String>,
    #[serde(default = "default_decimal")]
    pub char_decimal: String,
    #[serde(default = "default_separator")]
    pub char_sep: String,
    pub na_threshold: f64,
    #[serde(default, deserialize_with = "flag")]
    pub global_cols: bool,
    #[serde(default)]
    pub global_threshold: f64,
    #[serde(default)]
    pub unmatched: UnmatchedPolicy,
    #[serde(default = "default_families")]
    pub families: Vec<FamilyConfig>,
    #[serde(default = "default_unnormalized_tags")]
    pub unnormalized_tags: Vec<String>,
}

/// A group of census columns sharing one row-local total.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FamilyConfig {
    pub name: String,
    pub total: String,
    pub tags: Vec<String>,
}

/// What the interim stage does with raw identifiers absent from the reference table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    #[default]
    Drop,
    Fail,
}

/// Geographic granularity of the processed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum AggregationLevel {
    #[serde(rename = "census tract", alias = "census_tract")]
    CensusTract,
    #[serde(rename = "neighborhood")]
    Neighborhood,
    #[serde(rename = "subdistrict")]
    Subdistrict,
    #[serde(rename = "district")]
    District,
    #[serde(rename = "city")]
    City,
    #[serde(rename = "micro region", alias = "micro_region")]
    MicroRegion,
    #[serde(rename = "meso region", alias = "meso_region")]
    MesoRegion,
    #[serde(rename = "metro region", alias = "metro_region")]
    MetroRegion,
    #[serde(rename = "uf", alias = "state")]
    Uf,
    #[serde(rename = "region")]
    Region,
}

impl AggregationLevel {
    pub const ALL: [AggregationLevel; 10] = [
        AggregationLevel::CensusTract,
        AggregationLevel::Neighborhood,
        AggregationLevel::Subdistrict,
        AggregationLevel::District,
        AggregationLevel::City,
        AggregationLevel::MicroRegion,
        AggregationLevel::MesoRegion,
        AggregationLevel::MetroRegion,
        AggregationLevel::Uf,
        AggregationLevel::Region,
    ];

    /// Suffix used in `[GEO]_` column names, e.g. `CITY` in `[GEO]_ID_CITY`
    pub fn column_suffix(&self) -> &'static str {
        match self {
            AggregationLevel::CensusTract => "CENSUS_TRACT",
            AggregationLevel::Neighborhood => "NEIGHBORHOOD",
            AggregationLevel::Subdistrict => "SUBDISTRICT",
            AggregationLevel::District => "DISTRICT",
            AggregationLevel::City => "CITY",
            AggregationLevel::MicroRegion => "MICRO_REGION",
            AggregationLevel::MesoRegion => "MESO_REGION",
            AggregationLevel::MetroRegion => "METRO_REGION",
            AggregationLevel::Uf => "UF",
            AggregationLevel::Region => "REGION",
        }
    }

    /// Folder name used for the processed area
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationLevel::CensusTract => "census_tract",
            AggregationLevel::Neighborhood => "neighborhood",
            AggregationLevel::Subdistrict => "subdistrict",
            AggregationLevel::District => "district",
            AggregationLevel::City => "city",
            AggregationLevel::MicroRegion => "micro_region",
            AggregationLevel::MesoRegion => "meso_region",
            AggregationLevel::MetroRegion => "metro_region",
            AggregationLevel::Uf => "uf",
            AggregationLevel::Region => "region",
        }
    }

    /// The grouping key column, e.g. `[GEO]_ID_UF`
    pub fn id_column(&self) -> String {
        format!("{}ID_{}", GEO_PREFIX, self.column_suffix())
    }

    /// Levels whose units contain a unit of this level, including itself.
    ///
    /// Metro regions are nested in states and contain cities, but cut across
    /// micro and meso regions, so they only appear in the chains that allow it.
    pub fn ancestors(&self) -> &'static [AggregationLevel] {
        use AggregationLevel::*;
        match self {
            CensusTract => &[
                CensusTract,
                Neighborhood,
                Subdistrict,
                District,
                City,
                MicroRegion,
                MesoRegion,
                MetroRegion,
                Uf,
                Region,
            ],
            Neighborhood => &[
                Neighborhood,
                Subdistrict,
                District,
                City,
                MicroRegion,
                MesoRegion,
                MetroRegion,
                Uf,
                Region,
            ],
            Subdistrict => &[
                Subdistrict,
                District,
                City,
                MicroRegion,
                MesoRegion,
                MetroRegion,
                Uf,
                Region,
            ],
            District => &[District, City, MicroRegion, MesoRegion, MetroRegion, Uf, Region],
            City => &[City, MicroRegion, MesoRegion, MetroRegion, Uf, Region],
            MicroRegion => &[MicroRegion, MesoRegion, Uf, Region],
            MesoRegion => &[MesoRegion, Uf, Region],
            MetroRegion => &[MetroRegion, Uf, Region],
            Uf => &[Uf, Region],
            Region => &[Region],
        }
    }

    /// Level of a `[GEO]_` column (`[GEO]_CITY`, `[GEO]_ID_CITY`), if it names one
    pub fn of_geo_column(name: &str) -> Option<AggregationLevel> {
        let rest = name.strip_prefix(GEO_PREFIX)?;
        let suffix = rest.strip_prefix("ID_").unwrap_or(rest);
        Self::ALL
            .iter()
            .copied()
            .find(|level| level.column_suffix() == suffix)
    }
}

impl fmt::Display for AggregationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The three stage switches of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct Switches {
    #[serde(default, deserialize_with = "flag")]
    pub raw: bool,
    #[serde(default, deserialize_with = "flag")]
    pub interim: bool,
    #[serde(default, deserialize_with = "flag")]
    pub processed: bool,
}

#[derive(Debug, Deserialize)]
struct SwitchersDocument {
    census: Switches,
}

impl Switches {
    pub fn all() -> Self {
        Self {
            raw: true,
            interim: true,
            processed: true,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let document: SwitchersDocument = load_document(path)?;
        Ok(document.census)
    }
}

/// Immutable settings for a run: parameters plus the data root.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root_path: PathBuf,
    pub global: GlobalParams,
    pub census: CensusParams,
}

impl Settings {
    pub fn load(parameters_path: &Path, root_path: PathBuf) -> Result<Self> {
        let parameters: Parameters = load_document(parameters_path)?;
        Self::new(parameters, root_path)
    }

    pub fn new(parameters: Parameters, root_path: PathBuf) -> Result<Self> {
        let settings = Self {
            root_path,
            global: parameters.global,
            census: parameters.census,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("global.region", &self.global.region),
            ("global.org", &self.global.org),
            ("global.year", &self.global.year),
            ("census.data_name", &self.census.data_name),
            ("census.id_col", &self.census.id_col),
            ("census.ref_id_col", &self.census.ref_id_col),
            ("census.char_col_census", &self.census.char_col_census),
        ] {
            if value.trim().is_empty() {
                return Err(PrepError::Config(format!("'{}' must not be empty", field)));
            }
        }

        let threshold = self.census.na_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PrepError::Config(format!(
                "'census.na_threshold' must be a fraction in [0, 1], got {}",
                threshold
            )));
        }
        if !self.census.global_threshold.is_finite() {
            return Err(PrepError::Config(
                "'census.global_threshold' must be finite".to_string(),
            ));
        }

        let decimal = single_char("census.char_decimal", &self.census.char_decimal)?;
        let separator = single_char("census.char_sep", &self.census.char_sep)?;
        if !separator.is_ascii() {
            return Err(PrepError::Config(
                "'census.char_sep' must be an ASCII character".to_string(),
            ));
        }
        if decimal != '.' && decimal != ',' {
            return Err(PrepError::Config(
                "'census.char_decimal' must be '.' or ','".to_string(),
            ));
        }
        if separator == decimal {
            return Err(PrepError::Config(
                "'census.char_sep' and 'census.char_decimal' must differ".to_string(),
            ));
        }

        for family in &self.census.families {
            if !family.total.starts_with(CENSUS_PREFIX) {
                return Err(PrepError::Config(format!(
                    "family '{}' total '{}' is not a {} column",
                    family.name, family.total, CENSUS_PREFIX
                )));
            }
            if family.tags.iter().all(|t| t.trim().is_empty()) {
                return Err(PrepError::Config(format!(
                    "family '{}' has no tags",
                    family.name
                )));
            }
        }
        Ok(())
    }

    /// CSV dialect used for every file the pipeline reads or writes.
    pub fn csv_format(&self) -> CsvFormat {
        // Validated in `validate`, so both fields hold exactly one character.
        let decimal = self.census.char_decimal.chars().next().unwrap_or('.');
        let delimiter = self.census.char_sep.bytes().next().unwrap_or(b';');
        CsvFormat {
            delimiter,
            decimal,
            na_values: self.census.char_na_values.clone(),
        }
    }
}

/// Resolve the data root: explicit value first, then `ROOT_DATA`.
pub fn resolve_root_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    match std::env::var(ROOT_DATA_ENV) {
        Ok(value) if !value.trim().is_empty() => Ok(PathBuf::from(value)),
        Ok(_) => Err(PrepError::Config(format!("{} is empty", ROOT_DATA_ENV))),
        Err(e) => Err(PrepError::Config(format!(
            "{} is not set: {}",
            ROOT_DATA_ENV, e
        ))),
    }
}

/// Read a JSON or TOML document, chosen by file extension.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        PrepError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Ok(toml::from_str(&content)?),
        _ => Ok(serde_json::from_str(&content)?),
    }
}

fn single_char(field: &str, value: &str) -> Result<char> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(PrepError::Config(format!(
            "'{}' must be a single character, got {:?}",
            field, value
        ))),
    }
}

fn default_data_name() -> String {
    "census".to_string()
}

fn default_ref_id_col() -> String {
    format!("{}ID_CENSUS_TRACT", GEO_PREFIX)
}

fn default_decimal() -> String {
    ".".to_string()
}

fn default_separator() -> String {
    ";".to_string()
}

fn default_unnormalized_tags() -> Vec<String> {
    vec!["BASICO".to_string()]
}

/// Families of the published census topics; income comes first because its
/// topic names contain the domicile and person tags.
pub fn default_families() -> Vec<FamilyConfig> {
    let family = |name: &str, total: &str, tags: &[&str]| FamilyConfig {
        name: name.to_string(),
        total: total.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    };
    vec![
        family(
            "income_domicile",
            "[CENSUS]_DOMICILIORENDA_V002",
            &["DOMICILIORENDA"],
        ),
        family(
            "income_person",
            "[CENSUS]_PESSOARENDA_V022",
            &["PESSOARENDA", "RESPONSAVELRENDA"],
        ),
        family(
            "domicile",
            "[CENSUS]_DOMICILIO01_V001",
            &["DOMICILIO01", "ENTORNO01", "ENTORNO02"],
        ),
        family(
            "person",
            "[CENSUS]_DOMICILIO02_V002",
            &["PESSOA", "RESPONSAVEL", "DOMICILIO02", "DOMICILIO03"],
        ),
    ]
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

fn text_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrNumber {
        Text(String),
        Int(i64),
    }
    Ok(match TextOrNumber::deserialize(deserializer)? {
        TextOrNumber::Text(s) => s,
        TextOrNumber::Int(i) => i.to_string(),
    })
}

fn one_or_many<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
