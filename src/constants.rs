/// Column and layout constants shared by every stage.
/// Prefixes follow the `[PREFIX]_name` convention of the published tables.

// Column prefixes
pub const GEO_PREFIX: &str = "[GEO]_";
pub const CENSUS_PREFIX: &str = "[CENSUS]_";

// Stage area names under `<root>/<region>/<org>/<year>/`
pub const RAW_STAGE: &str = "raw";
pub const INTERIM_STAGE: &str = "interim";
pub const PROCESSED_STAGE: &str = "processed";

// Output file names
pub const INTERIM_FILE: &str = "data.csv";
pub const PROCESSED_FILE_WITH_GLOBAL: &str = "data_with_global.csv";
pub const PROCESSED_FILE_NO_GLOBAL: &str = "data_no_global.csv";

// Staging suffix used while the raw stage downloads
pub const PARTIAL_SUFFIX: &str = "partial";

/// Environment variable holding the root of the data areas
pub const ROOT_DATA_ENV: &str = "ROOT_DATA";

// Default configuration document locations
pub const DEFAULT_PARAMETERS_PATH: &str = "parameters/parameters.json";
pub const DEFAULT_SWITCHERS_PATH: &str = "parameters/switchers.json";

/// Build a census column name for a raw topic variable, e.g. `[CENSUS]_DOMICILIO01_V002`
pub fn census_column(topic: &str, variable: &str) -> String {
    format!(
        "{}{}_{}",
        CENSUS_PREFIX,
        topic.trim().to_uppercase(),
        variable.trim().to_uppercase()
    )
}

pub fn is_geo_column(name: &str) -> bool {
    name.starts_with(GEO_PREFIX)
}

pub fn is_census_column(name: &str) -> bool {
    name.starts_with(CENSUS_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn census_column_is_upper_cased() {
        assert_eq!(census_column("Domicilio01", "v002"), "[CENSUS]_DOMICILIO01_V002");
        assert!(is_census_column(&census_column("pessoa01", "V1")));
        assert!(!is_geo_column("[CENSUS]_X"));
        assert!(is_geo_column("[GEO]_CITY"));
    }
}
