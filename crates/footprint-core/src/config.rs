//! Engine and dataset settings.
//!
//! [`EngineOptions`] carries everything applied once when the shared engine
//! session is created, plus the locations of the dataset and its file index.
//! Defaults point at the public Overture Maps buildings release; every field
//! can be overridden from `FOOTPRINT_*` environment variables or builders.

use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Overture Maps release the default dataset location points at.
pub const OVERTURE_RELEASE: &str = "2025-01-22.0";

/// Default remote dataset: one directory of GeoParquet building files.
pub const DEFAULT_DATASET: &str =
    "s3://overturemaps-us-west-2/release/2025-01-22.0/theme=buildings/type=building/";

/// Default local path of the persisted file index.
pub const DEFAULT_INDEX_PATH: &str = "data/building_index.parquet";

/// Default region of the dataset bucket.
pub const DEFAULT_REGION: &str = "us-west-2";

/// Default maximum number of features per query.
pub const DEFAULT_FEATURE_LIMIT: usize = 50_000;

/// Default number of footers fetched concurrently during an index build.
pub const DEFAULT_INDEX_CONCURRENCY: usize = 16;

const ENV_DATASET: &str = "FOOTPRINT_DATASET";
const ENV_INDEX_PATH: &str = "FOOTPRINT_INDEX_PATH";
const ENV_REGION: &str = "FOOTPRINT_S3_REGION";
const ENV_MEMORY_LIMIT: &str = "FOOTPRINT_MEMORY_LIMIT";
const ENV_TARGET_PARTITIONS: &str = "FOOTPRINT_TARGET_PARTITIONS";
const ENV_INDEX_CONCURRENCY: &str = "FOOTPRINT_INDEX_CONCURRENCY";
const ENV_RELEASE: &str = "FOOTPRINT_RELEASE";
const ENV_DEFAULT_LIMIT: &str = "FOOTPRINT_DEFAULT_LIMIT";

/// Settings for the query engine and the dataset it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Dataset location: a directory URL (`s3://…/`) or local directory.
    pub dataset: String,
    /// Local path of the file index. Absence means "scan the full dataset".
    pub index_path: PathBuf,
    /// Region of the dataset bucket.
    pub region: String,
    /// Engine memory pool size in bytes. `None` leaves it unbounded.
    pub memory_limit: Option<usize>,
    /// Engine parallelism. `None` uses the number of CPUs.
    pub target_partitions: Option<usize>,
    /// Footers fetched concurrently while building the index.
    pub index_concurrency: usize,
    /// Release label reported alongside results.
    pub release: String,
    /// Row limit used when a request does not name one.
    pub default_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            index_path: PathBuf::from(DEFAULT_INDEX_PATH),
            region: DEFAULT_REGION.to_string(),
            memory_limit: None,
            target_partitions: None,
            index_concurrency: DEFAULT_INDEX_CONCURRENCY,
            release: OVERTURE_RELEASE.to_string(),
            default_limit: DEFAULT_FEATURE_LIMIT,
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `FOOTPRINT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] when a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by values from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] when a numeric value does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut options = Self::default();

        if let Some(dataset) = lookup(ENV_DATASET) {
            options.dataset = dataset;
        }
        if let Some(path) = lookup(ENV_INDEX_PATH) {
            options.index_path = PathBuf::from(path);
        }
        if let Some(region) = lookup(ENV_REGION) {
            options.region = region;
        }
        if let Some(release) = lookup(ENV_RELEASE) {
            options.release = release;
        }
        if let Some(limit) = lookup(ENV_MEMORY_LIMIT) {
            options.memory_limit = Some(parse_byte_size(ENV_MEMORY_LIMIT, &limit)?);
        }
        if let Some(partitions) = lookup(ENV_TARGET_PARTITIONS) {
            options.target_partitions = Some(parse_positive(ENV_TARGET_PARTITIONS, &partitions)?);
        }
        if let Some(concurrency) = lookup(ENV_INDEX_CONCURRENCY) {
            options.index_concurrency = parse_positive(ENV_INDEX_CONCURRENCY, &concurrency)?;
        }
        if let Some(limit) = lookup(ENV_DEFAULT_LIMIT) {
            options.default_limit = parse_positive(ENV_DEFAULT_LIMIT, &limit)?;
        }

        Ok(options)
    }

    #[must_use]
    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    #[must_use]
    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = path.into();
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    #[must_use]
    pub fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.memory_limit = bytes;
        self
    }

    #[must_use]
    pub fn with_target_partitions(mut self, partitions: Option<usize>) -> Self {
        self.target_partitions = partitions;
        self
    }

    #[must_use]
    pub fn with_index_concurrency(mut self, concurrency: usize) -> Self {
        self.index_concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    #[must_use]
    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = release.into();
        self
    }
}

fn parse_positive(option: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        Ok(_) => Err(invalid(option, "must be greater than zero")),
        Err(e) => Err(invalid(option, &format!("'{value}' is not a number: {e}"))),
    }
}

/// Parse sizes such as `512M`, `4GB` or `1048576`.
fn parse_byte_size(option: &str, value: &str) -> Result<usize, ConfigError> {
    let trimmed = value.trim().to_ascii_uppercase();
    let digits = trimmed.trim_end_matches('B');
    let (number, multiplier) = match digits.chars().last() {
        Some('K') => (&digits[..digits.len() - 1], 1usize << 10),
        Some('M') => (&digits[..digits.len() - 1], 1 << 20),
        Some('G') => (&digits[..digits.len() - 1], 1 << 30),
        _ => (digits, 1),
    };

    let number = parse_positive(option, number)
        .map_err(|_| invalid(option, &format!("'{value}' is not a byte size")))?;
    number
        .checked_mul(multiplier)
        .ok_or_else(|| invalid(option, &format!("'{value}' is too large")))
}

fn invalid(option: &str, message: &str) -> ConfigError {
    ConfigError::InvalidOption {
        option: option.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_overture() {
        let options = EngineOptions::default();
        assert!(options.dataset.starts_with("s3://overturemaps-us-west-2/"));
        assert_eq!(options.region, "us-west-2");
        assert_eq!(options.index_path, PathBuf::from(DEFAULT_INDEX_PATH));
        assert_eq!(options.memory_limit, None);
    }

    #[test]
    fn environment_overrides_defaults() {
        let options = EngineOptions::from_lookup(lookup(&[
            ("FOOTPRINT_DATASET", "/data/buildings/"),
            ("FOOTPRINT_INDEX_PATH", "/tmp/idx.parquet"),
            ("FOOTPRINT_MEMORY_LIMIT", "2G"),
            ("FOOTPRINT_TARGET_PARTITIONS", "4"),
        ]))
        .unwrap();

        assert_eq!(options.dataset, "/data/buildings/");
        assert_eq!(options.index_path, PathBuf::from("/tmp/idx.parquet"));
        assert_eq!(options.memory_limit, Some(2 << 30));
        assert_eq!(options.target_partitions, Some(4));
        assert_eq!(options.region, DEFAULT_REGION);
    }

    #[test]
    fn rejects_invalid_numbers() {
        let err =
            EngineOptions::from_lookup(lookup(&[("FOOTPRINT_TARGET_PARTITIONS", "zero")])).unwrap_err();
        assert!(err.to_string().contains("FOOTPRINT_TARGET_PARTITIONS"));

        let err = EngineOptions::from_lookup(lookup(&[("FOOTPRINT_INDEX_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn parses_byte_sizes() {
        assert_eq!(parse_byte_size("m", "1048576").unwrap(), 1 << 20);
        assert_eq!(parse_byte_size("m", "512M").unwrap(), 512 << 20);
        assert_eq!(parse_byte_size("m", "4gb").unwrap(), 4 << 30);
        assert_eq!(parse_byte_size("m", "64KB").unwrap(), 64 << 10);
        assert!(parse_byte_size("m", "lots").is_err());
    }

    #[test]
    fn builders_replace_fields() {
        let options = EngineOptions::new()
            .with_dataset("s3://bucket/prefix/")
            .with_region("eu-west-1")
            .with_index_concurrency(2);
        assert_eq!(options.dataset, "s3://bucket/prefix/");
        assert_eq!(options.region, "eu-west-1");
        assert_eq!(options.index_concurrency, 2);
    }
}
