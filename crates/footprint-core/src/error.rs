//! Error types for building queries.
//!
//! Each stage of a query has its own `thiserror` enum so callers can tell a
//! rejected request from a failed engine call. [`FootprintError`] wraps them
//! all for code that drives the full pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for footprint operations.
///
/// Delegates display formatting to the underlying stage error.
#[derive(Debug, Error)]
pub enum FootprintError {
    /// The query geometry was malformed
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The request carried invalid parameters
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The engine or remote storage failed
    #[error(transparent)]
    Query(#[from] QueryExecutionError),

    /// A result row could not be turned into a feature
    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// The offline index build failed
    #[error(transparent)]
    IndexBuild(#[from] IndexBuildError),

    /// Settings were invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Malformed input geometry. Always a client fault.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// The value is not a decodable `GeoJSON` geometry
    #[error("Invalid GeoJSON geometry: {message}")]
    InvalidGeoJson {
        /// Decoder message
        message: String,
    },

    /// The geometry is valid `GeoJSON` but not a polygon type
    #[error("Unsupported geometry type: {geometry_type} (expected Polygon or MultiPolygon)")]
    UnsupportedType {
        /// The `GeoJSON` type name that was supplied
        geometry_type: String,
    },

    /// A polygon without rings or a multipolygon without polygons
    #[error("{geometry_type} has no coordinates")]
    Empty {
        /// The `GeoJSON` type name
        geometry_type: String,
    },

    /// A ring with no positions
    #[error("Ring {ring} of polygon {polygon} is empty")]
    EmptyRing {
        /// Polygon index within the geometry (0 for a Polygon)
        polygon: usize,
        /// Ring index within the polygon (0 is the exterior)
        ring: usize,
    },

    /// A position that is not a finite `[x, y, ...]` pair
    #[error("Invalid position in polygon {polygon}, ring {ring}: {message}")]
    InvalidPosition {
        /// Polygon index within the geometry
        polygon: usize,
        /// Ring index within the polygon
        ring: usize,
        /// What is wrong with the position
        message: String,
    },
}

/// Invalid request parameters other than the geometry.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The row limit must be a positive integer
    #[error("Invalid limit {limit}: must be a positive integer")]
    InvalidLimit {
        /// The rejected limit
        limit: usize,
    },
}

/// Engine, storage or index read failures during a query.
#[derive(Debug, Error)]
pub enum QueryExecutionError {
    /// The columnar engine rejected or failed the scan
    #[error("Query execution failed: {0}")]
    Engine(#[from] datafusion::error::DataFusionError),

    /// The shared engine session could not be created
    #[error("Failed to initialise query engine: {message}")]
    Session {
        /// Why initialisation failed
        message: String,
    },

    /// The file index exists but could not be read
    #[error("Failed to read file index '{path}': {source}")]
    Index {
        /// Index file path
        path: PathBuf,
        /// The underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A result row that cannot be assembled into a feature.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// The geometry column was absent or null
    #[error("Row is missing its '{column}' geometry column")]
    MissingGeometry {
        /// Expected column name
        column: String,
    },

    /// The geometry column did not hold a `GeoJSON` geometry
    #[error("Malformed row geometry{}: {message}", id.as_ref().map(|id| format!(" (feature {id})")).unwrap_or_default())]
    MalformedGeometry {
        /// Feature id when the row carried one
        id: Option<String>,
        /// Decoder message
        message: String,
    },

    /// A textual `sources` value that is not JSON
    #[error("Malformed sources{}: {message}", id.as_ref().map(|id| format!(" (feature {id})")).unwrap_or_default())]
    MalformedSources {
        /// Feature id when the row carried one
        id: Option<String>,
        /// Decoder message
        message: String,
    },
}

/// Failures of the offline index build. The previous index is left untouched.
#[derive(Debug, Error)]
pub enum IndexBuildError {
    /// Another build holds the lock file
    #[error("An index build is already running (lock file '{lock}')")]
    AlreadyRunning {
        /// The lock file path
        lock: PathBuf,
    },

    /// Listing files or reading footers failed
    #[error("Failed to scan dataset metadata: {0}")]
    Scan(#[source] datafusion::error::DataFusionError),

    /// The dataset location holds no Parquet files
    #[error("No Parquet files found under '{dataset}'")]
    EmptyDataset {
        /// The listed location
        dataset: String,
    },

    /// A data file has no bbox statistics, so its extent is unknown
    #[error("File '{file_name}' has no bounding box statistics")]
    MissingStatistics {
        /// The offending file
        file_name: String,
    },

    /// A filesystem operation on the index path failed
    #[error("I/O error at '{path}': {source}")]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// Encoding the index as Parquet failed
    #[error("Failed to write index '{path}': {source}")]
    Write {
        /// Destination path
        path: PathBuf,
        /// The underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Invalid settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid option value
    #[error("Invalid {option} option: {message}")]
    InvalidOption {
        /// The option name
        option: String,
        /// Why it's invalid
        message: String,
    },
}

/// Type alias for Results using `FootprintError`.
pub type Result<T> = std::result::Result<T, FootprintError>;

impl FootprintError {
    /// Whether the caller sent a bad request, as opposed to a server-side failure.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Geometry(_) | Self::Request(_))
    }

    /// Get a user-friendly error message.
    ///
    /// Server-side failures are reported generically so no partial engine
    /// detail leaks into responses.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Geometry(e) => format!("Invalid geometry: {e}"),
            Self::Request(e) => e.to_string(),
            Self::Query(_) | Self::Feature(_) => "Building query failed".to_string(),
            Self::IndexBuild(e) => format!("Index build failed: {e}"),
            Self::Config(e) => format!("Configuration error: {e}"),
        }
    }

    /// Get recovery suggestions if available.
    #[must_use]
    pub fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::Geometry(_) => Some(
                "Send a GeoJSON Polygon or MultiPolygon with non-empty rings of [lon, lat] positions."
                    .to_string(),
            ),
            Self::Request(_) => Some("Use a limit of at least 1.".to_string()),
            Self::IndexBuild(IndexBuildError::AlreadyRunning { lock }) => Some(format!(
                "Wait for the running build to finish, or remove '{}' if it crashed.",
                lock.display()
            )),
            Self::IndexBuild(_) => {
                Some("The previous index is unchanged; re-run the build.".to_string())
            },
            Self::Query(QueryExecutionError::Index { path, .. }) => Some(format!(
                "Rebuild the index or delete '{}' to query the full dataset.",
                path.display()
            )),
            _ => None,
        }
    }
}

/// Extension trait attaching the affected path to I/O failures of an index build.
pub trait IndexIoExt<T> {
    /// Wrap an I/O error as [`IndexBuildError::Io`] for `path`.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexBuildError::Io`] if the underlying operation fails.
    fn with_path(self, path: impl Into<PathBuf>) -> std::result::Result<T, IndexBuildError>;
}

impl<T> IndexIoExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> std::result::Result<T, IndexBuildError> {
        self.map_err(|source| IndexBuildError::Io {
            path: path.into(),
            source,
        })
    }
}
