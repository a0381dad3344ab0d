//! The columnar engine seam.
//!
//! Everything the core needs from the query engine goes through
//! [`ColumnarEngine`]: a bounded spatial scan, per-file footer statistics for
//! the index build, and a metadata warm-up. [`DataFusionEngine`] is the
//! production implementation; tests substitute their own.

mod datafusion_engine;

use async_trait::async_trait;
use datafusion_geoparquet::FileBboxStatistics;
use serde_json::{Map, Value};

use crate::geometry::BoundingBox;

pub use datafusion_engine::DataFusionEngine;

/// One result row keyed by projected column name.
pub type RawRow = Map<String, Value>;

/// Name of the projected column holding each row's geometry as `GeoJSON` text.
pub const GEOMETRY_COLUMN: &str = "geojson_geom";

/// Attribute columns projected next to the geometry. `primary_name` is
/// computed from `names.primary`.
pub const ATTRIBUTE_COLUMNS: [&str; 12] = [
    "id",
    "height",
    "num_floors",
    "class",
    "subtype",
    "primary_name",
    "facade_color",
    "facade_material",
    "roof_material",
    "roof_shape",
    "roof_color",
    "sources",
];

/// The files a scan reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanSource {
    /// Every file under a dataset location.
    Dataset(String),
    /// An explicit list of file URLs, passed to the engine as paths.
    Files(Vec<String>),
}

impl ScanSource {
    /// Locations handed to the engine's reader.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        match self {
            Self::Dataset(location) => vec![location.clone()],
            Self::Files(files) => files.clone(),
        }
    }
}

/// Row filter: per-row bbox inside the query bbox, then exact intersection.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialPredicate {
    pub bbox: BoundingBox,
    pub wkt: String,
}

/// A fully typed scan request.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialScan {
    pub source: ScanSource,
    pub predicate: SpatialPredicate,
    pub limit: usize,
}

/// Capabilities the core consumes from the columnar engine.
#[async_trait]
pub trait ColumnarEngine: Send + Sync {
    /// Run a spatial scan and return at most `scan.limit` rows.
    async fn scan(&self, scan: &SpatialScan) -> datafusion::error::Result<Vec<RawRow>>;

    /// Footer bbox statistics of every data file under `dataset`.
    async fn file_statistics(
        &self,
        dataset: &str,
    ) -> datafusion::error::Result<Vec<FileBboxStatistics>>;

    /// Touch remote metadata of `source` so a later scan starts warm.
    async fn warm_up(&self, source: &ScanSource) -> datafusion::error::Result<()>;
}
