//! `DataFusion` integration for remote GeoParquet building datasets.
//!
//! This crate provides:
//! - **Spatial functions**: `st_intersects` and `st_asgeojson` over WKB geometry columns.
//! - **Remote stores**: S3/GCS object store registration for dataset locations.
//! - **Footer statistics**: per-file bounding boxes read from Parquet metadata only.

pub mod functions;
pub mod remote;
pub mod statistics;

use datafusion::error::Result;
use datafusion::prelude::SessionContext;

pub use functions::{StAsGeoJson, StIntersects, st_asgeojson_udf, st_intersects_udf};
pub use remote::{RemoteStoreOptions, register_store_for_location};
pub use statistics::{FileBboxStatistics, collect_bbox_statistics, list_parquet_files};

/// Extension methods wiring GeoParquet support into a [`SessionContext`].
pub trait SessionContextGeoParquetExt {
    /// Register `st_intersects` and `st_asgeojson`.
    fn register_spatial_functions(&self);

    /// Register the object store that serves `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the location is malformed or the store cannot be built.
    fn register_remote_location(&self, location: &str, options: &RemoteStoreOptions)
    -> Result<()>;
}

impl SessionContextGeoParquetExt for SessionContext {
    fn register_spatial_functions(&self) {
        self.register_udf(st_intersects_udf());
        self.register_udf(st_asgeojson_udf());
    }

    fn register_remote_location(
        &self,
        location: &str,
        options: &RemoteStoreOptions,
    ) -> Result<()> {
        register_store_for_location(&self.runtime_env(), location, options)
    }
}
