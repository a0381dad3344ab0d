//! Polygon queries over remote, file-partitioned building footprints.
//!
//! The crate answers "which buildings intersect this polygon?" against a
//! GeoParquet dataset split across many remote files, and summarizes the
//! attribute coverage of the result.
//!
//! The pipeline, leaf first:
//!
//! - [`geometry`] validates the request polygon and derives its bbox and WKT.
//! - [`index`] persists a per-file bbox table built from Parquet footers.
//! - [`planner`] prunes the dataset to the files overlapping the query.
//! - [`executor`] runs the spatial scan through an [`engine::ColumnarEngine`].
//! - [`assembler`] turns result rows into `GeoJSON` features.
//! - [`coverage`] computes coverage percentages and provenance counts.
//!
//! # Example
//!
//! ```no_run
//! use footprint_core::{BuildingQuery, BuildingQueryService, EngineOptions};
//! use serde_json::json;
//!
//! # async fn run() -> footprint_core::error::Result<()> {
//! let service = BuildingQueryService::shared(EngineOptions::from_env()?).await?;
//! let query = BuildingQuery::new(json!({
//!     "type": "Polygon",
//!     "coordinates": [[[36.817, -1.283], [36.820, -1.283], [36.820, -1.280],
//!                      [36.817, -1.280], [36.817, -1.283]]]
//! }))
//! .with_limit(5);
//!
//! let result = service.query(&query).await?;
//! println!("{} buildings, truncated: {}", result.total(), result.truncated());
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod config;
pub mod coverage;
pub mod engine;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod index;
pub mod planner;
pub mod response;
pub mod session;
pub mod warmup;

pub use config::EngineOptions;
pub use coverage::CoverageStats;
pub use error::{FootprintError, Result};
pub use executor::{BuildingQuery, BuildingQueryService, QueryResult};
pub use geometry::{BoundingBox, QueryGeometry};
pub use index::{FileIndex, IndexBuildReport, IndexEntry, build_index};
pub use planner::QueryPlan;
pub use response::{BuildingsResponse, ExportPayload, HealthResponse, Readiness, StatsResponse};
pub use session::{shared_engine, shared_warm_up};
pub use warmup::{WarmUp, WarmUpState};
