//! Running building queries end to end.
//!
//! A query is normalized, planned against the file index, scanned through the
//! [`ColumnarEngine`] and assembled into features. Each call is independent;
//! the index is re-read per query so a rebuilt index is picked up without a
//! restart.

use std::path::Path;
use std::sync::Arc;

use geojson::{Feature, FeatureCollection};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::assembler::assemble_features;
use crate::config::{DEFAULT_FEATURE_LIMIT, EngineOptions};
use crate::engine::{
    ColumnarEngine, DataFusionEngine, ScanSource, SpatialPredicate, SpatialScan,
};
use crate::error::{QueryExecutionError, RequestError, Result};
use crate::geometry::QueryGeometry;
use crate::index::{FileIndex, IndexBuildReport, build_index};
use crate::planner::QueryPlan;
use crate::response::Readiness;
use crate::session::shared_engine;
use crate::warmup::{WarmUp, WarmUpState};

fn default_limit() -> usize {
    DEFAULT_FEATURE_LIMIT
}

/// A polygon query as received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingQuery {
    /// `GeoJSON` Polygon or MultiPolygon.
    pub geometry: Value,
    /// Maximum number of features to return. Must be positive.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl BuildingQuery {
    #[must_use]
    pub fn new(geometry: Value) -> Self {
        Self {
            geometry,
            limit: DEFAULT_FEATURE_LIMIT,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Features returned by one query, in engine order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub features: Vec<Feature>,
    pub limit: usize,
    pub plan: QueryPlan,
}

impl QueryResult {
    #[must_use]
    pub fn total(&self) -> usize {
        self.features.len()
    }

    /// Whether the limit was reached. A result that matches the limit
    /// exactly is reported as truncated even when nothing was left out.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.features.len() == self.limit
    }

    #[must_use]
    pub fn into_feature_collection(self) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features: self.features,
            foreign_members: None,
        }
    }
}

/// Entry point for queries, index builds and readiness against one dataset.
#[derive(Clone)]
pub struct BuildingQueryService {
    engine: Arc<dyn ColumnarEngine>,
    options: EngineOptions,
}

impl BuildingQueryService {
    #[must_use]
    pub fn new(engine: Arc<dyn ColumnarEngine>, options: EngineOptions) -> Self {
        Self { engine, options }
    }

    /// Service with a dedicated `DataFusion` session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be created.
    pub fn with_datafusion(options: EngineOptions) -> Result<Self> {
        let engine = DataFusionEngine::try_new(options.clone()).map_err(|e| {
            QueryExecutionError::Session {
                message: e.to_string(),
            }
        })?;
        Ok(Self::new(Arc::new(engine), options))
    }

    /// Service backed by the process-wide engine session.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared session cannot be created.
    pub async fn shared(options: EngineOptions) -> Result<Self> {
        let engine = shared_engine(&options).await?;
        Ok(Self::new(engine, options))
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Validate and run a client query.
    ///
    /// # Errors
    ///
    /// Returns a client error for a zero limit or a malformed geometry, and a
    /// server error if the index, the engine or row assembly fails.
    pub async fn query(&self, request: &BuildingQuery) -> Result<QueryResult> {
        if request.limit == 0 {
            return Err(RequestError::InvalidLimit {
                limit: request.limit,
            }
            .into());
        }
        let geometry = QueryGeometry::from_geojson(request.geometry.clone())?;
        self.query_geometry(&geometry, request.limit).await
    }

    /// Run a query for an already normalized geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read, the scan fails, or a
    /// row cannot be assembled.
    pub async fn query_geometry(&self, geometry: &QueryGeometry, limit: usize) -> Result<QueryResult> {
        let bbox = geometry.bbox();
        let index = FileIndex::load(&self.options.index_path)?;
        let plan = QueryPlan::for_bbox(&bbox, index.as_ref());

        let Some(source) = plan.scan_source(&self.options.dataset) else {
            info!("No indexed file overlaps {bbox:?}, skipping scan");
            return Ok(QueryResult {
                features: Vec::new(),
                limit,
                plan,
            });
        };
        log_source(&source);

        let scan = SpatialScan {
            source,
            predicate: SpatialPredicate {
                bbox,
                wkt: geometry.wkt().to_string(),
            },
            limit,
        };
        let rows = self
            .engine
            .scan(&scan)
            .await
            .map_err(QueryExecutionError::Engine)?;
        let features = assemble_features(rows)?;
        info!("Query returned {} buildings (limit {limit})", features.len());

        Ok(QueryResult {
            features,
            limit,
            plan,
        })
    }

    /// Rebuild the file index of the configured dataset.
    ///
    /// # Errors
    ///
    /// Returns an error if the build fails; the previous index is kept.
    pub async fn build_index(&self) -> Result<IndexBuildReport> {
        Ok(build_index(
            self.engine.as_ref(),
            &self.options.dataset,
            &self.options.index_path,
        )
        .await?)
    }

    /// Start `warm_up` against the full dataset unless it already ran.
    pub fn start_warm_up(&self, warm_up: &WarmUp) -> Option<JoinHandle<WarmUpState>> {
        warm_up.start(
            Arc::clone(&self.engine),
            ScanSource::Dataset(self.options.dataset.clone()),
        )
    }

    #[must_use]
    pub fn readiness(&self, warm_up: &WarmUp) -> Readiness {
        Readiness::new(index_present(&self.options.index_path), warm_up.state())
    }
}

fn index_present(path: &Path) -> bool {
    path.is_file()
}

fn log_source(source: &ScanSource) {
    match source {
        ScanSource::Dataset(location) => info!("Scanning full dataset {location}"),
        ScanSource::Files(files) => {
            info!("Scanning {} candidate files", files.len());
            debug!("Candidate files: {files:?}");
        },
    }
}
