//! Response payloads handed to the transport layer.

use geojson::{Feature, FeatureCollection};
use serde::{Deserialize, Serialize};

use crate::coverage::CoverageStats;
use crate::executor::QueryResult;
use crate::warmup::WarmUpState;

/// File name offered for exported results.
pub const EXPORT_FILENAME: &str = "overture_buildings.geojson";
/// Media type of exported results.
pub const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";

/// Metadata attached to a buildings response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingsMetadata {
    pub total_buildings: usize,
    pub truncated: bool,
    pub overture_release: String,
    #[serde(flatten)]
    pub stats: CoverageStats,
}

/// A `FeatureCollection` with result metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildingsResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<Feature>,
    pub metadata: BuildingsMetadata,
}

impl BuildingsResponse {
    #[must_use]
    pub fn new(result: QueryResult, release: impl Into<String>) -> Self {
        let metadata = BuildingsMetadata {
            total_buildings: result.total(),
            truncated: result.truncated(),
            overture_release: release.into(),
            stats: CoverageStats::from_features(&result.features),
        };
        Self {
            kind: "FeatureCollection",
            features: result.features,
            metadata,
        }
    }
}

/// Coverage statistics without the features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_buildings: usize,
    #[serde(flatten)]
    pub stats: CoverageStats,
}

impl From<&QueryResult> for StatsResponse {
    fn from(result: &QueryResult) -> Self {
        Self {
            total_buildings: result.total(),
            stats: CoverageStats::from_features(&result.features),
        }
    }
}

/// A downloadable, compact `GeoJSON` file of the result features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPayload {
    pub filename: &'static str,
    pub content_type: &'static str,
    pub content_disposition: String,
    pub body: String,
}

impl ExportPayload {
    /// Serialize the features without metadata or whitespace.
    ///
    /// # Errors
    ///
    /// Returns an error if a feature cannot be serialized.
    pub fn new(result: QueryResult) -> serde_json::Result<Self> {
        let collection: FeatureCollection = result.into_feature_collection();
        Ok(Self {
            filename: EXPORT_FILENAME,
            content_type: GEOJSON_CONTENT_TYPE,
            content_disposition: format!("attachment; filename={EXPORT_FILENAME}"),
            body: serde_json::to_string(&collection)?,
        })
    }
}

/// Whether the service can answer queries quickly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    pub index_present: bool,
    pub warm_up: WarmUpState,
}

impl Readiness {
    #[must_use]
    pub fn new(index_present: bool, warm_up: WarmUpState) -> Self {
        Self {
            index_present,
            warm_up,
        }
    }

    #[must_use]
    pub fn ready(&self) -> bool {
        self.index_present || self.warm_up == WarmUpState::Complete
    }
}

/// Health check body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub overture_release: String,
    pub ready: bool,
    pub index_present: bool,
    pub warm_up: WarmUpState,
}

impl HealthResponse {
    #[must_use]
    pub fn new(release: impl Into<String>, readiness: Readiness) -> Self {
        Self {
            status: "ok".to_string(),
            overture_release: release.into(),
            ready: readiness.ready(),
            index_present: readiness.index_present,
            warm_up: readiness.warm_up,
        }
    }
}
