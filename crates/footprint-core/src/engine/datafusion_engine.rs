//! [`ColumnarEngine`] backed by a `DataFusion` session.

use arrow_array::RecordBatch;
use async_trait::async_trait;
use datafusion::dataframe::DataFrame;
use datafusion::error::{DataFusionError, Result};
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use datafusion::functions::core::expr_fn::get_field;
use datafusion::prelude::{Expr, ParquetReadOptions, SessionConfig, SessionContext, col, lit};
use datafusion_geoparquet::{
    FileBboxStatistics, RemoteStoreOptions, SessionContextGeoParquetExt, collect_bbox_statistics,
    st_asgeojson_udf, st_intersects_udf,
};
use log::{debug, info};

use super::{ColumnarEngine, GEOMETRY_COLUMN, RawRow, ScanSource, SpatialPredicate, SpatialScan};
use crate::config::EngineOptions;

/// Column holding the WKB geometry in the source files.
const SOURCE_GEOMETRY: &str = "geometry";
/// Per-row bounding box struct in the source files.
const SOURCE_BBOX: &str = "bbox";

/// `DataFusion` session configured once from [`EngineOptions`].
#[derive(Clone)]
pub struct DataFusionEngine {
    ctx: SessionContext,
    options: EngineOptions,
}

impl DataFusionEngine {
    /// Create the session: resource limits, spatial functions and the object
    /// store serving the dataset.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built or the dataset
    /// location cannot be registered.
    pub fn try_new(options: EngineOptions) -> Result<Self> {
        // String columns stay Utf8 so result batches serialize uniformly.
        let mut config = SessionConfig::new()
            .set_bool("datafusion.execution.parquet.schema_force_view_types", false);
        if let Some(partitions) = options.target_partitions {
            config = config.with_target_partitions(partitions);
        }

        let mut runtime = RuntimeEnvBuilder::new();
        if let Some(bytes) = options.memory_limit {
            runtime = runtime.with_memory_limit(bytes, 1.0);
        }

        let ctx = SessionContext::new_with_config_rt(config, runtime.build_arc()?);
        ctx.register_spatial_functions();
        ctx.register_remote_location(&options.dataset, &remote_options(&options))?;

        info!(
            "Query engine ready for {} (region {}, memory limit {}, partitions {})",
            options.dataset,
            options.region,
            options
                .memory_limit
                .map_or_else(|| "unbounded".to_string(), |b| format!("{b} bytes")),
            options
                .target_partitions
                .map_or_else(|| "default".to_string(), |p| p.to_string()),
        );

        Ok(Self { ctx, options })
    }

    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    async fn read(&self, source: &ScanSource) -> Result<DataFrame> {
        self.ctx
            .read_parquet(source.paths(), ParquetReadOptions::default())
            .await
    }
}

#[async_trait]
impl ColumnarEngine for DataFusionEngine {
    async fn scan(&self, scan: &SpatialScan) -> Result<Vec<RawRow>> {
        let df = self.read(&scan.source).await?;
        let projection = projection(&df);
        let batches = df
            .filter(spatial_filter(&scan.predicate))?
            .select(projection)?
            .limit(0, Some(scan.limit))?
            .collect()
            .await?;

        let rows = batches_to_rows(&batches)?;
        debug!("Scan returned {} rows in {} batches", rows.len(), batches.len());
        Ok(rows)
    }

    async fn file_statistics(&self, dataset: &str) -> Result<Vec<FileBboxStatistics>> {
        self.ctx
            .register_remote_location(dataset, &remote_options(&self.options))?;
        collect_bbox_statistics(&self.ctx, dataset, self.options.index_concurrency).await
    }

    async fn warm_up(&self, source: &ScanSource) -> Result<()> {
        // Schema inference lists the files and fetches their footers.
        let df = self.read(source).await?;
        debug!("Warmed up metadata ({} columns)", df.schema().fields().len());
        Ok(())
    }
}

fn remote_options(options: &EngineOptions) -> RemoteStoreOptions {
    RemoteStoreOptions::new().with_region(options.region.clone())
}

fn bbox_field(name: &str) -> Expr {
    get_field(col(SOURCE_BBOX), name)
}

/// Coarse per-row bbox containment, then the exact intersection test.
fn spatial_filter(predicate: &SpatialPredicate) -> Expr {
    let q = predicate.bbox;
    bbox_field("xmin")
        .gt_eq(lit(q.xmin))
        .and(bbox_field("xmax").lt_eq(lit(q.xmax)))
        .and(bbox_field("ymin").gt_eq(lit(q.ymin)))
        .and(bbox_field("ymax").lt_eq(lit(q.ymax)))
        .and(st_intersects_udf().call(vec![col(SOURCE_GEOMETRY), lit(predicate.wkt.clone())]))
}

/// Output columns. Attributes the files do not carry are left out; the
/// assembler treats them as absent.
fn projection(df: &DataFrame) -> Vec<Expr> {
    let schema = df.schema();
    let has = |name: &str| schema.has_column_with_unqualified_name(name);

    let mut exprs = vec![
        col("id"),
        st_asgeojson_udf()
            .call(vec![col(SOURCE_GEOMETRY)])
            .alias(GEOMETRY_COLUMN),
    ];
    for name in ["height", "num_floors", "class", "subtype"] {
        if has(name) {
            exprs.push(col(name));
        }
    }
    if has("names") {
        exprs.push(get_field(col("names"), "primary").alias("primary_name"));
    }
    for name in [
        "facade_color",
        "facade_material",
        "roof_material",
        "roof_shape",
        "roof_color",
        "sources",
    ] {
        if has(name) {
            exprs.push(col(name));
        }
    }
    exprs
}

/// Serialize result batches to JSON objects, nulls kept as explicit `null`.
fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<RawRow>> {
    let batches: Vec<&RecordBatch> = batches.iter().filter(|b| b.num_rows() > 0).collect();
    if batches.is_empty() {
        return Ok(Vec::new());
    }

    let mut writer = arrow_json::WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, arrow_json::writer::JsonArray>(Vec::new());
    writer.write_batches(&batches)?;
    writer.finish()?;

    serde_json::from_slice(&writer.into_inner())
        .map_err(|e| DataFusionError::External(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use std::sync::Arc;
    use arrow_array::{ArrayRef, Float64Array, StringArray};
    use arrow_schema::{DataType, Field, Schema};

    #[test]
    fn rows_keep_explicit_nulls() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("height", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["a", "b"])) as ArrayRef,
                Arc::new(Float64Array::from(vec![Some(12.5), None])),
            ],
        )
        .unwrap();

        let rows = batches_to_rows(&[batch]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["height"], serde_json::json!(12.5));
        assert!(rows[1].contains_key("height"));
        assert!(rows[1]["height"].is_null());
    }

    #[test]
    fn no_batches_no_rows() {
        assert!(batches_to_rows(&[]).unwrap().is_empty());
    }

    #[test]
    fn filter_references_bbox_and_geometry() {
        let predicate = SpatialPredicate {
            bbox: BoundingBox::new(36.817, -1.283, 36.820, -1.280),
            wkt: "POLYGON((36.817 -1.283,36.82 -1.283,36.82 -1.28,36.817 -1.283))".to_string(),
        };
        let rendered = spatial_filter(&predicate).to_string();
        assert!(rendered.contains("st_intersects"));
        assert!(rendered.contains("xmin"));
        assert!(rendered.contains("ymax"));
    }

    #[tokio::test]
    async fn engine_starts_for_local_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let options = EngineOptions::new()
            .with_dataset(format!("{}/", dir.path().display()))
            .with_memory_limit(Some(64 << 20))
            .with_target_partitions(Some(2));
        let engine = DataFusionEngine::try_new(options).unwrap();
        assert_eq!(engine.context().state().config().target_partitions(), 2);
    }
}
