//! Per-file bounding-box statistics read from Parquet footers.
//!
//! Only the footer of each file is fetched. Row-group column statistics of
//! the `bbox` struct give a file-level extent without decoding any pages.

use std::sync::Arc;

use datafusion::datasource::listing::ListingTableUrl;
use datafusion::error::{DataFusionError, Result};
use datafusion::prelude::SessionContext;
use futures::{StreamExt, TryStreamExt};
use log::{debug, info};
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore};
use parquet::arrow::ParquetRecordBatchStreamBuilder;
use parquet::arrow::async_reader::ParquetObjectReader;
use parquet::file::metadata::ParquetMetaData;
use parquet::file::statistics::Statistics;

/// Leaf column paths of the per-row bounding box struct.
pub const BBOX_XMIN: &str = "bbox.xmin";
pub const BBOX_XMAX: &str = "bbox.xmax";
pub const BBOX_YMIN: &str = "bbox.ymin";
pub const BBOX_YMAX: &str = "bbox.ymax";

const PARQUET_EXTENSION: &str = ".parquet";

/// File-level bounding box and row count derived from footer statistics.
///
/// Extents are `None` when no row group carried statistics for that column.
#[derive(Debug, Clone, PartialEq)]
pub struct FileBboxStatistics {
    /// Full object URL of the file, usable as a scan path.
    pub file_name: String,
    pub xmin: Option<f64>,
    pub xmax: Option<f64>,
    pub ymin: Option<f64>,
    pub ymax: Option<f64>,
    /// Number of values in `bbox.xmin` across all row groups.
    pub row_count: i64,
}

/// Fold the bbox column statistics of every row group in `metadata`.
///
/// A row group whose bbox columns lack bounds leaves the file extent
/// unknown: every extent is `None` so the file cannot be pruned wrongly.
#[must_use]
pub fn bbox_statistics(file_name: impl Into<String>, metadata: &ParquetMetaData) -> FileBboxStatistics {
    let mut extent = ExtentFold::default();

    for row_group in metadata.row_groups() {
        if row_group.num_rows() == 0 {
            continue;
        }
        for column in row_group.columns() {
            let path = column.column_path().string();
            if !BBOX_COLUMNS.contains(&path.as_str()) {
                continue;
            }
            let bounds = column_bounds(column.statistics(), column.num_values());
            extent.add(&path, bounds, column.num_values());
        }
    }

    extent.finish(file_name.into())
}

const BBOX_COLUMNS: [&str; 4] = [BBOX_XMIN, BBOX_XMAX, BBOX_YMIN, BBOX_YMAX];

/// Min and max of one column chunk.
///
/// `None` when the chunk holds values but no usable bounds. A chunk of
/// nulls only has no bounds and nothing a bbox filter could match.
fn column_bounds(
    statistics: Option<&Statistics>,
    num_values: i64,
) -> Option<(Option<f64>, Option<f64>)> {
    let statistics = statistics?;
    let (min, max) = statistic_bounds(statistics);
    if min.is_some() && max.is_some() {
        return Some((min, max));
    }
    let all_null = statistics
        .null_count_opt()
        .is_some_and(|nulls| i64::try_from(nulls).is_ok_and(|nulls| nulls == num_values));
    all_null.then_some((None, None))
}

#[derive(Debug, Default)]
struct ExtentFold {
    xmin: Option<f64>,
    xmax: Option<f64>,
    ymin: Option<f64>,
    ymax: Option<f64>,
    row_count: i64,
    incomplete: bool,
}

impl ExtentFold {
    fn add(&mut self, path: &str, bounds: Option<(Option<f64>, Option<f64>)>, num_values: i64) {
        if path == BBOX_XMIN {
            self.row_count += num_values;
        }
        let Some((min, max)) = bounds else {
            self.incomplete = true;
            return;
        };
        match path {
            BBOX_XMIN => self.xmin = fold(self.xmin, min, f64::min),
            BBOX_XMAX => self.xmax = fold(self.xmax, max, f64::max),
            BBOX_YMIN => self.ymin = fold(self.ymin, min, f64::min),
            BBOX_YMAX => self.ymax = fold(self.ymax, max, f64::max),
            _ => {},
        }
    }

    fn finish(self, file_name: String) -> FileBboxStatistics {
        if self.incomplete {
            debug!("{file_name} has row groups without bbox statistics");
            return FileBboxStatistics {
                file_name,
                xmin: None,
                xmax: None,
                ymin: None,
                ymax: None,
                row_count: self.row_count,
            };
        }
        FileBboxStatistics {
            file_name,
            xmin: self.xmin,
            xmax: self.xmax,
            ymin: self.ymin,
            ymax: self.ymax,
            row_count: self.row_count,
        }
    }
}

fn statistic_bounds(statistics: &Statistics) -> (Option<f64>, Option<f64>) {
    match statistics {
        Statistics::Float(s) => (
            s.min_opt().map(|v| f64::from(*v)),
            s.max_opt().map(|v| f64::from(*v)),
        ),
        Statistics::Double(s) => (s.min_opt().copied(), s.max_opt().copied()),
        _ => (None, None),
    }
}

fn fold(acc: Option<f64>, value: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (acc, value) {
        (Some(a), Some(v)) => Some(pick(a, v)),
        (None, v) => v,
        (a, None) => a,
    }
}

/// Fetch one file's footer and fold its bbox statistics.
///
/// # Errors
///
/// Returns an error when the footer cannot be fetched or decoded.
pub async fn read_bbox_statistics(
    store: Arc<dyn ObjectStore>,
    file_name: String,
    meta: ObjectMeta,
) -> Result<FileBboxStatistics> {
    let reader = ParquetObjectReader::new(store, meta.location).with_file_size(meta.size);
    let builder = ParquetRecordBatchStreamBuilder::new(reader).await?;
    let stats = bbox_statistics(file_name, builder.metadata());
    debug!(
        "Read footer of {} ({} rows)",
        stats.file_name, stats.row_count
    );
    Ok(stats)
}

/// List the Parquet objects under `location`, paired with their full URLs.
///
/// The location's object store must already be registered with `ctx`.
///
/// # Errors
///
/// Returns an error when the location cannot be parsed or listed.
pub async fn list_parquet_files(
    ctx: &SessionContext,
    location: &str,
) -> Result<(Arc<dyn ObjectStore>, Vec<(String, ObjectMeta)>)> {
    let table_url = ListingTableUrl::parse(location)?;
    let store = ctx.runtime_env().object_store(table_url.object_store())?;

    let objects: Vec<ObjectMeta> = if table_url.is_collection() {
        store
            .list(Some(table_url.prefix()))
            .try_collect()
            .await
            .map_err(|e| DataFusionError::External(Box::new(e)))?
    } else {
        vec![
            store
                .head(table_url.prefix())
                .await
                .map_err(|e| DataFusionError::External(Box::new(e)))?,
        ]
    };

    let mut files: Vec<(String, ObjectMeta)> = objects
        .into_iter()
        .filter(|meta| meta.location.as_ref().ends_with(PARQUET_EXTENSION))
        .map(|meta| (object_url(&table_url, &meta.location), meta))
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));

    Ok((store, files))
}

/// Read bbox statistics of every Parquet file under `location`.
///
/// Footers are fetched with at most `concurrency` requests in flight. The
/// result is ordered by file name.
///
/// # Errors
///
/// Returns the first listing or footer error encountered.
pub async fn collect_bbox_statistics(
    ctx: &SessionContext,
    location: &str,
    concurrency: usize,
) -> Result<Vec<FileBboxStatistics>> {
    let (store, files) = list_parquet_files(ctx, location).await?;
    info!("Scanning footers of {} parquet files under {location}", files.len());

    let mut stats: Vec<FileBboxStatistics> = futures::stream::iter(files)
        .map(|(file_name, meta)| read_bbox_statistics(Arc::clone(&store), file_name, meta))
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await?;
    stats.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(stats)
}

fn object_url(table_url: &ListingTableUrl, location: &Path) -> String {
    let url = table_url.get_url();
    let authority = &url[url::Position::BeforeUsername..url::Position::AfterPort];
    format!("{}://{authority}/{location}", url.scheme())
}
