//! The file-level bounding-box index.
//!
//! The dataset is partitioned into many large Parquet files. The index maps
//! each file to the extent of the buildings it holds so a query only opens
//! files that can contain matches. It is a small local Parquet table:
//!
//! | column | type |
//! |---|---|
//! | `file_name` | Utf8 (full object URL) |
//! | `xmin`, `xmax`, `ymin`, `ymax` | Float64 |
//! | `row_count` | Int64 |
//!
//! Indexes from the earlier build tool are also read: their bounds are text,
//! and the count is a `num_buildings` double.
//!
//! The index is built offline from footer statistics only and replaced
//! wholesale: a new index is written to a temporary file next to the old one
//! and renamed over it, so readers see either the old or the new table.

use std::error::Error;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int64Type};
use arrow_array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_cast::{can_cast_types, cast};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use datafusion_geoparquet::FileBboxStatistics;
use log::{debug, info, warn};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::NamedTempFile;

use crate::engine::ColumnarEngine;
use crate::error::{IndexBuildError, IndexIoExt, QueryExecutionError};
use crate::geometry::BoundingBox;

type BoxError = Box<dyn Error + Send + Sync>;

/// Row-count column name used by indexes written before `row_count`.
const LEGACY_ROW_COUNT: &str = "num_buildings";

/// One data file and the extent of its buildings.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub file_name: String,
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    pub row_count: i64,
}

impl IndexEntry {
    #[must_use]
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.xmin, self.ymin, self.xmax, self.ymax)
    }

    fn try_from_statistics(stats: FileBboxStatistics) -> Result<Self, IndexBuildError> {
        match (stats.xmin, stats.ymin, stats.xmax, stats.ymax) {
            (Some(xmin), Some(ymin), Some(xmax), Some(ymax)) => Ok(Self {
                file_name: stats.file_name,
                xmin,
                ymin,
                xmax,
                ymax,
                row_count: stats.row_count,
            }),
            _ => Err(IndexBuildError::MissingStatistics {
                file_name: stats.file_name,
            }),
        }
    }
}

/// The loaded index, in file-name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileIndex {
    entries: Vec<IndexEntry>,
}

impl FileIndex {
    #[must_use]
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn total_rows(&self) -> i64 {
        self.entries.iter().map(|e| e.row_count).sum()
    }

    /// Files whose extent overlaps `bbox`, in index order.
    #[must_use]
    pub fn candidates(&self, bbox: &BoundingBox) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.bbox().overlaps(bbox))
            .map(|entry| entry.file_name.clone())
            .collect()
    }

    /// Load the index at `path`. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`QueryExecutionError::Index`] if the file exists but cannot
    /// be decoded as an index.
    pub fn load(path: &Path) -> Result<Option<Self>, QueryExecutionError> {
        if !path.exists() {
            debug!("No file index at {}", path.display());
            return Ok(None);
        }
        Self::read(path)
            .map(Some)
            .map_err(|source| QueryExecutionError::Index {
                path: path.to_path_buf(),
                source,
            })
    }

    fn read(path: &Path) -> Result<Self, BoxError> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
        let mut entries = Vec::new();
        for batch in reader {
            entries.extend(entries_from_batch(&batch?)?);
        }
        debug!("Loaded {} index entries from {}", entries.len(), path.display());
        Ok(Self { entries })
    }

    /// Write the index to `path` through a temporary file and an atomic
    /// rename. Returns the size of the written file.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexBuildError`] if encoding or any filesystem step
    /// fails. The file at `path` is then left as it was.
    pub fn write_atomic(&self, path: &Path) -> Result<u64, IndexBuildError> {
        let dir = parent_dir(path);
        fs::create_dir_all(dir).with_path(dir)?;

        let mut tmp = NamedTempFile::new_in(dir).with_path(dir)?;
        self.write_parquet(tmp.as_file_mut())
            .map_err(|source| IndexBuildError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        tmp.as_file().sync_all().with_path(tmp.path())?;
        tmp.persist(path)
            .map_err(|e| IndexBuildError::Io {
                path: path.to_path_buf(),
                source: e.error,
            })?;

        fs::metadata(path).map(|m| m.len()).with_path(path)
    }

    fn write_parquet(&self, file: &mut File) -> Result<(), BoxError> {
        let batch = self.to_record_batch()?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    fn to_record_batch(&self) -> Result<RecordBatch, ArrowError> {
        let floats = |f: fn(&IndexEntry) -> f64| -> ArrayRef {
            Arc::new(Float64Array::from_iter_values(self.entries.iter().map(f)))
        };
        RecordBatch::try_new(
            index_schema(),
            vec![
                Arc::new(StringArray::from_iter_values(
                    self.entries.iter().map(|e| e.file_name.as_str()),
                )) as ArrayRef,
                floats(|e| e.xmin),
                floats(|e| e.xmax),
                floats(|e| e.ymin),
                floats(|e| e.ymax),
                Arc::new(Int64Array::from_iter_values(
                    self.entries.iter().map(|e| e.row_count),
                )),
            ],
        )
    }
}

fn index_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("file_name", DataType::Utf8, false),
        Field::new("xmin", DataType::Float64, false),
        Field::new("xmax", DataType::Float64, false),
        Field::new("ymin", DataType::Float64, false),
        Field::new("ymax", DataType::Float64, false),
        Field::new("row_count", DataType::Int64, false),
    ]))
}

fn entries_from_batch(batch: &RecordBatch) -> Result<Vec<IndexEntry>, BoxError> {
    let column = |name: &str| {
        batch
            .column_by_name(name)
            .ok_or_else(|| BoxError::from(format!("index has no '{name}' column")))
    };
    // Older indexes store bounds as text and counts as doubles.
    let numeric = |name: &str, array: &ArrayRef, to: &DataType| -> Result<ArrayRef, BoxError> {
        if !can_cast_types(array.data_type(), to) {
            return Err(format!("index column '{name}' is {}, expected {to}", array.data_type()).into());
        }
        Ok(cast(array.as_ref(), to)?)
    };
    let float = |name: &str| numeric(name, column(name)?, &DataType::Float64);

    let names = column("file_name")?
        .as_string_opt::<i32>()
        .ok_or("index column 'file_name' is not Utf8")?;
    let (xmin, xmax, ymin, ymax) = (float("xmin")?, float("xmax")?, float("ymin")?, float("ymax")?);
    let (xmin, xmax, ymin, ymax) = (
        xmin.as_primitive::<Float64Type>(),
        xmax.as_primitive::<Float64Type>(),
        ymin.as_primitive::<Float64Type>(),
        ymax.as_primitive::<Float64Type>(),
    );
    let (count_name, counts) = match batch.column_by_name("row_count") {
        Some(counts) => ("row_count", counts),
        None => (LEGACY_ROW_COUNT, column(LEGACY_ROW_COUNT)?),
    };
    let counts = numeric(count_name, counts, &DataType::Int64)?;
    let counts = counts.as_primitive::<Int64Type>();

    (0..batch.num_rows())
        .map(|i| {
            if names.is_null(i)
                || xmin.is_null(i)
                || xmax.is_null(i)
                || ymin.is_null(i)
                || ymax.is_null(i)
            {
                return Err(BoxError::from(format!("index row {i} has null values")));
            }
            Ok(IndexEntry {
                file_name: names.value(i).to_string(),
                xmin: xmin.value(i),
                ymin: ymin.value(i),
                xmax: xmax.value(i),
                ymax: ymax.value(i),
                row_count: if counts.is_null(i) { 0 } else { counts.value(i) },
            })
        })
        .collect()
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Exclusive marker held for the duration of a build. Removed on drop.
#[derive(Debug)]
struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    fn acquire(index_path: &Path) -> Result<Self, IndexBuildError> {
        let mut lock = OsString::from(index_path.as_os_str());
        lock.push(".lock");
        let path = PathBuf::from(lock);

        let dir = parent_dir(&path);
        fs::create_dir_all(dir).with_path(dir)?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(IndexBuildError::AlreadyRunning { lock: path })
            },
            Err(source) => Err(IndexBuildError::Io { path, source }),
        }
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {}: {e}", self.path.display());
        }
    }
}

/// Outcome of a successful index build.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexBuildReport {
    /// Number of data files indexed.
    pub files: usize,
    /// Buildings across all indexed files.
    pub rows: i64,
    /// Size of the written index file.
    pub bytes: u64,
    pub elapsed: Duration,
    pub path: PathBuf,
}

/// Rebuild the index for `dataset` and atomically replace `index_path`.
///
/// Only one build may run per index path; a second concurrent build fails
/// with [`IndexBuildError::AlreadyRunning`].
///
/// # Errors
///
/// Any listing, footer, statistics or write failure aborts the build. The
/// previous index is left untouched.
pub async fn build_index(
    engine: &dyn ColumnarEngine,
    dataset: &str,
    index_path: &Path,
) -> Result<IndexBuildReport, IndexBuildError> {
    let _lock = BuildLock::acquire(index_path)?;
    let started = Instant::now();
    info!("Building file index for {dataset}");

    let statistics = engine
        .file_statistics(dataset)
        .await
        .map_err(IndexBuildError::Scan)?;
    if statistics.is_empty() {
        return Err(IndexBuildError::EmptyDataset {
            dataset: dataset.to_string(),
        });
    }
    let entries = statistics
        .into_iter()
        .map(IndexEntry::try_from_statistics)
        .collect::<Result<Vec<_>, _>>()?;

    let index = FileIndex::new(entries);
    let bytes = index.write_atomic(index_path)?;
    let report = IndexBuildReport {
        files: index.len(),
        rows: index.total_rows(),
        bytes,
        elapsed: started.elapsed(),
        path: index_path.to_path_buf(),
    };

    info!(
        "Indexed {} files ({} buildings) in {:.1}s, wrote {} bytes to {}",
        report.files,
        report.rows,
        report.elapsed.as_secs_f64(),
        report.bytes,
        index_path.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::RecordingEngine;

    fn entry(name: &str, bbox: [f64; 4], rows: i64) -> IndexEntry {
        IndexEntry {
            file_name: format!("s3://bucket/buildings/{name}"),
            xmin: bbox[0],
            ymin: bbox[1],
            xmax: bbox[2],
            ymax: bbox[3],
            row_count: rows,
        }
    }

    fn stats(name: &str, bbox: Option<[f64; 4]>, rows: i64) -> FileBboxStatistics {
        FileBboxStatistics {
            file_name: format!("s3://bucket/buildings/{name}"),
            xmin: bbox.map(|b| b[0]),
            ymin: bbox.map(|b| b[1]),
            xmax: bbox.map(|b| b[2]),
            ymax: bbox.map(|b| b[3]),
            row_count: rows,
        }
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/index.parquet");
        let index = FileIndex::new(vec![
            entry("part-0.parquet", [-180.0, -90.0, 0.0, 0.0], 120),
            entry("part-1.parquet", [0.0, 0.0, 180.0, 90.0], 80),
        ]);

        let bytes = index.write_atomic(&path).unwrap();
        assert!(bytes > 0);

        let loaded = FileIndex::load(&path).unwrap().unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.total_rows(), 200);
    }

    #[test]
    fn missing_index_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            FileIndex::load(&dir.path().join("absent.parquet"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn corrupt_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.parquet");
        fs::write(&path, b"not parquet").unwrap();
        let err = FileIndex::load(&path).unwrap_err();
        assert!(matches!(err, QueryExecutionError::Index { .. }));
    }

    fn write_batch(path: &Path, columns: Vec<(&str, ArrayRef)>) {
        let batch = RecordBatch::try_from_iter(columns).unwrap();
        let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn loads_index_with_text_bounds_and_num_buildings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("building_index.parquet");
        let text = |values: [&str; 2]| -> ArrayRef { Arc::new(StringArray::from(values.to_vec())) };
        write_batch(
            &path,
            vec![
                (
                    "file_name",
                    text(["s3://bucket/buildings/part-0.parquet", "s3://bucket/buildings/part-1.parquet"]),
                ),
                ("xmin", text(["36.8170", "3.37"])),
                ("xmax", text(["36.8200", "3.39"])),
                ("ymin", text(["-1.2830", "6.44"])),
                ("ymax", text(["-1.2800", "6.46"])),
                ("num_buildings", Arc::new(Float64Array::from(vec![7.0, 3.0]))),
            ],
        );

        let index = FileIndex::load(&path).unwrap().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[0].bbox(), BoundingBox::new(36.817, -1.283, 36.82, -1.28));
        assert_eq!(index.entries()[1].row_count, 3);
        assert_eq!(index.total_rows(), 10);
        assert_eq!(
            index.candidates(&BoundingBox::new(36.818, -1.282, 36.819, -1.281)),
            vec!["s3://bucket/buildings/part-0.parquet".to_string()]
        );
    }

    #[test]
    fn loads_index_with_float_num_buildings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("building_index.parquet");
        let float = |v: f64| -> ArrayRef { Arc::new(Float64Array::from(vec![v])) };
        write_batch(
            &path,
            vec![
                ("file_name", Arc::new(StringArray::from(vec!["part-0.parquet"]))),
                ("xmin", float(0.0)),
                ("xmax", float(1.0)),
                ("ymin", float(0.0)),
                ("ymax", float(1.0)),
                ("num_buildings", float(42.0)),
            ],
        );

        let index = FileIndex::load(&path).unwrap().unwrap();
        assert_eq!(index.entries()[0].row_count, 42);
    }

    #[test]
    fn unparsable_text_bound_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("building_index.parquet");
        let text = |v: &str| -> ArrayRef { Arc::new(StringArray::from(vec![v])) };
        write_batch(
            &path,
            vec![
                ("file_name", text("part-0.parquet")),
                ("xmin", text("west")),
                ("xmax", text("1.0")),
                ("ymin", text("0.0")),
                ("ymax", text("1.0")),
                ("row_count", Arc::new(Int64Array::from(vec![1]))),
            ],
        );

        let err = FileIndex::load(&path).unwrap_err();
        assert!(matches!(err, QueryExecutionError::Index { .. }));
    }

    #[test]
    fn candidates_overlap_symmetrically_in_index_order() {
        let index = FileIndex::new(vec![
            entry("a.parquet", [36.0, -2.0, 37.0, -1.0], 1),
            entry("b.parquet", [0.0, 0.0, 1.0, 1.0], 1),
            entry("c.parquet", [36.8, -1.5, 36.9, -1.2], 1),
            entry("d.parquet", [36.820, -1.280, 40.0, 0.0], 1),
        ]);
        let query = BoundingBox::new(36.817, -1.283, 36.820, -1.280);

        let candidates = index.candidates(&query);
        assert_eq!(candidates.len(), 3);
        assert!(candidates[0].ends_with("a.parquet"));
        assert!(candidates[1].ends_with("c.parquet"));
        assert!(candidates[2].ends_with("d.parquet"));

        for e in index.entries() {
            assert_eq!(
                e.bbox().overlaps(&query),
                query.overlaps(&e.bbox()),
                "{}",
                e.file_name
            );
        }
    }

    #[tokio::test]
    async fn build_writes_one_row_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.parquet");
        let engine = RecordingEngine {
            statistics: vec![
                stats("a.parquet", Some([1.0, 2.0, 3.0, 4.0]), 10),
                stats("b.parquet", Some([-3.0, -4.0, -1.0, -2.0]), 5),
            ],
            ..RecordingEngine::default()
        };

        let report = build_index(&engine, "s3://bucket/buildings/", &path)
            .await
            .unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.rows, 15);
        assert!(report.bytes > 0);

        let index = FileIndex::load(&path).unwrap().unwrap();
        assert_eq!(index.entries()[1].bbox(), BoundingBox::new(-3.0, -4.0, -1.0, -2.0));
        assert!(!dir.path().join("index.parquet.lock").exists());
    }

    #[tokio::test]
    async fn failed_build_keeps_previous_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.parquet");
        let previous = FileIndex::new(vec![entry("old.parquet", [0.0, 0.0, 1.0, 1.0], 3)]);
        previous.write_atomic(&path).unwrap();

        let engine = RecordingEngine {
            statistics: vec![
                stats("a.parquet", Some([1.0, 2.0, 3.0, 4.0]), 10),
                stats("no-stats.parquet", None, 5),
            ],
            ..RecordingEngine::default()
        };
        let err = build_index(&engine, "s3://bucket/buildings/", &path)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexBuildError::MissingStatistics { .. }));

        let err = build_index(&RecordingEngine::failing(), "s3://bucket/buildings/", &path)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexBuildError::Scan(_)));

        let err = build_index(&RecordingEngine::default(), "s3://bucket/buildings/", &path)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexBuildError::EmptyDataset { .. }));

        assert_eq!(FileIndex::load(&path).unwrap().unwrap(), previous);
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temp and lock files are cleaned up");
    }

    #[tokio::test]
    async fn concurrent_build_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.parquet");
        let _held = BuildLock::acquire(&path).unwrap();

        let err = build_index(&RecordingEngine::default(), "s3://bucket/", &path)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexBuildError::AlreadyRunning { .. }));
        assert!(!path.exists());
    }
}
