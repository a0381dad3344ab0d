//! File pruning: which data files a query has to read.

use log::debug;

use crate::engine::ScanSource;
use crate::geometry::BoundingBox;
use crate::index::FileIndex;

/// Outcome of planning one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    /// No index is available; every file is scanned.
    FullDataset,
    /// Only these files can hold matches, in index order.
    Files(Vec<String>),
    /// No file overlaps the query. The result is empty without a scan.
    Empty,
}

impl QueryPlan {
    /// Select the files whose extent overlaps `bbox`.
    #[must_use]
    pub fn for_bbox(bbox: &BoundingBox, index: Option<&FileIndex>) -> Self {
        let Some(index) = index else {
            debug!("No file index, scanning the full dataset");
            return Self::FullDataset;
        };

        let files = index.candidates(bbox);
        debug!("{} of {} files overlap the query", files.len(), index.len());
        if files.is_empty() {
            Self::Empty
        } else {
            Self::Files(files)
        }
    }

    /// What the engine reads for this plan, `None` when nothing needs reading.
    #[must_use]
    pub fn scan_source(&self, dataset: &str) -> Option<ScanSource> {
        match self {
            Self::FullDataset => Some(ScanSource::Dataset(dataset.to_string())),
            Self::Files(files) => Some(ScanSource::Files(files.clone())),
            Self::Empty => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexEntry;

    fn index() -> FileIndex {
        let entry = |name: &str, xmin, ymin, xmax, ymax| IndexEntry {
            file_name: name.to_string(),
            xmin,
            ymin,
            xmax,
            ymax,
            row_count: 1,
        };
        FileIndex::new(vec![
            entry("east.parquet", 30.0, -5.0, 40.0, 5.0),
            entry("west.parquet", -20.0, -5.0, -10.0, 5.0),
            entry("wide.parquet", -20.0, -5.0, 40.0, 5.0),
        ])
    }

    #[test]
    fn no_index_scans_everything() {
        let plan = QueryPlan::for_bbox(&BoundingBox::new(0.0, 0.0, 1.0, 1.0), None);
        assert_eq!(plan, QueryPlan::FullDataset);
        assert_eq!(
            plan.scan_source("s3://bucket/buildings/"),
            Some(ScanSource::Dataset("s3://bucket/buildings/".to_string()))
        );
    }

    #[test]
    fn keeps_overlapping_files_in_index_order() {
        let index = index();
        let plan = QueryPlan::for_bbox(&BoundingBox::new(36.8, -1.3, 36.9, -1.2), Some(&index));
        assert_eq!(
            plan,
            QueryPlan::Files(vec!["east.parquet".to_string(), "wide.parquet".to_string()])
        );
    }

    #[test]
    fn no_overlap_is_empty() {
        let index = index();
        let plan = QueryPlan::for_bbox(&BoundingBox::new(100.0, 50.0, 101.0, 51.0), Some(&index));
        assert_eq!(plan, QueryPlan::Empty);
        assert_eq!(plan.scan_source("s3://bucket/"), None);
    }

    #[test]
    fn empty_index_is_empty_plan() {
        let plan = QueryPlan::for_bbox(
            &BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            Some(&FileIndex::default()),
        );
        assert_eq!(plan, QueryPlan::Empty);
    }
}
