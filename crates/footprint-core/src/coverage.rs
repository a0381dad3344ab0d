//! Attribute coverage and provenance over a result set.

use std::collections::BTreeMap;

use geojson::Feature;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dataset label for provenance records that do not name one.
pub const UNKNOWN_DATASET: &str = "Unknown";

/// Data-quality summary of a set of building features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageStats {
    /// Share of features with a height, in whole percent.
    pub height_coverage_pct: u32,
    pub floor_coverage_pct: u32,
    pub class_coverage_pct: u32,
    /// Mean height in metres to one decimal, `None` when no feature has one.
    pub avg_height: Option<f64>,
    /// Features per dataset of their first provenance record.
    pub source_breakdown: BTreeMap<String, usize>,
}

impl CoverageStats {
    /// Summarize `features`. An empty slice yields zero coverage.
    #[must_use]
    pub fn from_features(features: &[Feature]) -> Self {
        let total = features.len();
        let mut heights = 0;
        let mut height_values = Vec::new();
        let mut floors = 0;
        let mut classes = 0;
        let mut source_breakdown = BTreeMap::new();

        for feature in features {
            if let Some(height) = property(feature, "height") {
                heights += 1;
                height_values.extend(height.as_f64());
            }
            if property(feature, "num_floors").is_some() {
                floors += 1;
            }
            if property(feature, "class").is_some() {
                classes += 1;
            }
            if let Some(dataset) = first_source_dataset(feature) {
                *source_breakdown.entry(dataset).or_insert(0) += 1;
            }
        }

        let avg_height = if heights == 0 || height_values.is_empty() {
            None
        } else {
            let mean = height_values.iter().sum::<f64>() / height_values.len() as f64;
            round_tenths(mean)
        };

        Self {
            height_coverage_pct: percent(heights, total),
            floor_coverage_pct: percent(floors, total),
            class_coverage_pct: percent(classes, total),
            avg_height,
            source_breakdown,
        }
    }
}

/// A property that is set to something other than `null`.
fn property<'a>(feature: &'a Feature, key: &str) -> Option<&'a Value> {
    feature
        .properties
        .as_ref()?
        .get(key)
        .filter(|value| !value.is_null())
}

fn first_source_dataset(feature: &Feature) -> Option<String> {
    let first = property(feature, "sources")?.as_array()?.first()?;
    let dataset = first
        .get("dataset")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_DATASET);
    Some(dataset.to_string())
}

/// Round to one decimal on the exact binary value, ties to even.
///
/// Scaling by ten first would round twice: 0.35 is stored just below 0.35
/// but `0.35 * 10.0` is exactly 3.5.
fn round_tenths(value: f64) -> Option<f64> {
    format!("{value:.1}").parse().ok()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (count as f64 / total as f64 * 100.0).round_ties_even() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(properties: Value) -> Feature {
        Feature {
            bbox: None,
            geometry: None,
            id: None,
            properties: properties.as_object().cloned(),
            foreign_members: None,
        }
    }

    fn sourced(dataset: &str) -> Feature {
        feature(json!({"sources": [{"dataset": dataset}, {"dataset": "ignored"}]}))
    }

    #[test]
    fn empty_input_is_all_zero() {
        let stats = CoverageStats::from_features(&[]);
        assert_eq!(stats, CoverageStats::default());
        assert_eq!(stats.avg_height, None);
    }

    #[test]
    fn average_rounds_the_stored_value() {
        let features = vec![
            feature(json!({"height": 0.3})),
            feature(json!({"height": 0.4})),
        ];
        assert_eq!(CoverageStats::from_features(&features).avg_height, Some(0.3));

        assert_eq!(round_tenths(2.25), Some(2.2));
        assert_eq!(round_tenths(2.75), Some(2.8));
        assert_eq!(round_tenths(9.0), Some(9.0));
        assert_eq!(round_tenths(-1.06), Some(-1.1));
    }

    #[test]
    fn coverage_and_average() {
        let features = vec![
            feature(json!({"height": 10.0, "class": "residential"})),
            feature(json!({"height": 15.0, "num_floors": 4})),
            feature(json!({"num_floors": 2})),
        ];
        let stats = CoverageStats::from_features(&features);
        assert_eq!(stats.height_coverage_pct, 67);
        assert_eq!(stats.floor_coverage_pct, 67);
        assert_eq!(stats.class_coverage_pct, 33);
        assert_eq!(stats.avg_height, Some(12.5));
    }

    #[test]
    fn average_rounds_to_one_decimal() {
        let features = vec![
            feature(json!({"height": 3.0})),
            feature(json!({"height": 3.0})),
            feature(json!({"height": 4.0})),
        ];
        assert_eq!(CoverageStats::from_features(&features).avg_height, Some(3.3));
    }

    #[test]
    fn percentages_round_half_to_even() {
        assert_eq!(percent(1, 8), 12);
        assert_eq!(percent(3, 8), 38);
        assert_eq!(percent(0, 5), 0);
        assert_eq!(percent(5, 5), 100);
    }

    #[test]
    fn provenance_counts_first_source_only() {
        let features = vec![
            sourced("A"),
            sourced("B"),
            sourced("A"),
            sourced("B"),
            sourced("A"),
        ];
        let stats = CoverageStats::from_features(&features);
        assert_eq!(stats.source_breakdown.len(), 2);
        assert_eq!(stats.source_breakdown["A"], 3);
        assert_eq!(stats.source_breakdown["B"], 2);
    }

    #[test]
    fn provenance_without_dataset_is_unknown() {
        let features = vec![
            feature(json!({"sources": [{"record_id": "w1"}]})),
            feature(json!({"sources": []})),
            feature(json!({"height": 3})),
        ];
        let stats = CoverageStats::from_features(&features);
        assert_eq!(stats.source_breakdown.len(), 1);
        assert_eq!(stats.source_breakdown[UNKNOWN_DATASET], 1);
    }

    #[test]
    fn null_properties_are_absent() {
        let stats = CoverageStats::from_features(&[feature(json!({"height": null, "class": null}))]);
        assert_eq!(stats.height_coverage_pct, 0);
        assert_eq!(stats.class_coverage_pct, 0);
        assert_eq!(stats.avg_height, None);
    }

    #[test]
    fn serializes_with_flat_keys() {
        let value = serde_json::to_value(CoverageStats::default()).unwrap();
        assert_eq!(value["avg_height"], Value::Null);
        assert_eq!(value["height_coverage_pct"], json!(0));
        assert_eq!(value["source_breakdown"], json!({}));
    }
}
