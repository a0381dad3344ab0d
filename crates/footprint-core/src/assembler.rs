//! Raw result rows to `GeoJSON` features.
//!
//! Each row carries its geometry as `GeoJSON` text in [`GEOMETRY_COLUMN`].
//! Every other non-null column becomes a property; `sources` may arrive as
//! JSON text and is decoded into its array form.

use geojson::{Feature, JsonObject};
use serde_json::Value;

use crate::engine::{GEOMETRY_COLUMN, RawRow};
use crate::error::FeatureError;

const SOURCES: &str = "sources";

/// Build one feature from a result row.
///
/// # Errors
///
/// Returns a [`FeatureError`] if the geometry is missing or malformed, or
/// if textual `sources` is not JSON.
pub fn assemble_feature(mut row: RawRow) -> Result<Feature, FeatureError> {
    let id = row_id(&row);
    let geometry = match row.remove(GEOMETRY_COLUMN) {
        None | Some(Value::Null) => {
            return Err(FeatureError::MissingGeometry {
                column: GEOMETRY_COLUMN.to_string(),
            });
        },
        Some(value) => parse_geometry(value).map_err(|message| FeatureError::MalformedGeometry {
            id: id.clone(),
            message,
        })?,
    };

    let mut properties = JsonObject::new();
    for (key, value) in row {
        match value {
            Value::Null => {},
            Value::String(text) if key == SOURCES => {
                let sources = serde_json::from_str(&text).map_err(|e| {
                    FeatureError::MalformedSources {
                        id: id.clone(),
                        message: e.to_string(),
                    }
                })?;
                properties.insert(key, sources);
            },
            value => {
                properties.insert(key, value);
            },
        }
    }

    Ok(Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    })
}

/// Build features for all rows, stopping at the first malformed one.
///
/// # Errors
///
/// Returns the first [`FeatureError`] encountered.
pub fn assemble_features(rows: Vec<RawRow>) -> Result<Vec<Feature>, FeatureError> {
    rows.into_iter().map(assemble_feature).collect()
}

fn parse_geometry(value: Value) -> Result<geojson::Geometry, String> {
    let value = match value {
        Value::String(text) => serde_json::from_str(&text).map_err(|e| e.to_string())?,
        other => other,
    };
    geojson::Geometry::from_json_value(value).map_err(|e| e.to_string())
}

fn row_id(row: &RawRow) -> Option<String> {
    match row.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
