//! Query geometry normalization.
//!
//! A request polygon arrives as a `GeoJSON` geometry value. It is validated
//! once, converted to `geo_types`, and turned into the two shapes the rest of
//! the pipeline needs: an axis-aligned [`BoundingBox`] for file pruning and a
//! WKT string for the exact intersection test.

use geo::CoordsIter;
use geo_types::{Coord, Geometry, LineString, MultiPolygon, Polygon};
use geozero::ToWkt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GeometryError;

/// Axis-aligned bounding box in longitude/latitude degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Whether the two boxes share at least one point. Touching edges count.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.xmax >= other.xmin
            && self.xmin <= other.xmax
            && self.ymax >= other.ymin
            && self.ymin <= other.ymax
    }

    #[must_use]
    pub fn contains(&self, coord: Coord<f64>) -> bool {
        coord.x >= self.xmin && coord.x <= self.xmax && coord.y >= self.ymin && coord.y <= self.ymax
    }

    fn from_coords(mut coords: impl Iterator<Item = Coord<f64>>) -> Option<Self> {
        let first = coords.next()?;
        let init = Self::new(first.x, first.y, first.x, first.y);
        Some(coords.fold(init, |b, c| {
            Self::new(b.xmin.min(c.x), b.ymin.min(c.y), b.xmax.max(c.x), b.ymax.max(c.y))
        }))
    }
}

/// A validated polygon or multipolygon ready to drive a spatial query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryGeometry {
    geometry: Geometry<f64>,
    bbox: BoundingBox,
    wkt: String,
    geojson: geojson::Geometry,
}

impl QueryGeometry {
    /// Parse and validate a `GeoJSON` geometry value.
    ///
    /// Only `Polygon` and `MultiPolygon` are accepted. Every ring must hold at
    /// least one position, and every position at least two finite ordinates.
    ///
    /// # Errors
    ///
    /// Returns a [`GeometryError`] describing the first problem found.
    pub fn from_geojson(value: Value) -> Result<Self, GeometryError> {
        let parsed = geojson::Geometry::from_json_value(value).map_err(|e| {
            GeometryError::InvalidGeoJson {
                message: e.to_string(),
            }
        })?;

        let geometry = match &parsed.value {
            geojson::Value::Polygon(rings) => Geometry::Polygon(polygon_from_rings(0, rings)?),
            geojson::Value::MultiPolygon(polygons) => {
                if polygons.is_empty() {
                    return Err(GeometryError::Empty {
                        geometry_type: "MultiPolygon".to_string(),
                    });
                }
                let polygons = polygons
                    .iter()
                    .enumerate()
                    .map(|(i, rings)| polygon_from_rings(i, rings))
                    .collect::<Result<Vec<_>, _>>()?;
                Geometry::MultiPolygon(MultiPolygon::new(polygons))
            },
            other => {
                return Err(GeometryError::UnsupportedType {
                    geometry_type: type_name(other).to_string(),
                });
            },
        };

        let bbox = bounding_box(&geometry).ok_or_else(|| GeometryError::Empty {
            geometry_type: type_name(&parsed.value).to_string(),
        })?;
        let wkt = geometry
            .to_wkt()
            .map_err(|e| GeometryError::InvalidGeoJson {
                message: e.to_string(),
            })?;

        Ok(Self {
            geometry,
            bbox,
            wkt,
            geojson: parsed,
        })
    }

    /// Parse a `GeoJSON` geometry from text.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidGeoJson`] for malformed JSON, otherwise
    /// the same errors as [`QueryGeometry::from_geojson`].
    pub fn from_geojson_str(text: &str) -> Result<Self, GeometryError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| GeometryError::InvalidGeoJson {
                message: e.to_string(),
            })?;
        Self::from_geojson(value)
    }

    #[must_use]
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    #[must_use]
    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    /// The geometry exactly as it was received.
    #[must_use]
    pub fn geojson(&self) -> &geojson::Geometry {
        &self.geojson
    }
}

fn polygon_from_rings(polygon: usize, rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>, GeometryError> {
    if rings.is_empty() {
        return Err(GeometryError::Empty {
            geometry_type: "Polygon".to_string(),
        });
    }

    let mut line_strings = rings
        .iter()
        .enumerate()
        .map(|(ring, positions)| ring_from_positions(polygon, ring, positions))
        .collect::<Result<Vec<_>, _>>()?;
    let exterior = line_strings.remove(0);
    Ok(Polygon::new(exterior, line_strings))
}

fn ring_from_positions(
    polygon: usize,
    ring: usize,
    positions: &[Vec<f64>],
) -> Result<LineString<f64>, GeometryError> {
    if positions.is_empty() {
        return Err(GeometryError::EmptyRing { polygon, ring });
    }

    let invalid = |message: String| GeometryError::InvalidPosition {
        polygon,
        ring,
        message,
    };
    positions
        .iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
            [_, _, ..] => Err(invalid(format!("non-finite ordinate in {position:?}"))),
            _ => Err(invalid(format!(
                "expected at least 2 ordinates, found {}",
                position.len()
            ))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::new)
}

/// Bbox over every vertex, interior rings included.
fn bounding_box(geometry: &Geometry<f64>) -> Option<BoundingBox> {
    BoundingBox::from_coords(geometry.coords_iter())
}

fn type_name(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nairobi() -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[
                [36.817, -1.283], [36.820, -1.283], [36.820, -1.280],
                [36.817, -1.280], [36.817, -1.283]
            ]]
        })
    }

    #[test]
    fn polygon_bbox_and_wkt() {
        let geometry = QueryGeometry::from_geojson(nairobi()).unwrap();
        assert_eq!(
            geometry.bbox(),
            BoundingBox::new(36.817, -1.283, 36.820, -1.280)
        );
        assert!(geometry.wkt().starts_with("POLYGON(("));
        assert!(geometry.wkt().contains("36.817 -1.283"));
    }

    #[test]
    fn bbox_covers_holes_and_every_polygon() {
        let value = json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]],
                [
                    [[10.0, 10.0], [12.0, 10.0], [12.0, 12.0], [10.0, 10.0]],
                    [[10.5, 10.5], [13.0, 10.5], [11.0, -3.0], [10.5, 10.5]]
                ]
            ]
        });
        let geometry = QueryGeometry::from_geojson(value).unwrap();
        let bbox = geometry.bbox();
        assert_eq!(bbox, BoundingBox::new(0.0, -3.0, 13.0, 12.0));

        let Geometry::MultiPolygon(mp) = geometry.geometry() else {
            panic!("expected multipolygon");
        };
        for polygon in &mp.0 {
            for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
                assert!(ring.0.iter().all(|c| bbox.contains(*c)));
            }
        }
    }

    #[test]
    fn single_position_ring_is_degenerate_but_accepted() {
        let value = json!({"type": "Polygon", "coordinates": [[[5.0, 6.0]]]});
        let geometry = QueryGeometry::from_geojson(value).unwrap();
        assert_eq!(geometry.bbox(), BoundingBox::new(5.0, 6.0, 5.0, 6.0));
    }

    #[test]
    fn rejects_unsupported_types() {
        let err = QueryGeometry::from_geojson(json!({"type": "Point", "coordinates": [1.0, 2.0]}))
            .unwrap_err();
        assert!(matches!(
            err,
            GeometryError::UnsupportedType { ref geometry_type } if geometry_type == "Point"
        ));
    }

    #[test]
    fn rejects_empty_shapes() {
        let err = QueryGeometry::from_geojson(json!({"type": "Polygon", "coordinates": []}))
            .unwrap_err();
        assert!(matches!(err, GeometryError::Empty { .. }));

        let err = QueryGeometry::from_geojson(json!({"type": "MultiPolygon", "coordinates": []}))
            .unwrap_err();
        assert!(matches!(err, GeometryError::Empty { ref geometry_type } if geometry_type == "MultiPolygon"));

        let err = QueryGeometry::from_geojson(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 1.0], [0.0, 0.0]], []]
        }))
        .unwrap_err();
        assert!(matches!(err, GeometryError::EmptyRing { polygon: 0, ring: 1 }));
    }

    #[test]
    fn rejects_short_positions() {
        let err = QueryGeometry::from_geojson(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0], [0.0, 0.0]]]
        }));
        assert!(matches!(err, Err(GeometryError::InvalidPosition { .. }) | Err(GeometryError::InvalidGeoJson { .. })));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            QueryGeometry::from_geojson(json!("polygon")),
            Err(GeometryError::InvalidGeoJson { .. })
        ));
        assert!(matches!(
            QueryGeometry::from_geojson_str("{not json"),
            Err(GeometryError::InvalidGeoJson { .. })
        ));
        assert!(matches!(
            QueryGeometry::from_geojson(json!({"type": "Polygon", "coordinates": "oops"})),
            Err(GeometryError::InvalidGeoJson { .. })
        ));
    }

    #[test]
    fn overlap_is_symmetric_and_inclusive() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let touching = BoundingBox::new(1.0, 1.0, 2.0, 2.0);
        let apart = BoundingBox::new(1.5, 0.0, 2.0, 1.0);
        assert!(a.overlaps(&touching) && touching.overlaps(&a));
        assert!(!a.overlaps(&apart) && !apart.overlaps(&a));
    }
}
