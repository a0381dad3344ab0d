//! Spatial scalar functions over WKB geometry columns.
//!
//! GeoParquet stores geometries as Well-Known Binary. These functions decode
//! the WKB per row with `geozero` and evaluate predicates with `geo`:
//!
//! - `st_intersects(geometry, wkt)` exact intersection against a WKT literal
//! - `st_asgeojson(geometry)` renders the geometry as a `GeoJSON` string

use std::any::Any;
use std::sync::Arc;

use arrow_array::builder::{BooleanBuilder, StringBuilder};
use arrow_array::cast::AsArray;
use arrow_array::{Array, ArrayRef};
use arrow_schema::DataType;
use datafusion_common::{DataFusionError, Result, ScalarValue, exec_err};
use datafusion_expr::{
    ColumnarValue, ScalarFunctionArgs, ScalarUDF, ScalarUDFImpl, Signature, Volatility,
};
use geo::Intersects;
use geo_types::Geometry;
use geozero::wkb::Wkb;
use geozero::wkt::Wkt;
use geozero::{ToGeo, ToJson};

/// Exact geometric intersection between a WKB column and a WKT geometry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StIntersects {
    signature: Signature,
}

impl StIntersects {
    #[must_use]
    pub fn new() -> Self {
        Self {
            signature: Signature::any(2, Volatility::Immutable),
        }
    }
}

impl Default for StIntersects {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalarUDFImpl for StIntersects {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "st_intersects"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, _arg_types: &[DataType]) -> Result<DataType> {
        Ok(DataType::Boolean)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> Result<ColumnarValue> {
        let number_rows = args.number_rows;
        let [geometry, other] = args.args.as_slice() else {
            return exec_err!("st_intersects expects 2 arguments, got {}", args.args.len());
        };

        let geometries = geometry.to_array(number_rows)?;
        let wkb_values = binary_values(&geometries)?;
        let mut builder = BooleanBuilder::with_capacity(number_rows);

        match other {
            ColumnarValue::Scalar(scalar) => {
                let Some(text) = scalar_text(scalar)? else {
                    builder.append_nulls(number_rows);
                    return Ok(ColumnarValue::Array(Arc::new(builder.finish())));
                };
                let query = wkt_to_geometry(&text)?;
                for value in wkb_values {
                    match value {
                        Some(bytes) => builder.append_value(wkb_to_geometry(bytes)?.intersects(&query)),
                        None => builder.append_null(),
                    }
                }
            },
            ColumnarValue::Array(array) => {
                let texts = text_values(array)?;
                for (value, text) in wkb_values.into_iter().zip(texts) {
                    match (value, text) {
                        (Some(bytes), Some(text)) => {
                            let query = wkt_to_geometry(text)?;
                            builder.append_value(wkb_to_geometry(bytes)?.intersects(&query));
                        },
                        _ => builder.append_null(),
                    }
                }
            },
        }

        Ok(ColumnarValue::Array(Arc::new(builder.finish())))
    }
}

/// Renders a WKB geometry column as `GeoJSON` geometry text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StAsGeoJson {
    signature: Signature,
}

impl StAsGeoJson {
    #[must_use]
    pub fn new() -> Self {
        Self {
            signature: Signature::any(1, Volatility::Immutable),
        }
    }
}

impl Default for StAsGeoJson {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalarUDFImpl for StAsGeoJson {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "st_asgeojson"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, _arg_types: &[DataType]) -> Result<DataType> {
        Ok(DataType::Utf8)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> Result<ColumnarValue> {
        let number_rows = args.number_rows;
        let [geometry] = args.args.as_slice() else {
            return exec_err!("st_asgeojson expects 1 argument, got {}", args.args.len());
        };

        let geometries = geometry.to_array(number_rows)?;
        let mut builder = StringBuilder::with_capacity(number_rows, number_rows * 128);
        for value in binary_values(&geometries)? {
            match value {
                Some(bytes) => builder.append_value(wkb_to_geojson(bytes)?),
                None => builder.append_null(),
            }
        }

        Ok(ColumnarValue::Array(Arc::new(builder.finish())))
    }
}

/// `st_intersects` as a registrable [`ScalarUDF`].
#[must_use]
pub fn st_intersects_udf() -> ScalarUDF {
    ScalarUDF::new_from_impl(StIntersects::new())
}

/// `st_asgeojson` as a registrable [`ScalarUDF`].
#[must_use]
pub fn st_asgeojson_udf() -> ScalarUDF {
    ScalarUDF::new_from_impl(StAsGeoJson::new())
}

fn binary_values(array: &ArrayRef) -> Result<Vec<Option<&[u8]>>> {
    let values = match array.data_type() {
        DataType::Binary => array.as_binary::<i32>().iter().collect(),
        DataType::LargeBinary => array.as_binary::<i64>().iter().collect(),
        DataType::BinaryView => array.as_binary_view().iter().collect(),
        DataType::Null => vec![None; array.len()],
        other => return exec_err!("expected a WKB geometry column, found {other}"),
    };
    Ok(values)
}

fn text_values(array: &ArrayRef) -> Result<Vec<Option<&str>>> {
    let values = match array.data_type() {
        DataType::Utf8 => array.as_string::<i32>().iter().collect(),
        DataType::LargeUtf8 => array.as_string::<i64>().iter().collect(),
        DataType::Utf8View => array.as_string_view().iter().collect(),
        DataType::Null => vec![None; array.len()],
        other => return exec_err!("expected WKT text, found {other}"),
    };
    Ok(values)
}

fn scalar_text(scalar: &ScalarValue) -> Result<Option<String>> {
    match scalar {
        ScalarValue::Utf8(text) | ScalarValue::LargeUtf8(text) | ScalarValue::Utf8View(text) => {
            Ok(text.clone())
        },
        ScalarValue::Null => Ok(None),
        other => exec_err!("expected WKT text, found {}", other.data_type()),
    }
}

pub(crate) fn wkb_to_geometry(bytes: &[u8]) -> Result<Geometry<f64>> {
    Wkb(bytes.to_vec())
        .to_geo()
        .map_err(|err| DataFusionError::Execution(format!("Failed to decode WKB geometry: {err}")))
}

fn wkb_to_geojson(bytes: &[u8]) -> Result<String> {
    Wkb(bytes.to_vec())
        .to_json()
        .map_err(|err| DataFusionError::Execution(format!("Failed to encode GeoJSON: {err}")))
}

fn wkt_to_geometry(text: &str) -> Result<Geometry<f64>> {
    Wkt(text)
        .to_geo()
        .map_err(|err| DataFusionError::Execution(format!("Failed to parse WKT geometry: {err}")))
}
