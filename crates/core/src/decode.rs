//! Strip annotations from property values into a plain JSON tree.
//!
//! Secrecy is not observable past this point; use `extract` when provenance
//! matters.

use serde_json::{Map, Number, Value};

use crate::error::PropertyError;
use crate::path::PropertyPath;
use crate::value::{PropertyMap, PropertyValue};

/// Decode a property map into a plain JSON object.
///
/// Unknown values (`Computed`, unknown `Output`) become `null`. Fails on
/// `Asset`, `Archive` and `ResourceReference` leaves.
pub fn decode(props: &PropertyMap) -> Result<Map<String, Value>, PropertyError> {
    let mut path = PropertyPath::root();
    decode_map(props, &mut path)
}

/// Decode a single property value.
pub fn decode_value(v: &PropertyValue) -> Result<Value, PropertyError> {
    let mut path = PropertyPath::root();
    decode_at(v, &mut path)
}

fn decode_map(props: &PropertyMap, path: &mut PropertyPath) -> Result<Map<String, Value>, PropertyError> {
    let mut out = Map::with_capacity(props.len());
    for (k, v) in props {
        path.push(k.as_str());
        let decoded = decode_at(v, path)?;
        path.pop();
        out.insert(k.clone(), decoded);
    }
    Ok(out)
}

fn decode_at(v: &PropertyValue, path: &mut PropertyPath) -> Result<Value, PropertyError> {
    Ok(match v {
        PropertyValue::Null => Value::Null,
        PropertyValue::Bool(b) => Value::Bool(*b),
        // NaN and infinities have no JSON form
        PropertyValue::Number(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
        PropertyValue::String(s) => Value::String(s.clone()),
        PropertyValue::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(i);
                out.push(decode_at(item, path)?);
                path.pop();
            }
            Value::Array(out)
        }
        PropertyValue::Object(map) => Value::Object(decode_map(map, path)?),
        PropertyValue::Computed(_) => Value::Null,
        PropertyValue::Output(o) if !o.known => Value::Null,
        PropertyValue::Output(o) => decode_at(&o.element, path)?,
        PropertyValue::Secret(inner) => decode_at(inner, path)?,
        PropertyValue::Asset(_) | PropertyValue::Archive(_) | PropertyValue::ResourceReference { .. } => {
            return Err(PropertyError::Unsupported { kind: v.type_name(), path: path.to_string() });
        }
    })
}
