//! Conversion between plain JSON fields and typed REST document values.

use serde_json::{json, Map, Value};
use xpenza_core::sync::{Document, Fields, Filter};

use crate::error::{RemoteError, Result};

pub(crate) fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // Integers travel as strings to keep 64-bit precision.
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub(crate) fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(name, value)| (name.clone(), encode_value(value)))
            .collect(),
    )
}

pub(crate) fn decode_value(value: &Value) -> Result<Value> {
    let Some(typed) = value
        .as_object()
        .and_then(|m| m.iter().next())
        .map(|(kind, inner)| (kind.as_str(), inner))
    else {
        return Err(RemoteError::invalid_response(format!(
            "untyped value: {}",
            value
        )));
    };
    match typed {
        ("nullValue", _) => Ok(Value::Null),
        ("booleanValue", b) => Ok(Value::Bool(b.as_bool().unwrap_or_default())),
        ("integerValue", i) => {
            let parsed = match i {
                Value::String(s) => s.parse::<i64>().ok(),
                other => other.as_i64(),
            };
            parsed
                .map(Value::from)
                .ok_or_else(|| RemoteError::invalid_response(format!("bad integer: {}", i)))
        }
        ("doubleValue", d) => Ok(d
            .as_f64()
            .map(Value::from)
            .unwrap_or(Value::Null)),
        ("stringValue", s) | ("timestampValue", s) | ("referenceValue", s) => Ok(s.clone()),
        ("arrayValue", a) => {
            let items = a
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect::<Result<Vec<_>>>())
                .transpose()?
                .unwrap_or_default();
            Ok(Value::Array(items))
        }
        ("mapValue", m) => {
            let fields = m.get("fields").cloned().unwrap_or_else(|| json!({}));
            Ok(Value::Object(decode_fields(&fields)?))
        }
        (kind, _) => Err(RemoteError::invalid_response(format!(
            "unsupported value type {}",
            kind
        ))),
    }
}

pub(crate) fn decode_fields(fields: &Value) -> Result<Fields> {
    let Some(map) = fields.as_object() else {
        return Ok(Map::new());
    };
    map.iter()
        .map(|(name, value)| Ok((name.clone(), decode_value(value)?)))
        .collect()
}

/// Last path segment of a document resource name.
pub(crate) fn document_id(name: &str) -> Result<String> {
    name.rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RemoteError::invalid_response(format!("bad document name: {}", name)))
}

pub(crate) fn decode_document(raw: &Value) -> Result<Document> {
    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::invalid_response("document without name"))?;
    let fields = decode_fields(raw.get("fields").unwrap_or(&Value::Null))?;
    Ok(Document::new(document_id(name)?, fields))
}

/// `structuredQuery` body for a collection with AND-ed equality filters.
pub(crate) fn structured_query(collection: &str, filters: &[Filter]) -> Value {
    let field_filters: Vec<Value> = filters
        .iter()
        .map(|filter| {
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": filter.field },
                    "op": "EQUAL",
                    "value": encode_value(&filter.value),
                }
            })
        })
        .collect();

    let mut query = json!({ "from": [{ "collectionId": collection }] });
    let condition = match field_filters.len() {
        0 => None,
        1 => field_filters.into_iter().next(),
        _ => Some(json!({
            "compositeFilter": { "op": "AND", "filters": field_filters }
        })),
    };
    if let Some(condition) = condition {
        query["where"] = condition;
    }
    json!({ "structuredQuery": query })
}
