//! JSON and BSON value conversion
//!
//! Transport form is JSON: object ids become hex strings and datetimes
//! become RFC 3339 strings with millisecond precision.

use bson::oid::ObjectId;
use bson::{Bson, Document};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Number, Value};

/// RFC 3339 form of a BSON datetime, e.g. `2024-01-05T10:00:00.000Z`
pub fn datetime_to_string(value: bson::DateTime) -> String {
    match Utc.timestamp_millis_opt(value.timestamp_millis()).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => value.timestamp_millis().to_string(),
    }
}

/// Parse RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.f]` (read as UTC) or a bare date
pub fn parse_datetime(text: &str) -> Option<bson::DateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(bson::DateTime::from_millis(dt.timestamp_millis()));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(bson::DateTime::from_millis(
                Utc.from_utc_datetime(&naive).timestamp_millis(),
            ));
        }
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(bson::DateTime::from_millis(
        Utc.from_utc_datetime(&midnight).timestamp_millis(),
    ))
}

/// Native value of a single-key extended-notation document:
/// `{"$date": iso | millis}` or `{"$oid": hex}`
pub fn extended_value(map: &Map<String, Value>) -> Option<Bson> {
    if map.len() != 1 {
        return None;
    }
    match map.iter().next()? {
        (key, Value::String(text)) if key == "$date" => parse_datetime(text).map(Bson::DateTime),
        (key, Value::Number(millis)) if key == "$date" => {
            millis.as_i64().map(|ms| Bson::DateTime(bson::DateTime::from_millis(ms)))
        }
        (key, Value::String(hex)) if key == "$oid" => ObjectId::parse_str(hex).ok().map(Bson::ObjectId),
        _ => None,
    }
}

pub(crate) fn number_to_bson(n: &Number) -> Bson {
    if let Some(i) = n.as_i64() {
        match i32::try_from(i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i),
        }
    } else {
        Bson::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

/// JSON to BSON, honouring extended notation
pub fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => number_to_bson(n),
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => match extended_value(map) {
            Some(native) => native,
            None => Bson::Document(json_to_document(map)),
        },
    }
}

pub fn json_to_document(map: &Map<String, Value>) -> Document {
    let mut document = Document::new();
    for (key, value) in map {
        document.insert(key.clone(), json_to_bson(value));
    }
    document
}

/// BSON to transport JSON
pub fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(n) => Value::from(*n),
        Bson::Int64(n) => Value::from(*n),
        Bson::Double(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Bson::String(s) | Bson::Symbol(s) => Value::String(s.clone()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(datetime_to_string(*dt)),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(document) => document_to_json(document),
        other => Value::String(other.to_string()),
    }
}

pub fn document_to_json(document: &Document) -> Value {
    let mut map = Map::new();
    for (key, value) in document {
        map.insert(key.clone(), bson_to_json(value));
    }
    Value::Object(map)
}
