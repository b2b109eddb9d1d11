//! Conversion of raw provider records into [`Measurement`]s.
//!
//! Drop rules:
//! - no `measurement` key: rejected with [`RecordError::MissingMeasurement`]
//! - `measurement: null`: dropped silently (a provider disabling itself)
//! - no fields left after removing `measurement` and `tags`: dropped silently

use serde_json::Value;
use thiserror::Error;

use crate::measurement::{FieldValue, Fields, Measurement, Tags};
use crate::provider::traits::Record;

const MEASUREMENT_KEY: &str = "measurement";
const TAGS_KEY: &str = "tags";

/// Reasons a record is rejected.
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("record has no 'measurement' key")]
    MissingMeasurement,

    #[error("'measurement' must be a string, got {0}")]
    InvalidMeasurement(String),

    #[error("'tags' must be an object of scalar values, got {0}")]
    InvalidTags(String),

    #[error("field '{key}' must be a number or bool, got {value}")]
    InvalidField { key: String, value: String },
}

/// Format one record.
///
/// Returns `Ok(None)` for records that are dropped silently.
pub fn format_record(mut record: Record) -> Result<Option<Measurement>, RecordError> {
    let name = match record.remove(MEASUREMENT_KEY) {
        None => return Err(RecordError::MissingMeasurement),
        Some(Value::Null) => return Ok(None),
        Some(Value::String(name)) => name,
        Some(other) => return Err(RecordError::InvalidMeasurement(other.to_string())),
    };

    let tags = match record.remove(TAGS_KEY) {
        None | Some(Value::Null) => Tags::new(),
        Some(Value::Object(map)) => format_tags(map)?,
        Some(other) => return Err(RecordError::InvalidTags(other.to_string())),
    };

    let mut fields = Fields::new();
    for (key, value) in record {
        if value.is_null() {
            continue;
        }
        let Some(field) = FieldValue::from_json(&value) else {
            return Err(RecordError::InvalidField {
                key,
                value: value.to_string(),
            });
        };
        fields.insert(key, field);
    }

    if fields.is_empty() {
        return Ok(None);
    }

    Ok(Some(Measurement {
        measurement: name,
        fields,
        tags,
    }))
}

fn format_tags(map: serde_json::Map<String, Value>) -> Result<Tags, RecordError> {
    let mut tags = Tags::new();
    for (key, value) in map {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => return Err(RecordError::InvalidTags(other.to_string())),
        };
        tags.insert(key, value);
    }
    Ok(tags)
}
