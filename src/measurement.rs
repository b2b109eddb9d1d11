//! Core data types shared by providers, the scheduler and the sinks.
//!
//! - [`Measurement`]: one formatted record (name, fields, tags)
//! - [`FieldValue`]: a numeric or boolean field value
//! - [`Batch`]: every measurement produced by one cycle, stamped with its target time
//! - [`SinkRecord`]: the wire shape handed to sinks

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Tag set attached to a measurement.
pub type Tags = BTreeMap<String, String>;

/// Field set attached to a measurement.
pub type Fields = BTreeMap<String, FieldValue>;

/// A single field value.
///
/// Sinks distinguish integers from floats (InfluxDB writes integers with an
/// `i` suffix), so the split is kept from the provider output onwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    /// Convert a JSON value into a field value.
    ///
    /// Returns `None` for anything that is not a number or a bool. Unsigned
    /// integers beyond `i64::MAX` degrade to floats.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            _ => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// A formatted measurement ready for delivery.
///
/// # Example
///
/// ```
/// use metronome::{FieldValue, Measurement};
///
/// let m = Measurement::new("memory")
///     .with_field("total", 16_000_000_000_i64)
///     .with_field("percent", 42.5)
///     .with_tag("host", "db-1");
/// assert_eq!(m.fields["percent"], FieldValue::Float(42.5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Measurement (table) name.
    pub measurement: String,
    /// Field values; never empty once formatted.
    pub fields: Fields,
    /// Optional tags.
    #[serde(default)]
    pub tags: Tags,
}

impl Measurement {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            fields: Fields::new(),
            tags: Tags::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// All measurements produced by one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// The cycle's target time; every record in the batch carries it.
    pub target_time: DateTime<Utc>,
    /// Measurements in provider registration order.
    pub measurements: Vec<Measurement>,
}

impl Batch {
    pub fn new(target_time: DateTime<Utc>) -> Self {
        Self {
            target_time,
            measurements: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Timestamp string written to the sink (`YYYY-MM-DDTHH:MM:SSZ`).
    pub fn timestamp(&self) -> String {
        self.target_time.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Expand the batch into sink records.
    pub fn records(&self) -> Vec<SinkRecord<'_>> {
        let time = self.timestamp();
        self.measurements
            .iter()
            .map(|m| SinkRecord {
                measurement: &m.measurement,
                time: time.clone(),
                fields: &m.fields,
                tags: &m.tags,
            })
            .collect()
    }
}

/// Wire shape of one record as handed to a sink.
#[derive(Debug, Serialize)]
pub struct SinkRecord<'a> {
    pub measurement: &'a str,
    pub time: String,
    pub fields: &'a Fields,
    pub tags: &'a Tags,
}
