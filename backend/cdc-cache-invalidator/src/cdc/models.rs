use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// CDC operation types from Debezium
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum CdcOperation {
    /// Insert operation (c = create)
    #[serde(rename = "c")]
    Create,
    /// Update operation (u = update)
    #[serde(rename = "u")]
    Update,
    /// Delete operation (d = delete)
    #[serde(rename = "d")]
    Delete,
    /// Read operation (r = read, initial snapshot)
    #[serde(rename = "r")]
    Read,
    /// Table truncation (t = truncate), carries no row images
    #[serde(rename = "t")]
    Truncate,
    /// Missing or unrecognised code; the row images still decide invalidation
    #[default]
    #[serde(other)]
    Unknown,
}

impl CdcOperation {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Create => "c",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Read => "r",
            Self::Truncate => "t",
            Self::Unknown => "?",
        }
    }
}

/// Projection of a changed row. Only the identifying column matters to
/// invalidation; the remaining columns ride along for logging.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowSnapshot(Map<String, Value>);

impl RowSnapshot {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Stringified value of the identifying column.
    ///
    /// Strings are taken verbatim, numbers and booleans via their JSON text.
    /// Null, nested values and empty strings yield `None`.
    pub fn identity(&self, column: &str) -> Option<String> {
        match self.0.get(column)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for RowSnapshot {
    fn from(columns: Map<String, Value>) -> Self {
        Self(columns)
    }
}

/// Debezium `source` block. Diagnostics only; ordering comes from the broker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceMetadata {
    #[serde(default)]
    pub version: Option<String>,
    /// Connector type (e.g., "postgresql")
    #[serde(default)]
    pub connector: Option<String>,
    /// Logical name of the database server
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ts_ms: Option<i64>,
    #[serde(default)]
    pub ts_us: Option<i64>,
    #[serde(default)]
    pub ts_ns: Option<i64>,
    /// "true", "false", "last" or a boolean depending on connector version
    #[serde(default)]
    pub snapshot: Option<Value>,
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default, rename = "txId")]
    pub tx_id: Option<i64>,
    #[serde(default)]
    pub lsn: Option<i64>,
    #[serde(default)]
    pub sequence: Option<Value>,
    #[serde(default)]
    pub xmin: Option<Value>,
}

/// One decoded change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    /// Row before the change (absent for inserts and snapshot reads)
    #[serde(default)]
    pub before: Option<RowSnapshot>,
    /// Row after the change (absent for deletes)
    #[serde(default)]
    pub after: Option<RowSnapshot>,
    #[serde(default)]
    pub op: CdcOperation,
    #[serde(default)]
    pub source: Option<SourceMetadata>,
    #[serde(default)]
    pub transaction: Option<Value>,
    #[serde(default)]
    pub ts_ms: Option<i64>,
    #[serde(default)]
    pub ts_us: Option<i64>,
    #[serde(default)]
    pub ts_ns: Option<i64>,
}

impl ChangeEnvelope {
    /// Authoritative event time: the envelope's own timestamps first, then the source's.
    pub fn source_timestamp(&self) -> Option<DateTime<Utc>> {
        if let Some(ms) = self.ts_ms {
            return DateTime::from_timestamp_millis(ms);
        }
        if let Some(us) = self.ts_us {
            return DateTime::from_timestamp_micros(us);
        }
        if let Some(ns) = self.ts_ns {
            return Some(DateTime::from_timestamp_nanos(ns));
        }
        self.source
            .as_ref()
            .and_then(|s| s.ts_ms)
            .and_then(DateTime::from_timestamp_millis)
    }

    /// `schema.table` when the source block names them
    pub fn table(&self) -> Option<String> {
        let source = self.source.as_ref()?;
        match (&source.schema, &source.table) {
            (Some(schema), Some(table)) => Some(format!("{}.{}", schema, table)),
            (None, Some(table)) => Some(table.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("invalid change envelope: {0}")]
    Envelope(#[source] serde_json::Error),
}

/// Result of decoding one record value
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Null or empty value: broker tombstone or heartbeat
    Tombstone,
    Event(ChangeEnvelope),
}

/// Decode a raw record value.
///
/// Accepts both the schema-wrapped form (`{"schema": .., "payload": {..}}`,
/// `value.converter.schemas.enable = true`) and the bare envelope.
pub fn decode(payload: Option<&[u8]>) -> Result<Decoded, DecodeError> {
    let bytes = match payload {
        Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => bytes,
        _ => return Ok(Decoded::Tombstone),
    };

    let value: Value = serde_json::from_slice(bytes).map_err(DecodeError::Json)?;

    let envelope = match value {
        Value::Null => return Ok(Decoded::Tombstone),
        Value::Object(mut object) if object.contains_key("payload") => {
            match object.remove("payload").unwrap_or(Value::Null) {
                Value::Null => return Ok(Decoded::Tombstone),
                payload => payload,
            }
        }
        other => other,
    };

    serde_json::from_value(envelope)
        .map(Decoded::Event)
        .map_err(DecodeError::Envelope)
}
