//! Records and their NDJSON encoding.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A schemaless document: one JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Look up a dotted path (`user.name`) through nested objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = Value;

    /// Only JSON objects are records; anything else is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

/// Converts records to and from NDJSON lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordSerde;

impl RecordSerde {
    /// Append `record` and a trailing newline to `buf`. Returns the bytes written.
    pub fn encode(&self, record: &Record, buf: &mut BytesMut) -> Result<usize, serde_json::Error> {
        let before = buf.len();
        serde_json::to_writer((&mut *buf).writer(), record)?;
        buf.put_u8(b'\n');
        Ok(buf.len() - before)
    }

    /// Decode one line (without its newline).
    pub fn decode(&self, line: &[u8]) -> Result<Record, serde_json::Error> {
        serde_json::from_slice(line)
    }
}
