//! # Optimizer Diagnostics
//!
//! Every decision point of the access path search (index considered, rows,
//! cost, chosen or rejected and why) is described by a nested
//! [`TraceRecord`]. The search assembles one record tree per table and hands
//! it to a [`TraceSink`] when it finishes.
//!
//! Diagnostics are purely observational: a sink error is logged and otherwise
//! ignored, it never changes the chosen plan.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// One named diagnostics record with scalar attributes and nested records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub values: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TraceRecord>,
}

impl TraceRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Map::new(),
            children: Vec::new(),
        }
    }

    /// Attach an attribute. Values that fail to serialize are recorded as null.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.values.insert(key.to_string(), value);
    }

    pub fn push(&mut self, child: TraceRecord) {
        self.children.push(child);
    }

    /// First direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&TraceRecord> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace sink is full ({0} records)")]
    Full(usize),

    #[error("failed to encode trace record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Receiver of diagnostics records.
pub trait TraceSink: Send {
    fn record(&mut self, record: &TraceRecord) -> Result<(), TraceError>;
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn record(&mut self, _record: &TraceRecord) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Collects records as JSON values.
#[derive(Debug, Default)]
pub struct JsonTraceSink {
    records: Vec<Value>,
    capacity: Option<usize>,
}

impl JsonTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that refuses records beyond `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            capacity: Some(capacity),
        }
    }

    pub fn records(&self) -> &[Value] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Value> {
        self.records
    }
}

impl TraceSink for JsonTraceSink {
    fn record(&mut self, record: &TraceRecord) -> Result<(), TraceError> {
        if let Some(cap) = self.capacity {
            if self.records.len() >= cap {
                return Err(TraceError::Full(cap));
            }
        }
        self.records.push(serde_json::to_value(record)?);
        Ok(())
    }
}

/// Deliver `record` to `sink`, logging instead of failing.
pub fn emit(sink: &mut dyn TraceSink, record: &TraceRecord) {
    if let Err(err) = sink.record(record) {
        warn!(error = %err, record = %record.name, "diagnostics sink rejected record");
    }
}
