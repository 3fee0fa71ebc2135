//! Core value types: events, records and streams
//!
//! Events and metadata use camelCase JSON serialization.

use crate::error::{EventStoreError, Result};
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Digits of sub-second precision kept on stored timestamps (microseconds)
pub const TIMESTAMP_PRECISION: u16 = 6;

/// Name reported for the global stream
pub const GLOBAL_STREAM_NAME: &str = "$all";

/// The unpartitioned total order of all committed events
pub const GLOBAL_STREAM: Stream = Stream {
    kind: StreamKind::Global,
};

/// Metadata key holding the correlation id
pub const CORRELATION_ID: &str = "correlation_id";

/// Metadata key holding the causation id
pub const CAUSATION_ID: &str = "causation_id";

/// Event metadata: infrastructure context, not part of an event's identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Commit time, assigned at publish time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Business-effective time, defaults to `timestamp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_at: Option<DateTime<Utc>>,

    /// Free-form key-value entries (correlation ids, request context, ...)
    #[serde(flatten)]
    pub entries: serde_json::Map<String, serde_json::Value>,
}

impl Metadata {
    /// Look up a free-form entry
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    /// Insert an entry only if the key is not present yet
    ///
    /// Returns true when the value was inserted.
    pub fn insert_missing(&mut self, key: impl Into<String>, value: serde_json::Value) -> bool {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, value);
        true
    }
}

/// A domain event
///
/// Equality compares id, type and data only. Events are immutable once
/// constructed; the client fills in missing metadata exactly once when the
/// event is published or appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    id: String,
    event_type: String,
    data: serde_json::Value,
    #[serde(default)]
    metadata: Metadata,
}

impl Event {
    /// Create a new event with an auto-generated id
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), event_type, data)
    }

    /// Create an event with an explicit id
    pub fn with_id(
        id: impl Into<String>,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            data,
            metadata: Metadata::default(),
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.entries.insert(key.into(), value.into());
        self
    }

    /// Set the business-effective time
    pub fn valid_at(mut self, valid_at: DateTime<Utc>) -> Self {
        self.metadata.valid_at = Some(valid_at);
        self
    }

    /// Mark this event as caused by `other`
    ///
    /// Inherits the other event's correlation id (or its id when it has
    /// none) and records the other event's id as the causation id.
    pub fn correlate_with(mut self, other: &Event) -> Self {
        let correlation = other
            .correlation_id()
            .unwrap_or(other.id())
            .to_string();
        self.metadata
            .entries
            .insert(CORRELATION_ID.to_string(), correlation.into());
        self.metadata
            .entries
            .insert(CAUSATION_ID.to_string(), other.id.clone().into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_ID).and_then(|v| v.as_str())
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.metadata.get(CAUSATION_ID).and_then(|v| v.as_str())
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub(crate) fn from_parts(
        id: String,
        event_type: String,
        data: serde_json::Value,
        metadata: Metadata,
    ) -> Self {
        Self {
            id,
            event_type,
            data,
            metadata,
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.event_type == other.event_type && self.data == other.data
    }
}

/// Storage-normalized form of an event
///
/// The store itself only looks at `event_id` and `event_type`; data and
/// metadata stay opaque bytes produced by a [`Mapper`](crate::mapper::Mapper).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub event_id: String,
    pub event_type: String,
    pub data: Bytes,
    pub metadata: Bytes,

    /// Commit time
    pub timestamp: DateTime<Utc>,

    /// Business-effective time (may be backdated)
    pub valid_at: DateTime<Utc>,
}

impl Record {
    /// Create a record; `valid_at` falls back to `timestamp`
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        data: impl Into<Bytes>,
        metadata: impl Into<Bytes>,
        timestamp: DateTime<Utc>,
        valid_at: Option<DateTime<Utc>>,
    ) -> Self {
        let timestamp = timestamp.trunc_subsecs(TIMESTAMP_PRECISION);
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            data: data.into(),
            metadata: metadata.into(),
            timestamp,
            valid_at: valid_at
                .map(|v| v.trunc_subsecs(TIMESTAMP_PRECISION))
                .unwrap_or(timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StreamKind {
    Global,
    Named(String),
}

/// A named, ordered partition of the event log, or [`GLOBAL_STREAM`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stream {
    kind: StreamKind,
}

impl Stream {
    /// Create a named stream; empty or blank names are rejected
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EventStoreError::IncorrectStreamData(
                "Stream name cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            kind: StreamKind::Named(name),
        })
    }

    pub fn is_global(&self) -> bool {
        matches!(self.kind, StreamKind::Global)
    }

    /// Stream name; [`GLOBAL_STREAM_NAME`] for the global stream
    pub fn name(&self) -> &str {
        match &self.kind {
            StreamKind::Global => GLOBAL_STREAM_NAME,
            StreamKind::Named(name) => name,
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<&str> for Stream {
    type Error = EventStoreError;

    fn try_from(name: &str) -> Result<Self> {
        Stream::new(name)
    }
}
