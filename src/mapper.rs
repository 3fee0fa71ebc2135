//! Mapper: converts domain events to storage records and back
//!
//! Repositories never look inside a record's data or metadata, so any
//! mapper works as long as it round-trips the event id and keeps
//! `record.event_type` equal to the type subscriptions are keyed by.

use crate::error::Result;
use crate::types::{Event, Metadata, Record};
use chrono::Utc;

/// Trait for event ⇄ record mappers
pub trait Mapper: Send + Sync {
    /// Build the record stored for an event
    fn dump(&self, event: &Event) -> Result<Record>;

    /// Rebuild an event from its stored record
    fn load(&self, record: &Record) -> Result<Event>;
}

/// JSON mapper using `serde_json`
///
/// Data and free-form metadata entries become JSON bytes; `timestamp` and
/// `valid_at` move to the record's own fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMapper;

impl Mapper for JsonMapper {
    fn dump(&self, event: &Event) -> Result<Record> {
        let metadata = event.metadata();
        let data = serde_json::to_vec(event.data())?;
        let entries = serde_json::to_vec(&metadata.entries)?;
        let timestamp = metadata.timestamp.unwrap_or_else(Utc::now);

        Ok(Record::new(
            event.id(),
            event.event_type(),
            data,
            entries,
            timestamp,
            metadata.valid_at,
        ))
    }

    fn load(&self, record: &Record) -> Result<Event> {
        let data: serde_json::Value = serde_json::from_slice(&record.data)?;
        let entries = if record.metadata.is_empty() {
            serde_json::Map::new()
        } else {
            serde_json::from_slice(&record.metadata)?
        };

        let metadata = Metadata {
            timestamp: Some(record.timestamp),
            valid_at: Some(record.valid_at),
            entries,
        };

        Ok(Event::from_parts(
            record.event_id.clone(),
            record.event_type.clone(),
            data,
            metadata,
        ))
    }
}
