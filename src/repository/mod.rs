//! Repository trait: the storage contract every event log adapter implements
//!
//! The in-memory implementation is the reference: any other adapter
//! (relational, embedded, ...) must behave exactly like it for every
//! operation below.

use crate::error::{EventStoreError, Result};
use crate::types::{Record, Stream};
use crate::version::ExpectedVersion;
use async_trait::async_trait;

pub mod instrumented;
pub mod memory;

pub use instrumented::InstrumentedRepository;
pub use memory::InMemoryRepository;

/// Where a paged read begins
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStart {
    /// From the beginning (forward) or the end (backward)
    Head,
    /// Exclusive cursor: the page starts right after this event id
    After(String),
}

impl ReadStart {
    /// Cursor after the given event id
    pub fn after(event_id: impl Into<String>) -> Self {
        ReadStart::After(event_id.into())
    }
}

/// Core trait for event log storage
///
/// Writes are all-or-nothing: on error the store is exactly as it was
/// before the call. Read failures are limited to unknown cursors/events.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Append records to `stream` and to the global stream
    ///
    /// Fails with `WrongExpectedEventVersion` when the stream's last
    /// position does not match, and with `EventDuplicatedInStream` when
    /// any event id is already stored (or repeated within the batch).
    async fn append_to_stream(
        &self,
        records: Vec<Record>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> Result<()>;

    /// Add already-stored events to `stream` without copying them
    ///
    /// Same checks as `append_to_stream`; unknown ids fail with
    /// `EventNotFound`.
    async fn link_to_stream(
        &self,
        event_ids: &[String],
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> Result<()>;

    /// Remove stream membership; records stay in the global stream
    ///
    /// Idempotent for named streams.
    async fn delete_stream(&self, stream: &Stream) -> Result<()>;

    async fn has_event(&self, event_id: &str) -> Result<bool>;

    async fn read_event(&self, event_id: &str) -> Result<Record>;

    async fn read_events_forward(
        &self,
        stream: &Stream,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Record>>;

    /// Read a stream in reverse commit order
    async fn read_events_backward(
        &self,
        stream: &Stream,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Record>>;

    async fn read_all_streams_forward(&self, start: &ReadStart, count: usize)
        -> Result<Vec<Record>>;

    async fn read_all_streams_backward(
        &self,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Record>>;

    /// The global stream followed by every named stream
    async fn get_all_streams(&self) -> Result<Vec<Stream>>;

    /// Named streams the event is a member of (through append or link)
    async fn streams_of(&self, event_id: &str) -> Result<Vec<Stream>>;

    /// Zero-based position of an event within a named stream
    async fn position_in_stream(&self, event_id: &str, stream: &Stream) -> Result<u64>;

    /// Zero-based position of an event in the global commit order
    async fn global_position(&self, event_id: &str) -> Result<u64>;

    /// The most recent record of a stream, if any
    ///
    /// Default implementation reads one record backward from the head.
    async fn last_stream_event(&self, stream: &Stream) -> Result<Option<Record>> {
        let mut records = self
            .read_events_backward(stream, &ReadStart::Head, 1)
            .await?;
        Ok(records.pop())
    }
}

/// Validate paging arguments before they reach a repository
pub(crate) fn validate_page(start: &ReadStart, count: usize) -> Result<()> {
    if count == 0 {
        return Err(EventStoreError::InvalidPageSize(count));
    }
    if let ReadStart::After(id) = start {
        if id.is_empty() {
            return Err(EventStoreError::InvalidPageStart(
                "Cursor event id cannot be empty".to_string(),
            ));
        }
    }
    Ok(())
}
