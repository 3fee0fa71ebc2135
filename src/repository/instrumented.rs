//! Tracing decorator for any [`Repository`]
//!
//! Every call runs inside a `repository.<operation>` span and logs its
//! elapsed time and outcome. Behavior is otherwise identical to the
//! wrapped repository.

use super::{ReadStart, Repository};
use crate::error::Result;
use crate::types::{Record, Stream};
use crate::version::ExpectedVersion;
use async_trait::async_trait;
use std::future::Future;
use std::time::Instant;
use tracing::Instrument;

/// Repository wrapper that emits tracing spans and timings
#[derive(Debug, Default)]
pub struct InstrumentedRepository<R> {
    inner: R,
}

impl<R: Repository> InstrumentedRepository<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// The wrapped repository
    pub fn inner(&self) -> &R {
        &self.inner
    }
}

async fn measure<T, F>(operation: &'static str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = call.await;
    let elapsed_us = started.elapsed().as_micros() as u64;
    match &result {
        Ok(_) => tracing::debug!(operation, elapsed_us, "Repository call completed"),
        Err(e) => tracing::debug!(operation, elapsed_us, error = %e, "Repository call failed"),
    }
    result
}

#[async_trait]
impl<R: Repository> Repository for InstrumentedRepository<R> {
    async fn append_to_stream(
        &self,
        records: Vec<Record>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> Result<()> {
        let span = tracing::debug_span!(
            "repository.append_to_stream",
            stream = %stream,
            count = records.len(),
            expected_version = %expected_version
        );
        measure(
            "append_to_stream",
            self.inner.append_to_stream(records, stream, expected_version),
        )
        .instrument(span)
        .await
    }

    async fn link_to_stream(
        &self,
        event_ids: &[String],
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> Result<()> {
        let span = tracing::debug_span!(
            "repository.link_to_stream",
            stream = %stream,
            count = event_ids.len(),
            expected_version = %expected_version
        );
        measure(
            "link_to_stream",
            self.inner.link_to_stream(event_ids, stream, expected_version),
        )
        .instrument(span)
        .await
    }

    async fn delete_stream(&self, stream: &Stream) -> Result<()> {
        let span = tracing::debug_span!("repository.delete_stream", stream = %stream);
        measure("delete_stream", self.inner.delete_stream(stream))
            .instrument(span)
            .await
    }

    async fn has_event(&self, event_id: &str) -> Result<bool> {
        let span = tracing::debug_span!("repository.has_event", event_id);
        measure("has_event", self.inner.has_event(event_id))
            .instrument(span)
            .await
    }

    async fn read_event(&self, event_id: &str) -> Result<Record> {
        let span = tracing::debug_span!("repository.read_event", event_id);
        measure("read_event", self.inner.read_event(event_id))
            .instrument(span)
            .await
    }

    async fn read_events_forward(
        &self,
        stream: &Stream,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Record>> {
        let span = tracing::debug_span!("repository.read_events_forward", stream = %stream, count);
        measure(
            "read_events_forward",
            self.inner.read_events_forward(stream, start, count),
        )
        .instrument(span)
        .await
    }

    async fn read_events_backward(
        &self,
        stream: &Stream,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Record>> {
        let span = tracing::debug_span!("repository.read_events_backward", stream = %stream, count);
        measure(
            "read_events_backward",
            self.inner.read_events_backward(stream, start, count),
        )
        .instrument(span)
        .await
    }

    async fn read_all_streams_forward(
        &self,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Record>> {
        let span = tracing::debug_span!("repository.read_all_streams_forward", count);
        measure(
            "read_all_streams_forward",
            self.inner.read_all_streams_forward(start, count),
        )
        .instrument(span)
        .await
    }

    async fn read_all_streams_backward(
        &self,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Record>> {
        let span = tracing::debug_span!("repository.read_all_streams_backward", count);
        measure(
            "read_all_streams_backward",
            self.inner.read_all_streams_backward(start, count),
        )
        .instrument(span)
        .await
    }

    async fn get_all_streams(&self) -> Result<Vec<Stream>> {
        let span = tracing::debug_span!("repository.get_all_streams");
        measure("get_all_streams", self.inner.get_all_streams())
            .instrument(span)
            .await
    }

    async fn streams_of(&self, event_id: &str) -> Result<Vec<Stream>> {
        let span = tracing::debug_span!("repository.streams_of", event_id);
        measure("streams_of", self.inner.streams_of(event_id))
            .instrument(span)
            .await
    }

    async fn position_in_stream(&self, event_id: &str, stream: &Stream) -> Result<u64> {
        let span = tracing::debug_span!("repository.position_in_stream", event_id, stream = %stream);
        measure(
            "position_in_stream",
            self.inner.position_in_stream(event_id, stream),
        )
        .instrument(span)
        .await
    }

    async fn global_position(&self, event_id: &str) -> Result<u64> {
        let span = tracing::debug_span!("repository.global_position", event_id);
        measure("global_position", self.inner.global_position(event_id))
            .instrument(span)
            .await
    }

    async fn last_stream_event(&self, stream: &Stream) -> Result<Option<Record>> {
        let span = tracing::debug_span!("repository.last_stream_event", stream = %stream);
        measure("last_stream_event", self.inner.last_stream_event(stream))
            .instrument(span)
            .await
    }
}
