//! High-level client built on a pluggable repository
//!
//! `Client` ties the pieces together: it fills in event metadata, maps
//! events to records, appends them through the [`Repository`] and then
//! notifies subscribers through its [`Broker`].

use crate::broker::Broker;
use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, Subscriber};
use crate::error::Result;
use crate::mapper::{JsonMapper, Mapper};
use crate::repository::{validate_page, ReadStart, Repository};
use crate::subscriptions::{Interest, SubscriptionHandle, SubscriptionId, Subscriptions};
use crate::types::{Event, Record, Stream, CORRELATION_ID, TIMESTAMP_PRECISION};
use crate::version::ExpectedVersion;
use chrono::SubsecRound;
use std::future::Future;
use std::sync::Arc;

type MetadataMap = serde_json::Map<String, serde_json::Value>;

tokio::task_local! {
    /// Request metadata active on the current task
    static REQUEST_METADATA: MetadataMap;
}

/// Event store client
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Client {
    repository: Arc<dyn Repository>,
    mapper: Arc<dyn Mapper>,
    broker: Broker,
    config: ClientConfig,
}

impl Client {
    /// Create a client over `repository` with the JSON mapper, a
    /// synchronous dispatcher and the process-wide default config
    pub fn new(repository: impl Repository + 'static) -> Self {
        Self {
            repository: Arc::new(repository),
            mapper: Arc::new(JsonMapper),
            broker: Broker::default(),
            config: ClientConfig::global(),
        }
    }

    pub fn with_mapper(mut self, mapper: impl Mapper + 'static) -> Self {
        self.mapper = Arc::new(mapper);
        self
    }

    /// Replace the broker, dropping existing subscriptions
    pub fn with_broker(mut self, broker: Broker) -> Self {
        self.broker = broker;
        self
    }

    /// Use `dispatcher` with a fresh subscription registry
    pub fn with_dispatcher(self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.with_broker(Broker::new(Subscriptions::new(), dispatcher))
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    // ─── Writes ─────────────────────────────────────────────────────

    /// Append events to `stream` and notify subscribers
    ///
    /// Subscribers are notified only after the append succeeds, one event at
    /// a time in input order. A subscriber error is returned as is and the
    /// remaining notifications are skipped; the events stay committed.
    pub async fn publish(
        &self,
        events: Vec<Event>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<Event>> {
        let (events, records) = self.prepare(events)?;
        self.repository
            .append_to_stream(records.clone(), stream, expected_version)
            .await?;

        tracing::debug!(stream = %stream, count = events.len(), "Events published");

        for (event, record) in events.iter().zip(&records) {
            self.broker.call(event, record).await?;
        }
        Ok(events)
    }

    /// Append events without notifying subscribers
    pub async fn append_to_stream(
        &self,
        events: Vec<Event>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<Event>> {
        let (events, records) = self.prepare(events)?;
        self.repository
            .append_to_stream(records, stream, expected_version)
            .await?;

        tracing::debug!(stream = %stream, count = events.len(), "Events appended");
        Ok(events)
    }

    /// Make already-stored events members of `stream`
    pub async fn link_to_stream<I, S>(
        &self,
        event_ids: I,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let event_ids: Vec<String> = event_ids.into_iter().map(Into::into).collect();
        self.repository
            .link_to_stream(&event_ids, stream, expected_version)
            .await?;

        tracing::debug!(stream = %stream, count = event_ids.len(), "Events linked");
        Ok(())
    }

    pub async fn delete_stream(&self, stream: &Stream) -> Result<()> {
        self.repository.delete_stream(stream).await?;
        tracing::debug!(stream = %stream, "Stream deleted");
        Ok(())
    }

    /// Fill in metadata and map each event to its record
    fn prepare(&self, events: Vec<Event>) -> Result<(Vec<Event>, Vec<Record>)> {
        let events: Vec<Event> = events.into_iter().map(|e| self.enrich(e)).collect();
        let records = events
            .iter()
            .map(|e| self.mapper.dump(e))
            .collect::<Result<Vec<_>>>()?;
        Ok((events, records))
    }

    /// Request metadata first, then config defaults; keys the event already
    /// carries always win
    fn enrich(&self, mut event: Event) -> Event {
        let request = REQUEST_METADATA
            .try_with(|metadata| metadata.clone())
            .unwrap_or_default();
        let defaults = self.config.process_metadata();

        let metadata = event.metadata_mut();
        for (key, value) in request.into_iter().chain(defaults) {
            metadata.insert_missing(key, value);
        }

        let timestamp = metadata
            .timestamp
            .unwrap_or_else(|| self.config.now())
            .trunc_subsecs(TIMESTAMP_PRECISION);
        metadata.timestamp = Some(timestamp);
        metadata.valid_at = Some(
            metadata
                .valid_at
                .map(|v| v.trunc_subsecs(TIMESTAMP_PRECISION))
                .unwrap_or(timestamp),
        );

        if self.config.assign_correlation_id {
            metadata.insert_missing(CORRELATION_ID, uuid::Uuid::new_v4().to_string().into());
        }
        event
    }

    /// Run `fut` with extra metadata applied to every event written from
    /// this task, by any client
    ///
    /// Nested calls merge over the enclosing metadata.
    pub async fn with_metadata<F>(&self, metadata: MetadataMap, fut: F) -> F::Output
    where
        F: Future,
    {
        let mut merged = REQUEST_METADATA
            .try_with(|current| current.clone())
            .unwrap_or_default();
        merged.extend(metadata);
        REQUEST_METADATA.scope(merged, fut).await
    }

    // ─── Reads ──────────────────────────────────────────────────────

    pub async fn read_event(&self, event_id: &str) -> Result<Event> {
        let record = self.repository.read_event(event_id).await?;
        self.mapper.load(&record)
    }

    pub async fn has_event(&self, event_id: &str) -> Result<bool> {
        self.repository.has_event(event_id).await
    }

    pub async fn read_events_forward(
        &self,
        stream: &Stream,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Event>> {
        validate_page(start, count)?;
        let records = self
            .repository
            .read_events_forward(stream, start, count)
            .await?;
        self.load(&records)
    }

    pub async fn read_events_backward(
        &self,
        stream: &Stream,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Event>> {
        validate_page(start, count)?;
        let records = self
            .repository
            .read_events_backward(stream, start, count)
            .await?;
        self.load(&records)
    }

    pub async fn read_all_streams_forward(
        &self,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Event>> {
        validate_page(start, count)?;
        let records = self
            .repository
            .read_all_streams_forward(start, count)
            .await?;
        self.load(&records)
    }

    pub async fn read_all_streams_backward(
        &self,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Event>> {
        validate_page(start, count)?;
        let records = self
            .repository
            .read_all_streams_backward(start, count)
            .await?;
        self.load(&records)
    }

    /// Every event in commit order, `batch_size` events per item
    ///
    /// Ends after the first short or empty page.
    pub fn read_all_streams_in_batches(
        &self,
        batch_size: usize,
    ) -> impl futures::Stream<Item = Result<Vec<Event>>> + '_ {
        futures::stream::try_unfold(Some(ReadStart::Head), move |start| {
            self.next_batch(start, batch_size)
        })
    }

    /// [`read_all_streams_in_batches`](Self::read_all_streams_in_batches)
    /// with the configured page size
    pub fn read_all_streams_paged(&self) -> impl futures::Stream<Item = Result<Vec<Event>>> + '_ {
        self.read_all_streams_in_batches(self.config.page_size)
    }

    async fn next_batch(
        &self,
        start: Option<ReadStart>,
        batch_size: usize,
    ) -> Result<Option<(Vec<Event>, Option<ReadStart>)>> {
        let Some(start) = start else {
            return Ok(None);
        };

        let batch = self.read_all_streams_forward(&start, batch_size).await?;
        if batch.is_empty() {
            return Ok(None);
        }

        let next = match batch.last() {
            Some(last) if batch.len() == batch_size => Some(ReadStart::after(last.id())),
            _ => None,
        };
        Ok(Some((batch, next)))
    }

    pub async fn get_all_streams(&self) -> Result<Vec<Stream>> {
        self.repository.get_all_streams().await
    }

    pub async fn streams_of(&self, event_id: &str) -> Result<Vec<Stream>> {
        self.repository.streams_of(event_id).await
    }

    pub async fn position_in_stream(&self, event_id: &str, stream: &Stream) -> Result<u64> {
        self.repository.position_in_stream(event_id, stream).await
    }

    pub async fn global_position(&self, event_id: &str) -> Result<u64> {
        self.repository.global_position(event_id).await
    }

    pub async fn last_stream_event(&self, stream: &Stream) -> Result<Option<Event>> {
        match self.repository.last_stream_event(stream).await? {
            Some(record) => self.mapper.load(&record).map(Some),
            None => Ok(None),
        }
    }

    fn load(&self, records: &[Record]) -> Result<Vec<Event>> {
        records.iter().map(|r| self.mapper.load(r)).collect()
    }

    // ─── Subscriptions ──────────────────────────────────────────────

    /// Subscribe to the listed event types
    pub fn subscribe<I, S>(&self, subscriber: Subscriber, to: I) -> Result<SubscriptionHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.broker.add_subscription(subscriber, to)
    }

    pub fn subscribe_to_all_events(&self, subscriber: Subscriber) -> Result<SubscriptionHandle> {
        self.broker.add_global_subscription(subscriber)
    }

    /// Remove a subscription; unknown ids fail with `SubscriberNotExist`
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.broker.remove_subscription(id)
    }

    /// Start a set of temporary subscriptions
    ///
    /// ```rust
    /// # use a3s_eventstore::{Client, Subscriber};
    /// # async fn example(client: Client) -> a3s_eventstore::Result<()> {
    /// client
    ///     .within()
    ///     .subscribe_to_all_events(Subscriber::from_fn("audit", |_| Ok(())))
    ///     .run(async {
    ///         // events published here also reach "audit"
    ///         Ok(())
    ///     })
    ///     .await
    /// # }
    /// ```
    pub fn within(&self) -> Within<'_> {
        Within {
            client: self,
            additions: Vec::new(),
        }
    }
}

/// Temporary subscriptions visible only while a future runs on the
/// current task
pub struct Within<'a> {
    client: &'a Client,
    additions: Vec<(Subscriber, Interest)>,
}

impl Within<'_> {
    pub fn subscribe<I, S>(mut self, subscriber: Subscriber, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additions.push((subscriber, Interest::types(to)));
        self
    }

    pub fn subscribe_to_all_events(mut self, subscriber: Subscriber) -> Self {
        self.additions.push((subscriber, Interest::AllEvents));
        self
    }

    /// Run `fut` with the subscriptions in place
    ///
    /// Fails with `InvalidHandler` before `fut` starts if the dispatcher
    /// cannot run one of the subscribers.
    pub async fn run<F, T>(self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.client.broker.within(self.additions, fut).await?
    }
}
