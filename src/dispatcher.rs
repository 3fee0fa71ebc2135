//! Dispatchers: strategies that run one subscriber for one event
//!
//! A [`Subscriber`] is one of three shapes: a shared handler instance, a
//! factory that builds a fresh handler per event, or a background [`Job`]
//! that only a [`Scheduler`] can run. Each dispatcher declares which shapes
//! it supports through [`Dispatcher::verify`]; the broker refuses to
//! register subscribers its dispatcher cannot run.

use crate::error::{EventStoreError, HandlerError, Result};
use crate::scheduler::Scheduler;
use crate::types::{Event, Record};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// An event handler called inline on the publishing task
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, event: &Event) -> std::result::Result<(), HandlerError>;

    /// Name used in logs and errors
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Background work run by a scheduler from the stored record
#[async_trait]
pub trait Job: Send + Sync {
    async fn perform(&self, record: Record) -> std::result::Result<(), HandlerError>;

    /// Name used in logs and errors
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Builds a fresh handler for every dispatch
pub type HandlerFactory =
    Arc<dyn Fn() -> std::result::Result<Box<dyn Handler>, HandlerError> + Send + Sync>;

struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&Event) -> std::result::Result<(), HandlerError> + Send + Sync,
{
    async fn call(&self, event: &Event) -> std::result::Result<(), HandlerError> {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Something that can be subscribed to events
#[derive(Clone)]
pub enum Subscriber {
    /// Shared handler instance
    Handler(Arc<dyn Handler>),
    /// Handler built anew for each event
    Factory(HandlerFactory),
    /// Record-level job, runnable only through a scheduler
    Job(Arc<dyn Job>),
}

impl Subscriber {
    pub fn handler(handler: impl Handler + 'static) -> Self {
        Subscriber::Handler(Arc::new(handler))
    }

    /// Wrap a synchronous closure as a named handler
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Event) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        Subscriber::Handler(Arc::new(FnHandler {
            name: name.into(),
            f,
        }))
    }

    pub fn factory<F, H>(build: F) -> Self
    where
        F: Fn() -> std::result::Result<H, HandlerError> + Send + Sync + 'static,
        H: Handler + 'static,
    {
        Subscriber::Factory(Arc::new(move || {
            build().map(|h| Box::new(h) as Box<dyn Handler>)
        }))
    }

    pub fn job(job: impl Job + 'static) -> Self {
        Subscriber::Job(Arc::new(job))
    }

    /// Name used in logs and errors
    pub fn name(&self) -> String {
        match self {
            Subscriber::Handler(h) => h.name().to_string(),
            Subscriber::Factory(_) => "factory".to_string(),
            Subscriber::Job(j) => j.name().to_string(),
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Subscriber::Handler(_) => "Handler",
            Subscriber::Factory(_) => "Factory",
            Subscriber::Job(_) => "Job",
        };
        f.debug_struct("Subscriber")
            .field("kind", &kind)
            .field("name", &self.name())
            .finish()
    }
}

fn handler_failed(subscriber: &Subscriber, event: &Event, source: HandlerError) -> EventStoreError {
    EventStoreError::Handler {
        subscriber: subscriber.name(),
        event_id: event.id().to_string(),
        source,
    }
}

/// Strategy for running a subscriber
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Run `subscriber` for one committed event
    async fn call(&self, subscriber: &Subscriber, event: &Event, record: &Record) -> Result<()>;

    /// Whether this dispatcher can run `subscriber`
    fn verify(&self, subscriber: &Subscriber) -> bool;
}

/// Calls handlers inline and waits for them
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncDispatcher;

#[async_trait]
impl Dispatcher for SyncDispatcher {
    async fn call(&self, subscriber: &Subscriber, event: &Event, _record: &Record) -> Result<()> {
        match subscriber {
            Subscriber::Handler(handler) => handler
                .call(event)
                .await
                .map_err(|e| handler_failed(subscriber, event, e)),
            Subscriber::Factory(build) => {
                let handler = build().map_err(|e| handler_failed(subscriber, event, e))?;
                handler
                    .call(event)
                    .await
                    .map_err(|e| handler_failed(subscriber, event, e))
            }
            Subscriber::Job(_) => Err(EventStoreError::InvalidHandler(format!(
                "{} can only run through a scheduler",
                subscriber.name()
            ))),
        }
    }

    fn verify(&self, subscriber: &Subscriber) -> bool {
        match subscriber {
            Subscriber::Handler(_) => true,
            Subscriber::Factory(build) => build().is_ok(),
            Subscriber::Job(_) => false,
        }
    }
}

/// Hands every subscriber to a scheduler
///
/// `call` returns once the scheduler has accepted the work, not when the
/// work completes.
#[derive(Debug, Clone)]
pub struct ImmediateAsyncDispatcher<S> {
    scheduler: S,
}

impl<S: Scheduler> ImmediateAsyncDispatcher<S> {
    pub fn new(scheduler: S) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl<S: Scheduler> Dispatcher for ImmediateAsyncDispatcher<S> {
    async fn call(&self, subscriber: &Subscriber, _event: &Event, record: &Record) -> Result<()> {
        self.scheduler.call(subscriber, record).await
    }

    fn verify(&self, subscriber: &Subscriber) -> bool {
        self.scheduler.verify(subscriber)
    }
}

/// Uses the scheduler for subscribers it claims, runs the rest inline
#[derive(Debug, Clone)]
pub struct AsyncDispatcher<S> {
    scheduler: S,
    fallback: SyncDispatcher,
}

impl<S: Scheduler> AsyncDispatcher<S> {
    pub fn new(scheduler: S) -> Self {
        Self {
            scheduler,
            fallback: SyncDispatcher,
        }
    }
}

#[async_trait]
impl<S: Scheduler> Dispatcher for AsyncDispatcher<S> {
    async fn call(&self, subscriber: &Subscriber, event: &Event, record: &Record) -> Result<()> {
        if self.scheduler.verify(subscriber) {
            self.scheduler.call(subscriber, record).await
        } else {
            self.fallback.call(subscriber, event, record).await
        }
    }

    fn verify(&self, subscriber: &Subscriber) -> bool {
        self.scheduler.verify(subscriber) || self.fallback.verify(subscriber)
    }
}

/// Tries dispatchers in order; the first that verifies a subscriber runs it
pub struct ComposedDispatcher {
    dispatchers: Vec<Box<dyn Dispatcher>>,
}

impl ComposedDispatcher {
    pub fn new(dispatchers: Vec<Box<dyn Dispatcher>>) -> Self {
        Self { dispatchers }
    }
}

#[async_trait]
impl Dispatcher for ComposedDispatcher {
    async fn call(&self, subscriber: &Subscriber, event: &Event, record: &Record) -> Result<()> {
        match self.dispatchers.iter().find(|d| d.verify(subscriber)) {
            Some(dispatcher) => dispatcher.call(subscriber, event, record).await,
            None => Err(EventStoreError::InvalidHandler(format!(
                "No dispatcher accepts {}",
                subscriber.name()
            ))),
        }
    }

    fn verify(&self, subscriber: &Subscriber) -> bool {
        self.dispatchers.iter().any(|d| d.verify(subscriber))
    }
}

/// Dispatcher wrapper that emits a `dispatcher.call` span per dispatch
#[derive(Debug, Clone, Default)]
pub struct InstrumentedDispatcher<D> {
    inner: D,
}

impl<D: Dispatcher> InstrumentedDispatcher<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<D: Dispatcher> Dispatcher for InstrumentedDispatcher<D> {
    async fn call(&self, subscriber: &Subscriber, event: &Event, record: &Record) -> Result<()> {
        let span = tracing::debug_span!(
            "dispatcher.call",
            subscriber = %subscriber.name(),
            event_id = %event.id(),
            event_type = %event.event_type()
        );
        async {
            let started = Instant::now();
            let result = self.inner.call(subscriber, event, record).await;
            let elapsed_us = started.elapsed().as_micros() as u64;
            match &result {
                Ok(()) => tracing::debug!(elapsed_us, "Dispatch completed"),
                Err(e) => tracing::debug!(elapsed_us, error = %e, "Dispatch failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    fn verify(&self, subscriber: &Subscriber) -> bool {
        self.inner.verify(subscriber)
    }
}
