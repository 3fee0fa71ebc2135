//! Scheduler: deferred execution of subscriber work
//!
//! A scheduler decides which subscribers it can run asynchronously and
//! accepts `(subscriber, record)` pairs for later execution. Durability and
//! retries are the scheduler's own business; the dispatch layer only hands
//! work off.

use crate::dispatcher::Subscriber;
use crate::error::{EventStoreError, Result};
use crate::types::Record;
use async_trait::async_trait;
use tokio::runtime::Handle;

/// Trait for async-capable executors
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Accept work for `subscriber`; returns once the work is handed off
    async fn call(&self, subscriber: &Subscriber, record: &Record) -> Result<()>;

    /// Whether `subscriber` should run through this scheduler
    fn verify(&self, subscriber: &Subscriber) -> bool;
}

/// Runs [`Job`](crate::dispatcher::Job) subscribers as tokio tasks
///
/// Failures are logged, not retried.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Create a scheduler spawning onto the given runtime
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create a scheduler for the runtime the caller is running on
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| EventStoreError::Scheduler(format!("No tokio runtime: {}", e)))
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn call(&self, subscriber: &Subscriber, record: &Record) -> Result<()> {
        let Subscriber::Job(job) = subscriber else {
            return Err(EventStoreError::Scheduler(format!(
                "{} is not a background job",
                subscriber.name()
            )));
        };

        let job = job.clone();
        let record = record.clone();
        let name = subscriber.name();
        let event_id = record.event_id.clone();

        tracing::debug!(job = %name, event_id = %event_id, "Job scheduled");
        self.handle.spawn(async move {
            if let Err(e) = job.perform(record).await {
                tracing::warn!(
                    job = %name,
                    event_id = %event_id,
                    error = %e,
                    "Background job failed"
                );
            }
        });

        Ok(())
    }

    fn verify(&self, subscriber: &Subscriber) -> bool {
        matches!(subscriber, Subscriber::Job(_))
    }
}
