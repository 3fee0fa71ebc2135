//! Broker: resolves the subscribers of an event and drives dispatch

use crate::dispatcher::{Dispatcher, Subscriber, SyncDispatcher};
use crate::error::{EventStoreError, Result};
use crate::subscriptions::{Interest, SubscriptionHandle, SubscriptionId, Subscriptions};
use crate::types::{Event, Record};
use std::future::Future;
use std::sync::Arc;

/// Pairs a subscription registry with the dispatcher that runs its entries
///
/// Subscribers are verified against the dispatcher when they register, so
/// a subscriber the dispatcher cannot run never reaches dispatch.
pub struct Broker {
    subscriptions: Subscriptions,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(Subscriptions::new(), SyncDispatcher)
    }
}

impl Broker {
    pub fn new(subscriptions: Subscriptions, dispatcher: impl Dispatcher + 'static) -> Self {
        Self {
            subscriptions,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Dispatch one committed event to every matching subscriber
    ///
    /// Subscribers run one after another in registration order. The first
    /// failure is returned and the remaining subscribers are skipped.
    pub async fn call(&self, event: &Event, record: &Record) -> Result<()> {
        let subscribers = self.subscriptions.all_for(event.event_type());
        tracing::debug!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            subscribers = subscribers.len(),
            "Dispatching event"
        );

        for subscriber in &subscribers {
            self.dispatcher.call(subscriber, event, record).await?;
        }
        Ok(())
    }

    /// Register for the listed event types
    pub fn add_subscription<I, S>(&self, subscriber: Subscriber, types: I) -> Result<SubscriptionHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let interest = Interest::types(types);
        self.verify(&subscriber)?;
        verify_interest(&subscriber, &interest)?;
        Ok(self.subscriptions.add(subscriber, &interest))
    }

    /// Register for every event
    pub fn add_global_subscription(&self, subscriber: Subscriber) -> Result<SubscriptionHandle> {
        self.verify(&subscriber)?;
        Ok(self.subscriptions.add_global_subscription(subscriber))
    }

    /// Remove a registration by id
    pub fn remove_subscription(&self, id: SubscriptionId) -> Result<()> {
        if self.subscriptions.remove(id) {
            Ok(())
        } else {
            Err(EventStoreError::SubscriberNotExist(id.to_string()))
        }
    }

    /// Run `fut` with temporary subscribers visible to the current task
    ///
    /// Every addition is verified before `fut` starts.
    pub async fn within<F>(&self, additions: Vec<(Subscriber, Interest)>, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        for (subscriber, interest) in &additions {
            self.verify(subscriber)?;
            verify_interest(subscriber, interest)?;
        }
        Ok(self.subscriptions.scope(additions, fut).await)
    }

    /// Every subscriber for `event_type` visible from the current task
    pub fn subscribers_for(&self, event_type: &str) -> Vec<Subscriber> {
        self.subscriptions.all_for(event_type)
    }

    fn verify(&self, subscriber: &Subscriber) -> Result<()> {
        if self.dispatcher.verify(subscriber) {
            Ok(())
        } else {
            Err(EventStoreError::InvalidHandler(format!(
                "{} cannot be run by the configured dispatcher",
                subscriber.name()
            )))
        }
    }
}

/// A type subscription must name at least one event type
fn verify_interest(subscriber: &Subscriber, interest: &Interest) -> Result<()> {
    match interest {
        Interest::Types(types) if types.is_empty() => Err(EventStoreError::InvalidHandler(
            format!("{} is subscribed to no event types", subscriber.name()),
        )),
        _ => Ok(()),
    }
}
