//! Subscription registries
//!
//! Three registries are consulted on every lookup:
//!
//! - **global**: subscribers receiving every event, for the registry's lifetime
//! - **per-type**: subscribers keyed by event type, for the registry's lifetime
//! - **scoped**: a task-local mirror of both, visible only to the task
//!   running inside [`Subscriptions::scope`] and gone once the scope exits
//!
//! Lookups return matches in registration order.

use crate::dispatcher::Subscriber;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use uuid::Uuid;

/// Identifier of one registration
pub type SubscriptionId = Uuid;

/// Which events a subscriber receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// Every event
    AllEvents,
    /// Events of the listed types
    Types(Vec<String>),
}

impl Interest {
    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Interest::Types(types.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: SubscriptionId,
    seq: u64,
    subscriber: Subscriber,
}

#[derive(Debug, Clone, Default)]
struct Layer {
    global: Vec<Entry>,
    by_type: HashMap<String, Vec<Entry>>,
}

impl Layer {
    fn add(&mut self, entry: Entry, interest: &Interest) {
        match interest {
            Interest::AllEvents => self.global.push(entry),
            Interest::Types(types) => {
                for event_type in types {
                    self.by_type
                        .entry(event_type.clone())
                        .or_default()
                        .push(entry.clone());
                }
            }
        }
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.len();
        self.global.retain(|e| e.id != id);
        for entries in self.by_type.values_mut() {
            entries.retain(|e| e.id != id);
        }
        self.by_type.retain(|_, entries| !entries.is_empty());
        self.len() != before
    }

    fn len(&self) -> usize {
        self.global.len() + self.by_type.values().map(Vec::len).sum::<usize>()
    }

    fn collect_for(&self, event_type: &str, out: &mut Vec<Entry>) {
        if let Some(entries) = self.by_type.get(event_type) {
            out.extend(entries.iter().cloned());
        }
        out.extend(self.global.iter().cloned());
    }
}

tokio::task_local! {
    /// Scoped layers of every registry active on the current task
    static SCOPED: HashMap<Uuid, Layer>;
}

/// Handle returned by a registration
///
/// `unsubscribe` is idempotent and harmless after the registry is gone.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    registry: Weak<RwLock<Layer>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut layer = registry.write().unwrap_or_else(PoisonError::into_inner);
            if layer.remove(self.id) {
                tracing::debug!(subscription = %self.id, "Subscription removed");
            }
        }
    }
}

/// Registry of global, per-type and scoped subscribers
#[derive(Debug)]
pub struct Subscriptions {
    /// Keys this registry's scoped layer on each task
    id: Uuid,
    sequence: AtomicU64,
    registry: Arc<RwLock<Layer>>,
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscriptions {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: AtomicU64::new(0),
            registry: Arc::new(RwLock::new(Layer::default())),
        }
    }

    fn entry(&self, subscriber: Subscriber) -> Entry {
        Entry {
            id: Uuid::new_v4(),
            seq: self.sequence.fetch_add(1, Ordering::Relaxed),
            subscriber,
        }
    }

    /// Register for the listed event types
    pub fn add_subscription<I, S>(&self, subscriber: Subscriber, types: I) -> SubscriptionHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(subscriber, &Interest::types(types))
    }

    /// Register for every event
    pub fn add_global_subscription(&self, subscriber: Subscriber) -> SubscriptionHandle {
        self.add(subscriber, &Interest::AllEvents)
    }

    /// Register with an explicit interest
    pub fn add(&self, subscriber: Subscriber, interest: &Interest) -> SubscriptionHandle {
        let entry = self.entry(subscriber);
        let id = entry.id;

        tracing::debug!(
            subscription = %id,
            subscriber = %entry.subscriber.name(),
            interest = ?interest,
            "Subscription added"
        );

        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(entry, interest);

        SubscriptionHandle {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove a registration; returns false if the id is unknown
    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Every subscriber for `event_type` visible from the current task
    pub fn all_for(&self, event_type: &str) -> Vec<Subscriber> {
        let mut entries = Vec::new();
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .collect_for(event_type, &mut entries);

        // Outside any scope there is simply nothing to add
        let _ = SCOPED.try_with(|layers| {
            if let Some(layer) = layers.get(&self.id) {
                layer.collect_for(event_type, &mut entries);
            }
        });

        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.subscriber).collect()
    }

    /// Run `fut` with extra subscribers visible to the current task only
    ///
    /// The new layer starts from whatever scoped layer is active, so scopes
    /// nest. The previous layer is back in place as soon as `fut` finishes,
    /// fails, panics or is dropped.
    pub async fn scope<F>(&self, additions: Vec<(Subscriber, Interest)>, fut: F) -> F::Output
    where
        F: Future,
    {
        let mut layers = SCOPED.try_with(|layers| layers.clone()).unwrap_or_default();
        let layer = layers.entry(self.id).or_default();
        for (subscriber, interest) in additions {
            layer.add(self.entry(subscriber), &interest);
        }

        SCOPED.scope(layers, fut).await
    }
}
