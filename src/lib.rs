//! # a3s-eventstore
//!
//! Append-only event store with optimistic concurrency and in-process
//! event dispatch for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-eventstore` keeps every event in a single global log and in any
//! number of named streams. Writers guard their appends with an
//! [`ExpectedVersion`]; committed events are handed to subscribers through a
//! pluggable [`Dispatcher`]. Storage backends implement the [`Repository`]
//! trait; [`InMemoryRepository`] is the reference implementation.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_eventstore::{Client, Event, ExpectedVersion, InMemoryRepository, Stream, Subscriber};
//!
//! # async fn example() -> a3s_eventstore::Result<()> {
//! let client = Client::new(InMemoryRepository::new());
//!
//! client.subscribe(
//!     Subscriber::from_fn("shipping", |event| {
//!         println!("ship order {}", event.data()["order"]);
//!         Ok(())
//!     }),
//!     ["OrderPlaced"],
//! )?;
//!
//! let orders = Stream::new("orders-1")?;
//! client
//!     .publish(
//!         vec![Event::new("OrderPlaced", serde_json::json!({"order": 1}))],
//!         &orders,
//!         ExpectedVersion::NoStream,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Repository** trait: storage contract every event log adapter implements
//! - **Mapper**: converts events to storage records and back
//! - **Subscriptions**: global, per-type and task-scoped subscriber registries
//! - **Dispatcher**: runs a subscriber inline or hands it to a **Scheduler**
//! - **Broker**: resolves an event's subscribers and dispatches to them
//! - **Client**: publish, read and subscribe on top of all of the above

pub mod broker;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod mapper;
pub mod repository;
pub mod scheduler;
pub mod subscriptions;
pub mod types;
pub mod version;

// Re-export core types
pub use broker::Broker;
pub use client::{Client, Within};
pub use config::ClientConfig;
pub use dispatcher::{
    AsyncDispatcher, ComposedDispatcher, Dispatcher, Handler, ImmediateAsyncDispatcher,
    InstrumentedDispatcher, Job, Subscriber, SyncDispatcher,
};
pub use error::{EventStoreError, HandlerError, Result};
pub use mapper::{JsonMapper, Mapper};
pub use repository::{InMemoryRepository, InstrumentedRepository, ReadStart, Repository};
pub use scheduler::{Scheduler, TokioScheduler};
pub use subscriptions::{Interest, SubscriptionHandle, SubscriptionId, Subscriptions};
pub use types::{Event, Metadata, Record, Stream, GLOBAL_STREAM};
pub use version::ExpectedVersion;
