//! `EventKeep` - event-sourcing persistence core
//!
//! This crate defines the contract of an append-only, per-aggregate ordered
//! event log with optimistic concurrency and undelivered-event bookkeeping
//! ([`EventRepository`]), and builds two orchestration components on top of it:
//!
//! - [`EventStore`] replays an aggregate, runs a command against it and appends
//!   the resulting events, retrying from scratch on optimistic concurrency
//!   conflicts and short-circuiting duplicate command submissions.
//! - [`EventPubSub`] drains undelivered events into a typed [`PubSub`] fan-out
//!   and advances the per-aggregate delivery watermark, giving at-least-once
//!   delivery.
//!
//! Backends live in separate crates (`eventkeep-memory` provides the in-memory
//! compare-and-swap repository).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancellation;
pub mod collect;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod errors;
pub mod event;
pub mod hooks;
pub mod pubsub;
pub mod queue;
pub mod repository;
pub mod store;
pub mod types;

pub use cancellation::CancellationToken;
pub use collect::for_each_aggregating_errors;
pub use config::{EventStoreConfig, LiveLockLimit, OptimisticRetryLimit, RepositoryConfig};
pub use delivery::{DeliveryTrigger, EventPubSub};
pub use domain::{
    Aggregate, AggregateFactory, Command, CommandProcessor, CommandProcessorFactory, DomainError,
    DomainErrors, Outcome,
};
pub use errors::{
    AggregateError, BoxError, CommandFailed, DeliveryError, PublishError, QueueError,
    RepositoryError, RepositoryResult, StoreError, StoreResult,
};
pub use event::{AggregateUndeliveredEvents, SharedEvent, WrappedEvent, WrappedResult};
pub use hooks::{Hook, NoopHook, RepositoryCheckpoint, StoreCheckpoint};
pub use pubsub::{subscriber_fn, FnSubscriber, PubSub, Subscriber};
pub use queue::{wait_for_queue, work_item, BackgroundTaskQueue, QueuedWorker, TaskQueue, WorkItem};
pub use repository::EventRepository;
pub use store::EventStore;
pub use types::{AggregateId, AggregateKey, AggregateType, IdempotenceId, SequenceId};
