//! The event repository contract.
//!
//! A repository stores one append-only, strictly contiguous stream of events
//! per aggregate and remembers, per aggregate, up to which sequence id events
//! have been delivered downstream.
//!
//! # Guarantees
//!
//! - Sequence ids of one aggregate are exactly `1..=tail`, whatever the
//!   interleaving of concurrent appenders.
//! - An append is all or nothing; losing a race yields
//!   [`RepositoryError::OptimisticConcurrency`] and the repository never
//!   retries on the caller's behalf.
//! - Undelivered events may be over-reported for a while after a lost race,
//!   never under-reported.
//!
//! [`RepositoryError::OptimisticConcurrency`]: crate::RepositoryError::OptimisticConcurrency

use crate::errors::RepositoryResult;
use crate::event::{AggregateUndeliveredEvents, SharedEvent};
use crate::types::{AggregateId, AggregateType, SequenceId};
use async_trait::async_trait;

/// Pluggable storage backend for event streams.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Domain event payload stored by this repository
    type Event: Send + Sync + 'static;

    /// Appends a contiguous batch to the end of an aggregate stream.
    ///
    /// An empty batch is a no-op. The batch must start at the current tail
    /// plus one: a gap is an argument error, an already committed id is an
    /// optimistic concurrency conflict.
    async fn append_events(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &AggregateId,
        events: Vec<SharedEvent<Self::Event>>,
    ) -> RepositoryResult<()>;

    /// Events with a sequence id greater than `after_sequence_id`, ascending,
    /// at most `max_count` of them. Unknown aggregates have no events.
    async fn list_events(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &AggregateId,
        after_sequence_id: SequenceId,
        max_count: Option<usize>,
    ) -> RepositoryResult<Vec<SharedEvent<Self::Event>>>;

    /// Records that every event up to `delivered_sequence_id` was delivered.
    ///
    /// Idempotent and monotonic: a lower watermark than the recorded one is
    /// ignored. `0` is always accepted.
    async fn mark_events_as_delivered_cumulative(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &AggregateId,
        delivered_sequence_id: SequenceId,
    ) -> RepositoryResult<()>;

    /// Events past each aggregate's delivery watermark.
    ///
    /// `max_count` bounds the total number of events across aggregates and
    /// must be positive when given.
    async fn list_undelivered_events(
        &self,
        max_count: Option<usize>,
    ) -> RepositoryResult<Vec<AggregateUndeliveredEvents<Self::Event>>>;

    /// Ids of aggregates of one type in lexicographic order, starting
    /// strictly after `after_aggregate_id`.
    async fn list_aggregate_ids(
        &self,
        aggregate_type: &AggregateType,
        after_aggregate_id: Option<&AggregateId>,
        max_count: Option<usize>,
    ) -> RepositoryResult<Vec<AggregateId>>;
}
