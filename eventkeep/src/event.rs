//! Stored event envelope and the shapes returned by repository and store.

use crate::types::{AggregateId, AggregateKey, AggregateType, IdempotenceId, SequenceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A domain event together with its position in the aggregate stream.
///
/// Envelopes are created once when a command succeeds and are never mutated
/// afterwards; repositories hand out shared [`SharedEvent`] handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedEvent<E> {
    /// Kind of the owning aggregate
    pub aggregate_type: AggregateType,
    /// Id of the owning aggregate
    pub aggregate_id: AggregateId,
    /// 1-based position in the stream
    pub sequence_id: SequenceId,
    /// The domain payload
    pub domain_event: E,
    /// Idempotence id of the command that produced the event
    pub source_id: IdempotenceId,
}

impl<E> WrappedEvent<E> {
    /// Creates an envelope.
    pub const fn new(
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        sequence_id: SequenceId,
        domain_event: E,
        source_id: IdempotenceId,
    ) -> Self {
        Self {
            aggregate_type,
            aggregate_id,
            sequence_id,
            domain_event,
            source_id,
        }
    }

    /// Key of the owning stream.
    pub fn key(&self) -> AggregateKey {
        AggregateKey::new(self.aggregate_type.clone(), self.aggregate_id.clone())
    }

    /// Whether this event belongs to the given stream.
    pub fn belongs_to(&self, aggregate_type: &AggregateType, aggregate_id: &AggregateId) -> bool {
        &self.aggregate_type == aggregate_type && &self.aggregate_id == aggregate_id
    }
}

/// Immutable, cheaply clonable handle to a stored event.
pub type SharedEvent<E> = Arc<WrappedEvent<E>>;

/// Undelivered events of one aggregate, in stream order.
#[derive(Debug, Clone)]
pub struct AggregateUndeliveredEvents<E> {
    /// The aggregate the events belong to
    pub key: AggregateKey,
    /// Events after the delivery watermark
    pub events: Vec<SharedEvent<E>>,
}

impl<E> AggregateUndeliveredEvents<E> {
    /// Sequence id of the last listed event.
    pub fn last_sequence_id(&self) -> Option<SequenceId> {
        self.events.last().map(|event| event.sequence_id)
    }
}

/// Result of a processed command.
#[derive(Debug, Clone)]
pub struct WrappedResult<S, E> {
    /// Tail of the stream after the command
    pub last_sequence_id: SequenceId,
    /// Events appended by this call (empty for duplicates)
    pub new_events: Vec<SharedEvent<E>>,
    /// Aggregate state after the command
    pub state: S,
    /// The command had already been applied by an earlier submission
    pub idempotence_id_duplicate: bool,
}
