//! Error types for `EventKeep`.
//!
//! Each subsystem gets its own error enum so that callers can tell the three
//! kinds of outcome apart:
//!
//! - **Transient**: [`RepositoryError::OptimisticConcurrency`] - another writer
//!   won the race, re-run the command against fresh state
//! - **Caller bugs**: [`RepositoryError::InvalidArgument`] - a sequence id or
//!   count the contract forbids
//! - **Internal bugs**: `InvariantViolation` variants - should never happen
//!
//! Domain rejections are not errors of the store itself; they travel as
//! [`StoreError::CommandFailed`] carrying everything the caller needs to
//! report them.

use crate::domain::DomainErrors;
use crate::types::{AggregateId, AggregateKey, AggregateType, SequenceId};
use thiserror::Error;

/// Type-erased error used at the domain and subscriber boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by [`EventRepository`](crate::EventRepository) backends.
///
/// # Retry Strategy
///
/// Only [`OptimisticConcurrency`](Self::OptimisticConcurrency) is worth
/// retrying, and only by re-reading the aggregate first. The repository never
/// retries an append on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// Another append committed first, or the batch starts at an already
    /// committed sequence id.
    #[error("Conflict: optimistic concurrency check failed for aggregate {aggregate_type}/{aggregate_id}")]
    OptimisticConcurrency {
        /// Kind of the contended aggregate
        aggregate_type: AggregateType,
        /// Id of the contended aggregate
        aggregate_id: AggregateId,
    },

    /// An argument violates the repository contract.
    #[error("Invalid argument '{argument}': {message}")]
    InvalidArgument {
        /// Name of the offending argument
        argument: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// Internal state contradicts an invariant, or a compare-and-swap loop
    /// exceeded its live lock bound.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl RepositoryError {
    /// Builds an [`InvalidArgument`](Self::InvalidArgument) error.
    pub fn invalid_argument(argument: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument,
            message: message.into(),
        }
    }

    /// Builds an [`OptimisticConcurrency`](Self::OptimisticConcurrency) error for a key.
    pub fn conflict(key: &AggregateKey) -> Self {
        Self::OptimisticConcurrency {
            aggregate_type: key.aggregate_type.clone(),
            aggregate_id: key.aggregate_id.clone(),
        }
    }

    /// Whether re-running the operation against fresh state may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::OptimisticConcurrency { .. })
    }
}

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A command rejected by its processor.
///
/// Carries the command itself and the state it was evaluated against so the
/// caller can report the failure without reloading anything.
#[derive(Debug)]
pub struct CommandFailed<S, C> {
    /// Kind of the target aggregate
    pub aggregate_type: AggregateType,
    /// Id of the target aggregate
    pub aggregate_id: AggregateId,
    /// Tail of the stream the command was evaluated against
    pub last_sequence_id: SequenceId,
    /// Aggregate state the command was evaluated against
    pub state: S,
    /// The rejected command
    pub command: C,
    /// Why the command was rejected
    pub errors: DomainErrors,
}

impl<S, C> std::fmt::Display for CommandFailed<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "command rejected by aggregate {}/{} at sequence id {}: ",
            self.aggregate_type, self.aggregate_id, self.last_sequence_id
        )?;
        let errors = self.errors.as_ref();
        for (index, error) in errors.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Errors returned by [`EventStore`](crate::EventStore).
#[derive(Debug, Error)]
pub enum StoreError<S, C> {
    /// The command processor rejected the command, or failed while
    /// processing it.
    #[error("{0}")]
    CommandFailed(Box<CommandFailed<S, C>>),

    /// Every attempt lost its optimistic concurrency race.
    #[error("Concurrency conflict persisted after {attempts} attempts")]
    Concurrency {
        /// Number of attempts made, the first one included
        attempts: u32,
        /// The last conflict observed
        #[source]
        source: RepositoryError,
    },

    /// A non-transient repository failure, propagated unchanged.
    #[error(transparent)]
    Repository(RepositoryError),

    /// No aggregate is registered for the requested type.
    #[error("No aggregate registered for type '{0}'")]
    MissingAggregate(AggregateType),

    /// Wiring or internal state contradicts an invariant.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl<S, C> StoreError<S, C> {
    /// The domain rejection, if this is one.
    pub fn as_command_failed(&self) -> Option<&CommandFailed<S, C>> {
        match self {
            Self::CommandFailed(failed) => Some(failed),
            _ => None,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T, S, C> = Result<T, StoreError<S, C>>;

/// Every subscriber failure raised while publishing one message.
#[derive(Debug, Error)]
#[error("{} subscriber(s) failed", .failures.len())]
pub struct PublishError {
    /// Failures in subscription order
    pub failures: Vec<BoxError>,
}

/// Outcome of running an operation over many items without stopping at the
/// first failure.
#[derive(Debug, Error)]
pub enum AggregateError<E> {
    /// Cancellation was requested before every item was processed.
    #[error("Operation cancelled")]
    Cancelled,

    /// At least one item failed; errors are kept in item order.
    #[error("{} operation(s) failed", .0.len())]
    Failed(Vec<E>),
}

impl<E> AggregateError<E> {
    /// Collapses a single failure into the error itself.
    ///
    /// Returns `Ok(error)` when exactly one item failed, and gives the
    /// aggregate back otherwise.
    pub fn into_single(self) -> Result<E, Self> {
        match self {
            Self::Failed(mut errors) if errors.len() == 1 => errors.pop().ok_or(Self::Failed(errors)),
            other => Err(other),
        }
    }
}

/// Errors raised while draining undelivered events.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The drain was cancelled; unconfirmed events will be redelivered.
    #[error("Delivery cancelled")]
    Cancelled,

    /// Listing or acknowledging events failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Some events of one aggregate could not be published; its watermark
    /// was left untouched.
    #[error("Publishing events of aggregate {key} failed for {} event(s)", .failures.len())]
    Publish {
        /// The aggregate whose events failed
        key: AggregateKey,
        /// One entry per failed event
        failures: Vec<PublishError>,
    },

    /// Delivery failed for several aggregates.
    #[error("Delivery failed for {} aggregate(s)", .0.len())]
    Aggregate(Vec<DeliveryError>),
}

/// Errors raised by the background task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue no longer accepts or yields work.
    #[error("Background task queue is closed")]
    Closed,

    /// Waiting on the queue was cancelled.
    #[error("Waiting on the background task queue was cancelled")]
    Cancelled,
}
