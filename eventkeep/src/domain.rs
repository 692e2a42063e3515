//! Domain-side contracts: aggregates, commands and their processors.
//!
//! The store is generic over a closed set of aggregate kinds. A typical domain
//! models its events and commands as enums and dispatches them with `match`
//! inside [`Aggregate::apply`] and [`CommandProcessor::process`].

use crate::errors::BoxError;
use crate::types::{AggregateType, IdempotenceId};
use nutype::nutype;
use std::sync::Arc;

/// A command submitted to the [`EventStore`](crate::EventStore).
pub trait Command: Send + Sync {
    /// Identity of this submission.
    ///
    /// Resubmitting a command with the same id is detected by the store and
    /// reported as a duplicate instead of being executed again.
    fn idempotence_id(&self) -> IdempotenceId;
}

/// In-memory state of one aggregate, rebuilt by folding its events.
pub trait Aggregate: Send {
    /// Events this aggregate is built from
    type Event;
    /// Read model handed to command processors
    type State;

    /// Current state.
    fn state(&self) -> &Self::State;

    /// Consumes the aggregate, yielding its state.
    fn into_state(self) -> Self::State;

    /// Folds one event into the state.
    fn apply(&mut self, event: &Self::Event);
}

/// Creates empty aggregates by type name.
pub trait AggregateFactory: Send + Sync {
    /// Aggregate produced by this factory
    type Aggregate: Aggregate;

    /// Fresh aggregate for `aggregate_type`, or `None` if the type is unknown.
    fn create(&self, aggregate_type: &AggregateType) -> Option<Self::Aggregate>;
}

/// Decides which events a command produces given the current state.
pub trait CommandProcessor: Send + Sync {
    /// Commands handled
    type Command;
    /// Events produced
    type Event;
    /// State commands are evaluated against
    type State;

    /// Evaluates `command` against `state`.
    ///
    /// Business rule violations are reported as [`Outcome::Failure`]; an `Err`
    /// means the processor itself failed and is wrapped into a command
    /// failure by the store.
    fn process(
        &self,
        command: &Self::Command,
        state: &Self::State,
    ) -> Result<Outcome<Self::Event>, BoxError>;
}

/// Creates command processors by aggregate type name.
pub trait CommandProcessorFactory: Send + Sync {
    /// Processor produced by this factory
    type Processor: CommandProcessor;

    /// Processor for `aggregate_type`, or `None` if the type is unknown.
    fn create(&self, aggregate_type: &AggregateType) -> Option<Self::Processor>;
}

/// A single reason a command was rejected.
#[derive(Debug, Clone)]
pub struct DomainError {
    /// Command property the error is about, if any
    pub property_name: Option<String>,
    /// Human readable message
    pub message: String,
    /// Underlying failure, when the error wraps one
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl DomainError {
    /// Error not tied to a particular property.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            property_name: None,
            message: message.into(),
            source: None,
        }
    }

    /// Error about one command property.
    pub fn for_property(property_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property_name: Some(property_name.into()),
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a processor failure.
    pub fn from_source(source: BoxError) -> Self {
        Self {
            property_name: None,
            message: source.to_string(),
            source: Some(Arc::from(source)),
        }
    }
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.property_name {
            Some(property) => write!(f, "{property}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DomainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}

/// Non-empty list of [`DomainError`]s.
#[nutype(
    validate(predicate = |errors| !errors.is_empty()),
    derive(Debug, Clone, AsRef, Deref)
)]
pub struct DomainErrors(Vec<DomainError>);

impl From<DomainError> for DomainErrors {
    fn from(error: DomainError) -> Self {
        // A one-element list always satisfies the non-empty predicate.
        Self::try_new(vec![error]).expect("single error list is non-empty")
    }
}

/// Result of evaluating a command.
#[derive(Debug, Clone)]
pub enum Outcome<E> {
    /// The command is accepted and produces these events (possibly none).
    Success(Vec<E>),
    /// The command is rejected.
    Failure(DomainErrors),
}

impl<E> Outcome<E> {
    /// Accepts the command with the given events.
    pub const fn success(events: Vec<E>) -> Self {
        Self::Success(events)
    }

    /// Rejects the command with a single error.
    pub fn failure(error: DomainError) -> Self {
        Self::Failure(DomainErrors::from(error))
    }

    /// Whether the command was accepted.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
