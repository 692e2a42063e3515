//! Command processing on top of an [`EventRepository`].
//!
//! [`EventStore::process_command`] implements the optimistic command loop:
//!
//! ```text
//! Replay -> IdempotenceCheck -> Duplicate
//!                            -> Execute -> DomainFailure
//!                                       -> Append -> Conflict -> Replay
//!                                                 -> Success
//! ```
//!
//! Every attempt starts from a fresh replay, so a retried command always sees
//! the events that beat it in the race.

use crate::config::EventStoreConfig;
use crate::delivery::DeliveryTrigger;
use crate::domain::{
    Aggregate, AggregateFactory, Command, CommandProcessor, CommandProcessorFactory, DomainError,
    DomainErrors, Outcome,
};
use crate::errors::{CommandFailed, RepositoryError, StoreError, StoreResult};
use crate::event::{SharedEvent, WrappedEvent, WrappedResult};
use crate::hooks::{Hook, NoopHook, StoreCheckpoint};
use crate::repository::EventRepository;
use crate::types::{AggregateId, AggregateKey, AggregateType, SequenceId};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

type StateOf<A> = <<A as AggregateFactory>::Aggregate as Aggregate>::State;
type CommandOf<P> = <<P as CommandProcessorFactory>::Processor as CommandProcessor>::Command;

/// Replays aggregates and runs commands against them.
pub struct EventStore<R: ?Sized, A, P> {
    repository: Arc<R>,
    aggregates: A,
    processors: P,
    config: EventStoreConfig,
    hook: Arc<dyn Hook<StoreCheckpoint>>,
    delivery: Option<Arc<dyn DeliveryTrigger>>,
}

impl<R: ?Sized, A, P> EventStore<R, A, P> {
    /// Creates a store with the default configuration and no delivery trigger.
    pub fn new(repository: Arc<R>, aggregates: A, processors: P) -> Self {
        Self {
            repository,
            aggregates,
            processors,
            config: EventStoreConfig::default(),
            hook: Arc::new(NoopHook),
            delivery: None,
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EventStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs a checkpoint hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn Hook<StoreCheckpoint>>) -> Self {
        self.hook = hook;
        self
    }

    /// Schedules a delivery run after every successful command.
    #[must_use]
    pub fn with_delivery(mut self, trigger: Arc<dyn DeliveryTrigger>) -> Self {
        self.delivery = Some(trigger);
        self
    }

    /// The underlying repository.
    pub const fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Active configuration.
    pub const fn config(&self) -> &EventStoreConfig {
        &self.config
    }
}

/// Why a single attempt did not produce a result.
enum AttemptError<S> {
    Conflict(RepositoryError),
    Rejected {
        last_sequence_id: SequenceId,
        state: S,
        errors: DomainErrors,
    },
    Repository(RepositoryError),
    MissingAggregate(AggregateType),
    InvariantViolation(String),
}

impl<R, A, P> EventStore<R, A, P>
where
    R: EventRepository + ?Sized,
    A: AggregateFactory,
    A::Aggregate: Aggregate<Event = R::Event>,
    P: CommandProcessorFactory,
    P::Processor: CommandProcessor<Event = R::Event, State = StateOf<A>>,
    CommandOf<P>: Command,
{
    /// Runs `command` against the aggregate and appends the resulting events.
    ///
    /// A command whose idempotence id already appears on a stored event is not
    /// run again; the result reports it as a duplicate. Optimistic concurrency
    /// conflicts are retried from a fresh replay up to the configured limit.
    #[instrument(skip_all, fields(
        aggregate_type = %aggregate_type,
        aggregate_id = %aggregate_id,
        idempotence_id = %command.idempotence_id()
    ))]
    pub async fn process_command(
        &self,
        command: CommandOf<P>,
        aggregate_type: &AggregateType,
        aggregate_id: &AggregateId,
    ) -> StoreResult<WrappedResult<StateOf<A>, R::Event>, StateOf<A>, CommandOf<P>> {
        let key = AggregateKey::new(aggregate_type.clone(), aggregate_id.clone());
        let max_attempts = self.config.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&command, &key).await {
                Ok(result) => return Ok(result),
                Err(AttemptError::Conflict(conflict)) => {
                    self.hook.reached(StoreCheckpoint::Conflicted, &key).await;
                    if attempt >= max_attempts {
                        warn!(attempts = attempt, "Optimistic concurrency retries exhausted");
                        return Err(StoreError::Concurrency {
                            attempts: attempt,
                            source: conflict,
                        });
                    }
                    debug!(attempt, "Append conflicted, retrying with fresh state");
                }
                Err(AttemptError::Rejected {
                    last_sequence_id,
                    state,
                    errors,
                }) => {
                    debug!(last_sequence_id, "Command rejected");
                    return Err(StoreError::CommandFailed(Box::new(CommandFailed {
                        aggregate_type: key.aggregate_type,
                        aggregate_id: key.aggregate_id,
                        last_sequence_id,
                        state,
                        command,
                        errors,
                    })));
                }
                Err(AttemptError::Repository(error)) => return Err(StoreError::Repository(error)),
                Err(AttemptError::MissingAggregate(aggregate_type)) => {
                    return Err(StoreError::MissingAggregate(aggregate_type))
                }
                Err(AttemptError::InvariantViolation(message)) => {
                    return Err(StoreError::InvariantViolation(message))
                }
            }
        }
    }

    /// Rebuilds the aggregate from its full event stream.
    #[instrument(skip_all, fields(aggregate_type = %aggregate_type, aggregate_id = %aggregate_id))]
    pub async fn get_aggregate(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &AggregateId,
    ) -> StoreResult<A::Aggregate, StateOf<A>, CommandOf<P>> {
        let (aggregate, _) = self
            .replay(aggregate_type, aggregate_id)
            .await
            .map_err(|error| match error {
                AttemptError::MissingAggregate(aggregate_type) => {
                    StoreError::MissingAggregate(aggregate_type)
                }
                AttemptError::Repository(error) | AttemptError::Conflict(error) => {
                    StoreError::Repository(error)
                }
                AttemptError::InvariantViolation(message) => StoreError::InvariantViolation(message),
                AttemptError::Rejected { .. } => {
                    StoreError::InvariantViolation("replay cannot reject a command".to_string())
                }
            })?;
        Ok(aggregate)
    }

    async fn replay(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &AggregateId,
    ) -> Result<(A::Aggregate, Vec<SharedEvent<R::Event>>), AttemptError<StateOf<A>>> {
        let mut aggregate = self
            .aggregates
            .create(aggregate_type)
            .ok_or_else(|| AttemptError::MissingAggregate(aggregate_type.clone()))?;
        let events = self
            .repository
            .list_events(aggregate_type, aggregate_id, 0, None)
            .await
            .map_err(AttemptError::Repository)?;
        for event in &events {
            aggregate.apply(&event.domain_event);
        }
        Ok((aggregate, events))
    }

    async fn attempt(
        &self,
        command: &CommandOf<P>,
        key: &AggregateKey,
    ) -> Result<WrappedResult<StateOf<A>, R::Event>, AttemptError<StateOf<A>>> {
        let (mut aggregate, events) = self.replay(&key.aggregate_type, &key.aggregate_id).await?;
        let last_sequence_id = events.last().map_or(0, |event| event.sequence_id);

        let idempotence_id = command.idempotence_id();
        if events.iter().any(|event| event.source_id == idempotence_id) {
            debug!(last_sequence_id, "Command already applied, skipping");
            return Ok(WrappedResult {
                last_sequence_id,
                new_events: Vec::new(),
                state: aggregate.into_state(),
                idempotence_id_duplicate: true,
            });
        }

        let processor = self.processors.create(&key.aggregate_type).ok_or_else(|| {
            AttemptError::InvariantViolation(format!(
                "no command processor registered for aggregate type '{}'",
                key.aggregate_type
            ))
        })?;

        let outcome = match processor.process(command, aggregate.state()) {
            Ok(outcome) => outcome,
            Err(source) => Outcome::failure(DomainError::from_source(source)),
        };
        let domain_events = match outcome {
            Outcome::Success(domain_events) => domain_events,
            Outcome::Failure(errors) => {
                return Err(AttemptError::Rejected {
                    last_sequence_id,
                    state: aggregate.into_state(),
                    errors,
                })
            }
        };

        let new_events: Vec<SharedEvent<R::Event>> = (last_sequence_id + 1..)
            .zip(domain_events)
            .map(|(sequence_id, domain_event)| {
                Arc::new(WrappedEvent::new(
                    key.aggregate_type.clone(),
                    key.aggregate_id.clone(),
                    sequence_id,
                    domain_event,
                    idempotence_id,
                ))
            })
            .collect();
        for event in &new_events {
            aggregate.apply(&event.domain_event);
        }
        let new_last_sequence_id = new_events
            .last()
            .map_or(last_sequence_id, |event| event.sequence_id);

        self.hook.reached(StoreCheckpoint::Prepared, key).await;
        match self
            .repository
            .append_events(&key.aggregate_type, &key.aggregate_id, new_events.clone())
            .await
        {
            Ok(()) => {}
            Err(conflict) if conflict.is_transient() => return Err(AttemptError::Conflict(conflict)),
            Err(error) => return Err(AttemptError::Repository(error)),
        }
        self.hook.reached(StoreCheckpoint::Appended, key).await;

        if !new_events.is_empty() {
            self.schedule_delivery().await;
        }
        self.hook.reached(StoreCheckpoint::Published, key).await;

        Ok(WrappedResult {
            last_sequence_id: new_last_sequence_id,
            new_events,
            state: aggregate.into_state(),
            idempotence_id_duplicate: false,
        })
    }

    async fn schedule_delivery(&self) {
        if let Some(delivery) = &self.delivery {
            if let Err(error) = delivery.schedule_delivery().await {
                warn!(%error, "Failed to schedule event delivery");
            }
        }
    }
}

impl<R: ?Sized, A, P> std::fmt::Debug for EventStore<R, A, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("config", &self.config)
            .field("delivery", &self.delivery.is_some())
            .finish_non_exhaustive()
    }
}
