//! A small coinjoin-style round used as the test domain.
//!
//! A round is started with a minimum input amount, collects inputs, moves to
//! signing and ends either succeeded or failed.

use eventkeep::{
    Aggregate, AggregateFactory, AggregateType, BoxError, Command, CommandProcessor,
    CommandProcessorFactory, DomainError, IdempotenceId, Outcome,
};
use thiserror::Error;
use uuid::Uuid;

/// Name under which the round aggregate is registered.
pub const ROUND_AGGREGATE: &str = "TestRoundAggregate";

/// The round aggregate type.
pub fn round_type() -> AggregateType {
    AggregateType::try_new(ROUND_AGGREGATE).expect("round aggregate type is a valid name")
}

/// Events of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEvent {
    /// The round accepts inputs from now on
    RoundStarted {
        /// Smallest acceptable input
        min_input_sats: u64,
    },
    /// An input joined the round
    InputRegistered {
        /// Input identifier
        input_id: String,
        /// Input amount
        sats: u64,
    },
    /// An input left the round
    InputUnregistered {
        /// Input identifier
        input_id: String,
    },
    /// Inputs are frozen and signatures collected
    SigningStarted,
    /// The round transaction was broadcast
    RoundSucceeded {
        /// Transaction id
        tx_id: String,
    },
    /// The round was abandoned
    RoundFailed {
        /// Why the round failed
        reason: String,
    },
}

/// Phase of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundStatus {
    /// Not started
    #[default]
    New,
    /// Accepting inputs
    Started,
    /// Collecting signatures
    Signing,
    /// Finished successfully
    Succeeded,
    /// Finished unsuccessfully
    Failed,
}

/// One registered input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundInput {
    /// Input identifier
    pub input_id: String,
    /// Input amount
    pub sats: u64,
}

/// State of a round.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoundState {
    /// Smallest acceptable input
    pub min_input_sats: u64,
    /// Current phase
    pub status: RoundStatus,
    /// Registered inputs in registration order
    pub inputs: Vec<RoundInput>,
    /// Transaction id once succeeded
    pub tx_id: Option<String>,
    /// Failure reason once failed
    pub failure_reason: Option<String>,
}

/// Commands accepted by a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundCommand {
    /// Start accepting inputs
    StartRound {
        /// Smallest acceptable input
        min_input_sats: u64,
        /// Submission id
        idempotence_id: IdempotenceId,
    },
    /// Add an input
    RegisterInput {
        /// Input identifier
        input_id: String,
        /// Input amount
        sats: u64,
        /// Submission id
        idempotence_id: IdempotenceId,
    },
    /// Remove an input
    UnregisterInput {
        /// Input identifier
        input_id: String,
        /// Submission id
        idempotence_id: IdempotenceId,
    },
    /// Freeze inputs
    StartSigning {
        /// Submission id
        idempotence_id: IdempotenceId,
    },
    /// Mark the round succeeded
    SetSucceeded {
        /// Transaction id
        tx_id: String,
        /// Submission id
        idempotence_id: IdempotenceId,
    },
    /// Abandon the round
    SetFailed {
        /// Failure reason
        reason: String,
        /// Submission id
        idempotence_id: IdempotenceId,
    },
    /// Makes the processor itself fail
    Explode {
        /// Submission id
        idempotence_id: IdempotenceId,
    },
}

impl RoundCommand {
    /// `StartRound` with a fresh idempotence id.
    pub fn start_round(min_input_sats: u64) -> Self {
        Self::StartRound {
            min_input_sats,
            idempotence_id: Uuid::now_v7(),
        }
    }

    /// `RegisterInput` with a fresh idempotence id.
    pub fn register_input(input_id: impl Into<String>, sats: u64) -> Self {
        Self::RegisterInput {
            input_id: input_id.into(),
            sats,
            idempotence_id: Uuid::now_v7(),
        }
    }

    /// `UnregisterInput` with a fresh idempotence id.
    pub fn unregister_input(input_id: impl Into<String>) -> Self {
        Self::UnregisterInput {
            input_id: input_id.into(),
            idempotence_id: Uuid::now_v7(),
        }
    }

    /// `StartSigning` with a fresh idempotence id.
    pub fn start_signing() -> Self {
        Self::StartSigning {
            idempotence_id: Uuid::now_v7(),
        }
    }

    /// `SetSucceeded` with a fresh idempotence id.
    pub fn set_succeeded(tx_id: impl Into<String>) -> Self {
        Self::SetSucceeded {
            tx_id: tx_id.into(),
            idempotence_id: Uuid::now_v7(),
        }
    }

    /// `SetFailed` with a fresh idempotence id.
    pub fn set_failed(reason: impl Into<String>) -> Self {
        Self::SetFailed {
            reason: reason.into(),
            idempotence_id: Uuid::now_v7(),
        }
    }

    /// `Explode` with a fresh idempotence id.
    pub fn explode() -> Self {
        Self::Explode {
            idempotence_id: Uuid::now_v7(),
        }
    }
}

impl Command for RoundCommand {
    fn idempotence_id(&self) -> IdempotenceId {
        match self {
            Self::StartRound { idempotence_id, .. }
            | Self::RegisterInput { idempotence_id, .. }
            | Self::UnregisterInput { idempotence_id, .. }
            | Self::StartSigning { idempotence_id }
            | Self::SetSucceeded { idempotence_id, .. }
            | Self::SetFailed { idempotence_id, .. }
            | Self::Explode { idempotence_id } => *idempotence_id,
        }
    }
}

/// The round aggregate.
#[derive(Debug, Clone, Default)]
pub struct RoundAggregate {
    state: RoundState,
}

impl Aggregate for RoundAggregate {
    type Event = RoundEvent;
    type State = RoundState;

    fn state(&self) -> &RoundState {
        &self.state
    }

    fn into_state(self) -> RoundState {
        self.state
    }

    fn apply(&mut self, event: &RoundEvent) {
        let state = &mut self.state;
        match event {
            RoundEvent::RoundStarted { min_input_sats } => {
                state.min_input_sats = *min_input_sats;
                state.status = RoundStatus::Started;
            }
            RoundEvent::InputRegistered { input_id, sats } => state.inputs.push(RoundInput {
                input_id: input_id.clone(),
                sats: *sats,
            }),
            RoundEvent::InputUnregistered { input_id } => {
                state.inputs.retain(|input| &input.input_id != input_id);
            }
            RoundEvent::SigningStarted => state.status = RoundStatus::Signing,
            RoundEvent::RoundSucceeded { tx_id } => {
                state.tx_id = Some(tx_id.clone());
                state.status = RoundStatus::Succeeded;
            }
            RoundEvent::RoundFailed { reason } => {
                state.failure_reason = Some(reason.clone());
                state.status = RoundStatus::Failed;
            }
        }
    }
}

/// Failure of the round processor itself.
#[derive(Debug, Error)]
pub enum RoundProcessorError {
    /// Raised by [`RoundCommand::Explode`]
    #[error("round processor exploded")]
    Exploded,
}

/// Business rules of a round.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundCommandProcessor;

impl RoundCommandProcessor {
    fn require_status(state: &RoundState, status: RoundStatus) -> Result<(), DomainError> {
        if state.status == status {
            Ok(())
        } else {
            Err(DomainError::for_property(
                "Status",
                format!("Round is {:?}, expected {status:?}", state.status),
            ))
        }
    }
}

impl CommandProcessor for RoundCommandProcessor {
    type Command = RoundCommand;
    type Event = RoundEvent;
    type State = RoundState;

    fn process(
        &self,
        command: &RoundCommand,
        state: &RoundState,
    ) -> Result<Outcome<RoundEvent>, BoxError> {
        let events = match command {
            RoundCommand::StartRound { min_input_sats, .. } => {
                Self::require_status(state, RoundStatus::New).map(|()| {
                    vec![RoundEvent::RoundStarted {
                        min_input_sats: *min_input_sats,
                    }]
                })
            }
            RoundCommand::RegisterInput { input_id, sats, .. } => {
                Self::require_status(state, RoundStatus::Started).and_then(|()| {
                    if *sats < state.min_input_sats {
                        Err(DomainError::for_property(
                            "Sats",
                            format!("Input amount {sats} is below minimum {}", state.min_input_sats),
                        ))
                    } else if state.inputs.iter().any(|input| &input.input_id == input_id) {
                        Err(DomainError::for_property("InputId", "Input is already registered"))
                    } else {
                        Ok(vec![RoundEvent::InputRegistered {
                            input_id: input_id.clone(),
                            sats: *sats,
                        }])
                    }
                })
            }
            RoundCommand::UnregisterInput { input_id, .. } => {
                Self::require_status(state, RoundStatus::Started).and_then(|()| {
                    if state.inputs.iter().any(|input| &input.input_id == input_id) {
                        Ok(vec![RoundEvent::InputUnregistered {
                            input_id: input_id.clone(),
                        }])
                    } else {
                        Err(DomainError::for_property("InputId", "Input is not registered"))
                    }
                })
            }
            RoundCommand::StartSigning { .. } => {
                Self::require_status(state, RoundStatus::Started).and_then(|()| {
                    if state.inputs.is_empty() {
                        Err(DomainError::for_property("Inputs", "Round has no inputs"))
                    } else {
                        Ok(vec![RoundEvent::SigningStarted])
                    }
                })
            }
            RoundCommand::SetSucceeded { tx_id, .. } => {
                Self::require_status(state, RoundStatus::Signing).map(|()| {
                    vec![RoundEvent::RoundSucceeded {
                        tx_id: tx_id.clone(),
                    }]
                })
            }
            RoundCommand::SetFailed { reason, .. } => match state.status {
                RoundStatus::Succeeded | RoundStatus::Failed => Err(DomainError::for_property(
                    "Status",
                    "Round has already ended",
                )),
                _ => Ok(vec![RoundEvent::RoundFailed {
                    reason: reason.clone(),
                }]),
            },
            RoundCommand::Explode { .. } => return Err(RoundProcessorError::Exploded.into()),
        };

        Ok(match events {
            Ok(events) => Outcome::success(events),
            Err(error) => Outcome::failure(error),
        })
    }
}

/// Creates [`RoundAggregate`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundAggregateFactory;

impl AggregateFactory for RoundAggregateFactory {
    type Aggregate = RoundAggregate;

    fn create(&self, aggregate_type: &AggregateType) -> Option<RoundAggregate> {
        (aggregate_type.as_ref() == ROUND_AGGREGATE).then(RoundAggregate::default)
    }
}

/// Creates [`RoundCommandProcessor`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundCommandProcessorFactory;

impl CommandProcessorFactory for RoundCommandProcessorFactory {
    type Processor = RoundCommandProcessor;

    fn create(&self, aggregate_type: &AggregateType) -> Option<RoundCommandProcessor> {
        (aggregate_type.as_ref() == ROUND_AGGREGATE).then_some(RoundCommandProcessor)
    }
}
