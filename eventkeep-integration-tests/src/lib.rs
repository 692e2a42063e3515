//! Integration test support for `EventKeep`
//!
//! This crate wires the core crate to the in-memory repository and provides
//! what the tests under `tests/` share: a small round-based test domain, a
//! scripted checkpoint hook for forcing interleavings, and tracing setup.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod hooks;
pub mod round;

use std::sync::Arc;

use eventkeep::{EventStore, Hook, RepositoryCheckpoint, StoreCheckpoint};
use eventkeep_memory::InMemoryEventRepository;
use tracing_subscriber::EnvFilter;

pub use hooks::ScriptedHook;
pub use round::{
    round_type, RoundAggregate, RoundAggregateFactory, RoundCommand, RoundCommandProcessor,
    RoundCommandProcessorFactory, RoundEvent, RoundInput, RoundProcessorError, RoundState,
    RoundStatus,
};

/// Repository type used throughout the tests.
pub type TestRepository = InMemoryEventRepository<RoundEvent>;

/// Store type used throughout the tests.
pub type TestStore = EventStore<TestRepository, RoundAggregateFactory, RoundCommandProcessorFactory>;

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`, defaulting to warnings only.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Fresh repository with the given repository hook.
pub fn repository_with_hook(hook: Arc<dyn Hook<RepositoryCheckpoint>>) -> Arc<TestRepository> {
    Arc::new(InMemoryEventRepository::new().with_hook(hook))
}

/// Store over `repository` with the given store hook.
pub fn store_with_hook(
    repository: Arc<TestRepository>,
    hook: Arc<dyn Hook<StoreCheckpoint>>,
) -> TestStore {
    EventStore::new(repository, RoundAggregateFactory, RoundCommandProcessorFactory).with_hook(hook)
}
