//! Configuration with type-safe validation.
//!
//! Configuration values use `nutype` validation so that an out-of-range limit
//! cannot be constructed, and all of them deserialize from the same shapes
//! they serialize to.

use nutype::nutype;
use serde::{Deserialize, Serialize};

/// How many times a command is re-run after an optimistic concurrency
/// conflict before the conflict is surfaced to the caller.
///
/// A limit of `n` allows `n + 1` attempts in total. Defaults to 10.
#[nutype(
    validate(less_or_equal = 100),
    default = 10,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Default,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct OptimisticRetryLimit(u32);

/// Upper bound on iterations of any internal compare-and-swap loop.
///
/// Hitting the bound means pathological contention or a bug; it is reported
/// as an invariant violation, never as a retryable error. Defaults to 10 000.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    default = 10_000,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Default,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct LiveLockLimit(u32);

/// Settings for [`EventStore`](crate::EventStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventStoreConfig {
    /// Retry budget for optimistic concurrency conflicts
    #[serde(default)]
    pub optimistic_retry_limit: OptimisticRetryLimit,
}

impl EventStoreConfig {
    /// Sets the retry budget.
    #[must_use]
    pub const fn with_optimistic_retry_limit(mut self, limit: OptimisticRetryLimit) -> Self {
        self.optimistic_retry_limit = limit;
        self
    }

    /// Total number of attempts a command gets, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.optimistic_retry_limit.into_inner().saturating_add(1)
    }
}

/// Settings for repository backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Bound on compare-and-swap loop iterations
    #[serde(default)]
    pub live_lock_limit: LiveLockLimit,
}

impl RepositoryConfig {
    /// Sets the live lock bound.
    #[must_use]
    pub const fn with_live_lock_limit(mut self, limit: LiveLockLimit) -> Self {
        self.live_lock_limit = limit;
        self
    }
}
