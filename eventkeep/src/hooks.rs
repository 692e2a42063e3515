//! Critical-section checkpoints.
//!
//! Repository backends and the store report named checkpoints to an injected
//! [`Hook`]. Production code uses [`NoopHook`]; tests install hooks that
//! block at a checkpoint to force one particular interleaving of concurrent
//! writers.

use crate::types::AggregateKey;
use async_trait::async_trait;

/// Checkpoints inside repository operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryCheckpoint {
    /// Append arguments checked against the observed snapshot
    AppendValidated,
    /// Undelivered window widened to the appended range
    AppendMarkedUndelivered,
    /// Append lost its race
    AppendConflicted,
    /// Append swapped in its snapshot
    AppendCommitted,
    /// First iteration of the mark-delivered loop
    MarkDeliveredStarted,
    /// Mark-delivered loop retrying after a lost swap
    MarkDeliveredConflicted,
    /// Watermark advanced or already up to date
    MarkDeliveredEnded,
    /// First iteration of the window-widening loop
    MarkUndeliveredStarted,
    /// Window-widening loop retrying after a lost swap
    MarkUndeliveredConflicted,
    /// A wider existing window was kept as is
    UndeliveredWindowKept,
    /// A speculative window was clamped to the committed tail
    UndeliveredWindowClamped,
}

/// Checkpoints inside [`EventStore::process_command`](crate::EventStore::process_command).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCheckpoint {
    /// New events wrapped, about to append
    Prepared,
    /// Append lost its race, about to retry
    Conflicted,
    /// Append committed
    Appended,
    /// Delivery scheduled (or not configured), about to return
    Published,
}

/// Observer of critical-section checkpoints.
#[async_trait]
pub trait Hook<P>: Send + Sync
where
    P: Send + 'static,
{
    /// Called when `checkpoint` is reached while working on `key`.
    async fn reached(&self, checkpoint: P, key: &AggregateKey);
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl<P> Hook<P> for NoopHook
where
    P: Send + 'static,
{
    async fn reached(&self, _checkpoint: P, _key: &AggregateKey) {}
}
