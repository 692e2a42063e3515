//! Checkpoint hook driven by the test.
//!
//! Every arrival at a checkpoint adds a permit to that checkpoint's semaphore,
//! so a test can wait until some task got there. A test can also register a
//! callback that runs (and may block) for the first task to arrive only.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventkeep::{AggregateKey, Hook};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

type Callback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Hook that records arrivals and runs one-shot callbacks.
pub struct ScriptedHook<P> {
    arrivals: Mutex<HashMap<P, Arc<Semaphore>>>,
    callbacks: Mutex<HashMap<P, Callback>>,
}

impl<P> ScriptedHook<P>
where
    P: Copy + Eq + Hash + Send + Sync + 'static,
{
    /// A hook with no callbacks and no arrivals.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            arrivals: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
        })
    }

    /// Semaphore counting arrivals at `checkpoint`.
    pub fn arrivals(&self, checkpoint: P) -> Arc<Semaphore> {
        Arc::clone(
            self.arrivals
                .lock()
                .entry(checkpoint)
                .or_insert_with(|| Arc::new(Semaphore::new(0))),
        )
    }

    /// Runs `callback` inside the first task that reaches `checkpoint` next.
    ///
    /// The task stays at the checkpoint until the callback completes; tasks
    /// arriving later pass straight through.
    pub fn on_first<F, Fut>(&self, checkpoint: P, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks
            .lock()
            .insert(checkpoint, Box::new(move || callback().boxed()));
    }

    /// Consumes one arrival at `checkpoint`, waiting up to `timeout`.
    pub async fn wait_for(&self, checkpoint: P, timeout: Duration) -> bool {
        wait_for_arrival(&self.arrivals(checkpoint), timeout).await
    }

    /// Consumes one arrival at `checkpoint` if there is one.
    pub fn try_take(&self, checkpoint: P) -> bool {
        self.arrivals(checkpoint)
            .try_acquire()
            .map(tokio::sync::SemaphorePermit::forget)
            .is_ok()
    }

    /// Number of arrivals at `checkpoint` not consumed yet.
    pub fn pending(&self, checkpoint: P) -> usize {
        self.arrivals(checkpoint).available_permits()
    }
}

/// Consumes one permit of an arrivals semaphore, waiting up to `timeout`.
pub async fn wait_for_arrival(arrivals: &Semaphore, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, arrivals.acquire()).await {
        Ok(Ok(permit)) => {
            permit.forget();
            true
        }
        _ => false,
    }
}

#[async_trait]
impl<P> Hook<P> for ScriptedHook<P>
where
    P: Copy + Eq + Hash + Send + Sync + 'static,
{
    async fn reached(&self, checkpoint: P, _key: &AggregateKey) {
        self.arrivals(checkpoint).add_permits(1);
        let callback = self.callbacks.lock().remove(&checkpoint);
        if let Some(callback) = callback {
            callback().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventkeep::{AggregateId, AggregateType, StoreCheckpoint};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> AggregateKey {
        AggregateKey::new(
            AggregateType::try_new("T").unwrap(),
            AggregateId::try_new("1").unwrap(),
        )
    }

    #[tokio::test]
    async fn arrivals_are_counted() {
        let hook = ScriptedHook::new();
        hook.reached(StoreCheckpoint::Prepared, &key()).await;
        hook.reached(StoreCheckpoint::Prepared, &key()).await;

        assert_eq!(hook.pending(StoreCheckpoint::Prepared), 2);
        assert!(hook.try_take(StoreCheckpoint::Prepared));
        assert!(hook.wait_for(StoreCheckpoint::Prepared, Duration::from_millis(10)).await);
        assert!(!hook.try_take(StoreCheckpoint::Prepared));
        assert!(!hook.try_take(StoreCheckpoint::Appended));
    }

    #[tokio::test]
    async fn callback_runs_for_first_arrival_only() {
        let hook = ScriptedHook::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        hook.on_first(StoreCheckpoint::Appended, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hook.reached(StoreCheckpoint::Appended, &key()).await;
        hook.reached(StoreCheckpoint::Appended, &key()).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
