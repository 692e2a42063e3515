//! Deferred work: a FIFO of boxed async work items and the worker that runs them.

use crate::cancellation::CancellationToken;
use crate::errors::{BoxError, QueueError};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A unit of deferred work. It receives the worker's cancellation token.
pub type WorkItem =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Boxes an async closure into a [`WorkItem`].
pub fn work_item<F, Fut>(f: F) -> WorkItem
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Box::new(move |cancellation| f(cancellation).boxed())
}

/// Queue of deferred work items.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Adds an item at the back of the queue.
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError>;

    /// Takes the item at the front, waiting until one is available.
    async fn dequeue(&self, cancellation: &CancellationToken) -> Result<WorkItem, QueueError>;
}

/// Unbounded in-process [`TaskQueue`].
pub struct BackgroundTaskQueue {
    sender: mpsc::UnboundedSender<WorkItem>,
    receiver: Mutex<mpsc::UnboundedReceiver<WorkItem>>,
}

impl BackgroundTaskQueue {
    /// An empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Stops accepting work. Items already queued can still be dequeued.
    pub async fn close(&self) {
        self.receiver.lock().await.close();
    }
}

impl Default for BackgroundTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackgroundTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTaskQueue")
            .field("closed", &self.sender.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TaskQueue for BackgroundTaskQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        self.sender.send(item).map_err(|_| QueueError::Closed)
    }

    async fn dequeue(&self, cancellation: &CancellationToken) -> Result<WorkItem, QueueError> {
        let mut receiver = tokio::select! {
            biased;
            () = cancellation.cancelled() => return Err(QueueError::Cancelled),
            receiver = self.receiver.lock() => receiver,
        };
        tokio::select! {
            biased;
            () = cancellation.cancelled() => Err(QueueError::Cancelled),
            item = receiver.recv() => item.ok_or(QueueError::Closed),
        }
    }
}

/// Waits until every item enqueued before this call has been run.
///
/// Works by enqueueing a marker item; requires a worker draining `queue`.
pub async fn wait_for_queue(
    queue: &dyn TaskQueue,
    cancellation: &CancellationToken,
) -> Result<(), QueueError> {
    let (reached, marker) = oneshot::channel();
    queue
        .enqueue(work_item(move |_| async move {
            let _ = reached.send(());
            Ok(())
        }))
        .await?;

    tokio::select! {
        biased;
        () = cancellation.cancelled() => Err(QueueError::Cancelled),
        result = marker => result.map_err(|_| QueueError::Closed),
    }
}

/// Background task draining a [`TaskQueue`] one item at a time.
///
/// Failing items are logged and skipped; the worker keeps going until it is
/// stopped or the queue closes.
#[derive(Debug)]
pub struct QueuedWorker {
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

impl QueuedWorker {
    /// Spawns a worker on the current tokio runtime.
    pub fn start(queue: Arc<dyn TaskQueue>) -> Self {
        let cancellation = CancellationToken::new();
        let handle = tokio::spawn(run_worker(queue, cancellation.clone()));
        Self {
            cancellation,
            handle,
        }
    }

    /// Cancels the worker and waits for it to finish its current item.
    pub async fn stop(self) {
        self.cancellation.cancel();
        if let Err(error) = self.handle.await {
            error!(%error, "background worker terminated abnormally");
        }
    }
}

async fn run_worker(queue: Arc<dyn TaskQueue>, cancellation: CancellationToken) {
    debug!("background worker started");
    loop {
        match queue.dequeue(&cancellation).await {
            Ok(item) => {
                if let Err(error) = item(cancellation.clone()).await {
                    error!(%error, "background work item failed");
                }
            }
            Err(QueueError::Cancelled) => break,
            Err(QueueError::Closed) => {
                debug!("background task queue closed");
                break;
            }
        }
    }
    debug!("background worker stopped");
}
