//! Typed in-process publish/subscribe.
//!
//! The topic of a message is its static type: publishing a `WrappedEvent<E>`
//! reaches exactly the subscribers registered for `WrappedEvent<E>`.

use crate::collect::for_each_aggregating_errors;
use crate::errors::{AggregateError, BoxError, PublishError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Receiver of messages of type `M`.
#[async_trait]
pub trait Subscriber<M>: Send + Sync
where
    M: Sync,
{
    /// Handles one message.
    async fn receive(&self, message: &M) -> Result<(), BoxError>;
}

/// Adapts a synchronous closure into a [`Subscriber`].
#[derive(Debug, Clone)]
pub struct FnSubscriber<F>(F);

/// Wraps `f` so it can be subscribed to messages of type `M`.
pub fn subscriber_fn<M, F>(f: F) -> FnSubscriber<F>
where
    F: Fn(&M) -> Result<(), BoxError> + Send + Sync,
{
    FnSubscriber(f)
}

#[async_trait]
impl<M, F> Subscriber<M> for FnSubscriber<F>
where
    M: Sync,
    F: Fn(&M) -> Result<(), BoxError> + Send + Sync,
{
    async fn receive(&self, message: &M) -> Result<(), BoxError> {
        (self.0)(message)
    }
}

#[async_trait]
trait ErasedSubscriber: Send + Sync {
    async fn receive_any(&self, message: &(dyn Any + Send + Sync)) -> Result<(), BoxError>;
}

struct Typed<M, S> {
    subscriber: S,
    _message: PhantomData<fn(M)>,
}

#[async_trait]
impl<M, S> ErasedSubscriber for Typed<M, S>
where
    M: Any + Send + Sync,
    S: Subscriber<M>,
{
    async fn receive_any(&self, message: &(dyn Any + Send + Sync)) -> Result<(), BoxError> {
        match message.downcast_ref::<M>() {
            Some(message) => self.subscriber.receive(message).await,
            None => Err("message routed to a subscriber of another type".into()),
        }
    }
}

/// Fan-out of messages to the subscribers of their type.
#[derive(Default)]
pub struct PubSub {
    subscribers: RwLock<HashMap<TypeId, Vec<Arc<dyn ErasedSubscriber>>>>,
}

impl PubSub {
    /// An empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber` for messages of type `M`.
    pub fn subscribe<M, S>(&self, subscriber: S)
    where
        M: Any + Send + Sync,
        S: Subscriber<M> + 'static,
    {
        let erased: Arc<dyn ErasedSubscriber> = Arc::new(Typed {
            subscriber,
            _message: PhantomData::<fn(M)>,
        });
        self.subscribers
            .write()
            .entry(TypeId::of::<M>())
            .or_default()
            .push(erased);
    }

    /// Number of subscribers registered for `M`.
    pub fn subscriber_count<M: Any>(&self) -> usize {
        self.subscribers
            .read()
            .get(&TypeId::of::<M>())
            .map_or(0, Vec::len)
    }

    /// Delivers `message` to every subscriber of `M`.
    ///
    /// Every subscriber is attempted even if earlier ones fail; the failures
    /// are returned together.
    pub async fn publish<M>(&self, message: &M) -> Result<(), PublishError>
    where
        M: Any + Send + Sync,
    {
        let subscribers = self
            .subscribers
            .read()
            .get(&TypeId::of::<M>())
            .cloned()
            .unwrap_or_default();

        let erased: &(dyn Any + Send + Sync) = message;
        for_each_aggregating_errors(
            subscribers.iter(),
            |subscriber| subscriber.receive_any(erased),
            None,
        )
        .await
        .map_err(|error| match error {
            AggregateError::Failed(failures) => PublishError { failures },
            AggregateError::Cancelled => PublishError {
                failures: vec!["publishing was cancelled".into()],
            },
        })
    }
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSub")
            .field("topics", &self.subscribers.read().len())
            .finish()
    }
}
