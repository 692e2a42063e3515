//! At-least-once delivery of undelivered events.
//!
//! [`EventPubSub`] drains every aggregate's undelivered events into a
//! [`PubSub`] and advances the aggregate's delivery watermark once all of
//! them were published without error. Anything not confirmed is listed again
//! by the next drain, so subscribers must tolerate duplicates.

use crate::cancellation::CancellationToken;
use crate::collect::for_each_aggregating_errors;
use crate::errors::{AggregateError, DeliveryError, QueueError};
use crate::event::{AggregateUndeliveredEvents, WrappedEvent};
use crate::pubsub::{PubSub, Subscriber};
use crate::queue::{work_item, TaskQueue};
use crate::repository::EventRepository;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Something that can be asked to deliver pending events soon.
#[async_trait]
pub trait DeliveryTrigger: Send + Sync {
    /// Schedules a delivery run without waiting for it.
    async fn schedule_delivery(&self) -> Result<(), QueueError>;
}

/// Delivery drainer publishing repository events to a [`PubSub`].
pub struct EventPubSub<R: ?Sized> {
    repository: Arc<R>,
    pub_sub: Arc<PubSub>,
    queue: Arc<dyn TaskQueue>,
}

impl<R: ?Sized> Clone for EventPubSub<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            pub_sub: Arc::clone(&self.pub_sub),
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<R: ?Sized> std::fmt::Debug for EventPubSub<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPubSub")
            .field("pub_sub", &self.pub_sub)
            .finish_non_exhaustive()
    }
}

impl<R> EventPubSub<R>
where
    R: EventRepository + ?Sized + 'static,
{
    /// Creates a drainer over `repository`, publishing to `pub_sub` and
    /// scheduling background runs on `queue`.
    pub fn new(repository: Arc<R>, pub_sub: Arc<PubSub>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            repository,
            pub_sub,
            queue,
        }
    }

    /// Subscribes to every event delivered by this drainer.
    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<WrappedEvent<R::Event>> + 'static,
    {
        self.pub_sub.subscribe::<WrappedEvent<R::Event>, S>(subscriber);
    }

    /// Publishes every undelivered event once.
    ///
    /// Each aggregate is attempted even if an earlier one fails, and each of
    /// its events is attempted even if an earlier one fails. An aggregate's
    /// watermark only advances when all of its events were published.
    #[instrument(skip_all)]
    pub async fn publish_all(&self, cancellation: &CancellationToken) -> Result<(), DeliveryError> {
        let undelivered = self.repository.list_undelivered_events(None).await?;
        debug!(aggregates = undelivered.len(), "Draining undelivered events");

        for_each_aggregating_errors(
            undelivered,
            |aggregate| self.deliver(aggregate, cancellation),
            Some(cancellation),
        )
        .await
        .map_err(|error| match error.into_single() {
            Ok(single) => single,
            Err(AggregateError::Cancelled) => DeliveryError::Cancelled,
            Err(AggregateError::Failed(errors)) => DeliveryError::Aggregate(errors),
        })
    }

    /// Enqueues one [`publish_all`](Self::publish_all) run on the background queue.
    pub async fn publish_all_in_background_queue(&self) -> Result<(), QueueError> {
        let drainer = self.clone();
        self.queue
            .enqueue(work_item(move |cancellation| async move {
                drainer.publish_all(&cancellation).await?;
                Ok(())
            }))
            .await
    }

    async fn deliver(
        &self,
        aggregate: AggregateUndeliveredEvents<R::Event>,
        cancellation: &CancellationToken,
    ) -> Result<(), DeliveryError> {
        let Some(last_sequence_id) = aggregate.last_sequence_id() else {
            return Ok(());
        };

        for_each_aggregating_errors(
            aggregate.events.iter(),
            |event| self.pub_sub.publish(&**event),
            Some(cancellation),
        )
        .await
        .map_err(|error| match error {
            AggregateError::Cancelled => DeliveryError::Cancelled,
            AggregateError::Failed(failures) => DeliveryError::Publish {
                key: aggregate.key.clone(),
                failures,
            },
        })?;

        self.repository
            .mark_events_as_delivered_cumulative(
                &aggregate.key.aggregate_type,
                &aggregate.key.aggregate_id,
                last_sequence_id,
            )
            .await?;
        debug!(aggregate = %aggregate.key, last_sequence_id, "Events delivered");
        Ok(())
    }
}

#[async_trait]
impl<R> DeliveryTrigger for EventPubSub<R>
where
    R: EventRepository + ?Sized + 'static,
{
    async fn schedule_delivery(&self) -> Result<(), QueueError> {
        self.publish_all_in_background_queue().await
    }
}
