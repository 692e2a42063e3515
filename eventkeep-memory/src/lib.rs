//! In-memory adapter for the `EventKeep` event repository
//!
//! [`InMemoryEventRepository`] keeps every aggregate stream, undelivered window
//! and id index as immutable snapshots in compare-and-swap maps. No lock is
//! held while an operation runs; writers derive a new snapshot and swap it in
//! only if nobody else changed the entry in the meantime.
//!
//! Appends widen the aggregate's undelivered window before committing. If the
//! append then loses its race the window is left too wide; the next
//! mark-delivered on that aggregate clamps it back to the committed tail.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

mod cas;
mod records;

use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use eventkeep::{
    AggregateId, AggregateKey, AggregateType, AggregateUndeliveredEvents, EventRepository, Hook,
    NoopHook, RepositoryCheckpoint, RepositoryConfig, RepositoryError, RepositoryResult,
    SequenceId, SharedEvent,
};
use tracing::{debug, instrument, warn};

use crate::cas::CasMap;
use crate::records::{AggregateEvents, AggregateSequenceIds, AggregateTypeIds};

/// Thread-safe in-memory event repository.
///
/// Share it between tasks with an `Arc`.
pub struct InMemoryEventRepository<E> {
    aggregates_events: CasMap<AggregateKey, AggregateEvents<E>>,
    aggregates_ids: CasMap<AggregateType, AggregateTypeIds>,
    undelivered: CasMap<AggregateKey, AggregateSequenceIds>,
    config: RepositoryConfig,
    hook: Arc<dyn Hook<RepositoryCheckpoint>>,
}

impl<E> InMemoryEventRepository<E>
where
    E: Send + Sync + 'static,
{
    /// Create a new empty repository
    pub fn new() -> Self {
        Self {
            aggregates_events: CasMap::new(),
            aggregates_ids: CasMap::new(),
            undelivered: CasMap::new(),
            config: RepositoryConfig::default(),
            hook: Arc::new(NoopHook),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs a checkpoint hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn Hook<RepositoryCheckpoint>>) -> Self {
        self.hook = hook;
        self
    }

    fn live_lock_limit(&self) -> u32 {
        self.config.live_lock_limit.into_inner()
    }

    fn live_lock(key: &impl std::fmt::Display) -> RepositoryError {
        RepositoryError::InvariantViolation(format!("Live lock detected on {key}"))
    }

    async fn reached(&self, checkpoint: RepositoryCheckpoint, key: &AggregateKey) {
        self.hook.reached(checkpoint, key).await;
    }

    fn validate_batch(key: &AggregateKey, events: &[SharedEvent<E>]) -> RepositoryResult<()> {
        let first = events[0].sequence_id;
        if first == 0 {
            return Err(RepositoryError::invalid_argument(
                "events",
                "First event sequenceId is not a natural number",
            ));
        }
        let contiguous = events
            .windows(2)
            .all(|pair| pair[0].sequence_id.checked_add(1) == Some(pair[1].sequence_id));
        if !contiguous {
            return Err(RepositoryError::invalid_argument(
                "events",
                "Event sequence ids are inconsistent",
            ));
        }
        if !events
            .iter()
            .all(|event| event.belongs_to(&key.aggregate_type, &key.aggregate_id))
        {
            return Err(RepositoryError::invalid_argument(
                "events",
                format!("Every event must belong to aggregate {key}"),
            ));
        }
        Ok(())
    }

    /// Widens the undelivered window of `key` to `first..=last`.
    ///
    /// Runs before the append commits; `aggregate_events` is the snapshot the
    /// append was validated against.
    async fn mark_undelivered(
        &self,
        key: &AggregateKey,
        aggregate_events: &AggregateEvents<E>,
        first: SequenceId,
        last: SequenceId,
    ) -> RepositoryResult<()> {
        if last < first || first <= aggregate_events.tail_sequence_id {
            return Err(RepositoryError::InvariantViolation(format!(
                "Undelivered range {first}..={last} does not follow tail {}",
                aggregate_events.tail_sequence_id
            )));
        }

        for attempt in 0..self.live_lock_limit() {
            self.reached(
                if attempt == 0 {
                    RepositoryCheckpoint::MarkUndeliveredStarted
                } else {
                    RepositoryCheckpoint::MarkUndeliveredConflicted
                },
                key,
            )
            .await;

            let (previous, inserted) = self
                .undelivered
                .get_or_insert_with(key, || AggregateSequenceIds::opened(first, last));
            if inserted {
                return Ok(());
            }

            if last < previous.transaction_last
                && !previous.is_speculative(aggregate_events.tail_sequence_id)
            {
                self.reached(RepositoryCheckpoint::UndeliveredWindowKept, key)
                    .await;
                return Ok(());
            }
            if first < previous.transaction_first {
                return Err(RepositoryError::invalid_argument(
                    "events",
                    format!(
                        "First sequence id {first} precedes the undelivered window starting at {}",
                        previous.transaction_first
                    ),
                ));
            }

            let widened = AggregateSequenceIds {
                delivered: previous.delivered,
                transaction_first: first,
                transaction_last: last,
            };
            if self.undelivered.compare_and_swap(key, &previous, widened) {
                return Ok(());
            }
        }
        Err(Self::live_lock(key))
    }

    /// Adds a newly created aggregate to its type's id index.
    fn index_aggregate_id(&self, key: &AggregateKey) -> RepositoryResult<()> {
        for _ in 0..self.live_lock_limit() {
            let (current, _) = self
                .aggregates_ids
                .get_or_insert_with(&key.aggregate_type, AggregateTypeIds::default);
            if current.ids.contains(&key.aggregate_id) {
                return Err(RepositoryError::InvariantViolation(format!(
                    "Aggregate id duplicate detected: {key}"
                )));
            }
            let updated = current.with_inserted(&key.aggregate_id);
            if self
                .aggregates_ids
                .compare_and_swap(&key.aggregate_type, &current, updated)
            {
                return Ok(());
            }
        }
        Err(Self::live_lock(key))
    }

    /// One pass of the mark-delivered loop. `Ok(true)` means done.
    async fn try_mark_delivered(
        &self,
        key: &AggregateKey,
        aggregate_events: &AggregateEvents<E>,
        delivered_sequence_id: SequenceId,
    ) -> RepositoryResult<bool> {
        let Some(previous) = self.undelivered.get(key) else {
            return Ok(true);
        };

        let tail = aggregate_events.tail_sequence_id;
        if previous.transaction_last < tail {
            return Err(RepositoryError::InvariantViolation(format!(
                "Undelivered window of {key} ends at {} below committed tail {tail}",
                previous.transaction_last
            )));
        }

        let mut transaction_last = previous.transaction_last;
        if previous.is_speculative(tail) {
            warn!(
                aggregate = %key,
                window_last = transaction_last,
                tail,
                "Clamping undelivered window left by a lost append"
            );
            transaction_last = tail;
            self.reached(RepositoryCheckpoint::UndeliveredWindowClamped, key)
                .await;
        }

        let updated = AggregateSequenceIds {
            delivered: previous.delivered.max(delivered_sequence_id),
            transaction_first: previous.transaction_first,
            transaction_last,
        };
        if updated == *previous {
            return Ok(true);
        }
        if updated.delivered == updated.transaction_last {
            Ok(self.undelivered.compare_and_remove(key, &previous))
        } else if updated.delivered < updated.transaction_last {
            Ok(self.undelivered.compare_and_swap(key, &previous, updated))
        } else {
            Err(RepositoryError::InvariantViolation(format!(
                "Delivered sequence id {} passed window end {} of {key}",
                updated.delivered, updated.transaction_last
            )))
        }
    }
}

impl<E> Default for InMemoryEventRepository<E>
where
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for InMemoryEventRepository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventRepository")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E> EventRepository for InMemoryEventRepository<E>
where
    E: Send + Sync + 'static,
{
    type Event = E;

    #[instrument(skip_all, fields(
        aggregate_type = %aggregate_type,
        aggregate_id = %aggregate_id,
        count = events.len()
    ))]
    async fn append_events(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &AggregateId,
        events: Vec<SharedEvent<E>>,
    ) -> RepositoryResult<()> {
        let (Some(first_event), Some(last_event)) = (events.first(), events.last()) else {
            return Ok(());
        };
        let (first, last) = (first_event.sequence_id, last_event.sequence_id);
        let key = AggregateKey::new(aggregate_type.clone(), aggregate_id.clone());
        Self::validate_batch(&key, &events)?;

        let (previous, _) = self
            .aggregates_events
            .get_or_insert_with(&key, AggregateEvents::empty);
        let expected = previous.tail_sequence_id + 1;
        if first > expected {
            return Err(RepositoryError::invalid_argument(
                "events",
                format!(
                    "Invalid firstSequenceId (gap in sequence ids) expected: '{expected}' given: '{first}'"
                ),
            ));
        }
        self.reached(RepositoryCheckpoint::AppendValidated, &key)
            .await;

        let stale = first < expected;
        if !stale {
            self.mark_undelivered(&key, &previous, first, last).await?;
            self.reached(RepositoryCheckpoint::AppendMarkedUndelivered, &key)
                .await;
        }

        let committed = !stale
            && self.aggregates_events.compare_and_swap(
                &key,
                &previous,
                previous.with_appended(&events),
            );
        if !committed {
            debug!(first, tail = previous.tail_sequence_id, "Append lost optimistic concurrency race");
            self.reached(RepositoryCheckpoint::AppendConflicted, &key)
                .await;
            return Err(RepositoryError::conflict(&key));
        }
        self.reached(RepositoryCheckpoint::AppendCommitted, &key)
            .await;

        if previous.tail_sequence_id == 0 {
            self.index_aggregate_id(&key)?;
        }
        debug!(first, last, "Events appended");
        Ok(())
    }

    async fn list_events(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &AggregateId,
        after_sequence_id: SequenceId,
        max_count: Option<usize>,
    ) -> RepositoryResult<Vec<SharedEvent<E>>> {
        let key = AggregateKey::new(aggregate_type.clone(), aggregate_id.clone());
        Ok(self
            .aggregates_events
            .get(&key)
            .map(|snapshot| snapshot.slice_after(after_sequence_id, max_count).to_vec())
            .unwrap_or_default())
    }

    #[instrument(skip_all, fields(
        aggregate_type = %aggregate_type,
        aggregate_id = %aggregate_id,
        delivered_sequence_id = delivered_sequence_id
    ))]
    async fn mark_events_as_delivered_cumulative(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &AggregateId,
        delivered_sequence_id: SequenceId,
    ) -> RepositoryResult<()> {
        if delivered_sequence_id == 0 {
            return Ok(());
        }
        let key = AggregateKey::new(aggregate_type.clone(), aggregate_id.clone());

        for attempt in 0..self.live_lock_limit() {
            self.reached(
                if attempt == 0 {
                    RepositoryCheckpoint::MarkDeliveredStarted
                } else {
                    RepositoryCheckpoint::MarkDeliveredConflicted
                },
                &key,
            )
            .await;

            let aggregate_events = match self.aggregates_events.get(&key) {
                Some(snapshot) if snapshot.tail_sequence_id >= delivered_sequence_id => snapshot,
                snapshot => {
                    return Err(RepositoryError::invalid_argument(
                        "delivered_sequence_id",
                        format!(
                            "'{delivered_sequence_id}' is greater than the last appended sequence id '{}'",
                            snapshot.map_or(0, |snapshot| snapshot.tail_sequence_id)
                        ),
                    ));
                }
            };

            if self
                .try_mark_delivered(&key, &aggregate_events, delivered_sequence_id)
                .await?
            {
                self.reached(RepositoryCheckpoint::MarkDeliveredEnded, &key)
                    .await;
                return Ok(());
            }
        }
        Err(Self::live_lock(&key))
    }

    async fn list_undelivered_events(
        &self,
        max_count: Option<usize>,
    ) -> RepositoryResult<Vec<AggregateUndeliveredEvents<E>>> {
        if max_count == Some(0) {
            return Err(RepositoryError::invalid_argument(
                "max_count",
                "'0' is not a positive integer",
            ));
        }

        let mut remaining = max_count;
        let mut undelivered = Vec::new();
        for (key, window) in self.undelivered.snapshot() {
            if remaining == Some(0) {
                break;
            }
            let Some(snapshot) = self.aggregates_events.get(&key) else {
                continue;
            };
            let events = snapshot.slice_after(window.delivered, remaining);
            if events.is_empty() {
                continue;
            }
            remaining = remaining.map(|remaining| remaining - events.len());
            undelivered.push(AggregateUndeliveredEvents {
                key,
                events: events.to_vec(),
            });
        }
        Ok(undelivered)
    }

    async fn list_aggregate_ids(
        &self,
        aggregate_type: &AggregateType,
        after_aggregate_id: Option<&AggregateId>,
        max_count: Option<usize>,
    ) -> RepositoryResult<Vec<AggregateId>> {
        let Some(index) = self.aggregates_ids.get(aggregate_type) else {
            return Ok(Vec::new());
        };
        let lower = after_aggregate_id.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(index
            .ids
            .range::<AggregateId, _>((lower, Bound::Unbounded))
            .take(max_count.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventkeep::{LiveLockLimit, WrappedEvent};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn aggregate_type() -> AggregateType {
        AggregateType::try_new("TestAggregate").unwrap()
    }

    fn aggregate_id(id: &str) -> AggregateId {
        AggregateId::try_new(id).unwrap()
    }

    fn event(id: &str, sequence_id: SequenceId) -> SharedEvent<String> {
        Arc::new(WrappedEvent::new(
            aggregate_type(),
            aggregate_id(id),
            sequence_id,
            format!("event-{sequence_id}"),
            Uuid::now_v7(),
        ))
    }

    fn batch(id: &str, sequence_ids: impl IntoIterator<Item = SequenceId>) -> Vec<SharedEvent<String>> {
        sequence_ids.into_iter().map(|sequence_id| event(id, sequence_id)).collect()
    }

    async fn sequence_ids(repository: &InMemoryEventRepository<String>, id: &str) -> Vec<SequenceId> {
        repository
            .list_events(&aggregate_type(), &aggregate_id(id), 0, None)
            .await
            .unwrap()
            .iter()
            .map(|event| event.sequence_id)
            .collect()
    }

    async fn undelivered_ids(repository: &InMemoryEventRepository<String>) -> Vec<SequenceId> {
        repository
            .list_undelivered_events(None)
            .await
            .unwrap()
            .into_iter()
            .flat_map(|aggregate| aggregate.events)
            .map(|event| event.sequence_id)
            .collect()
    }

    async fn list_ids(
        repository: &InMemoryEventRepository<String>,
        after: Option<&str>,
        max_count: Option<usize>,
    ) -> Vec<String> {
        let after = after.map(aggregate_id);
        repository
            .list_aggregate_ids(&aggregate_type(), after.as_ref(), max_count)
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_new_repository_is_empty() {
        let repository = InMemoryEventRepository::<String>::new();
        assert!(sequence_ids(&repository, "a").await.is_empty());
        assert!(undelivered_ids(&repository).await.is_empty());
        assert!(repository
            .list_aggregate_ids(&aggregate_type(), None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let repository = InMemoryEventRepository::<String>::new();
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), Vec::new())
            .await
            .unwrap();

        assert!(sequence_ids(&repository, "a").await.is_empty());
        assert!(undelivered_ids(&repository).await.is_empty());
        assert!(repository
            .list_aggregate_ids(&aggregate_type(), None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_append_one_then_two() {
        let repository = InMemoryEventRepository::new();
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [1]))
            .await
            .unwrap();
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [2, 3]))
            .await
            .unwrap();

        assert_eq!(sequence_ids(&repository, "a").await, vec![1, 2, 3]);
        assert_eq!(undelivered_ids(&repository).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_zero_sequence_id_is_rejected() {
        let repository = InMemoryEventRepository::new();
        let error = repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [0]))
            .await
            .unwrap_err();

        assert!(
            matches!(&error, RepositoryError::InvalidArgument { message, .. } if message.contains("not a natural number"))
        );
        assert!(sequence_ids(&repository, "a").await.is_empty());
    }

    #[tokio::test]
    async fn test_gap_in_sequence_ids_is_rejected() {
        let repository = InMemoryEventRepository::new();
        let error = repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [2]))
            .await
            .unwrap_err();

        assert_eq!(
            error,
            RepositoryError::invalid_argument(
                "events",
                "Invalid firstSequenceId (gap in sequence ids) expected: '1' given: '2'"
            )
        );
        assert!(undelivered_ids(&repository).await.is_empty());
    }

    #[tokio::test]
    async fn test_inconsistent_batch_is_rejected() {
        let repository = InMemoryEventRepository::new();
        let error = repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [1, 3]))
            .await
            .unwrap_err();

        assert!(
            matches!(&error, RepositoryError::InvalidArgument { message, .. } if message == "Event sequence ids are inconsistent")
        );
    }

    #[tokio::test]
    async fn test_foreign_event_is_rejected() {
        let repository = InMemoryEventRepository::new();
        let error = repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("b", [1]))
            .await
            .unwrap_err();

        assert!(matches!(error, RepositoryError::InvalidArgument { argument: "events", .. }));
    }

    #[tokio::test]
    async fn test_overlapping_append_conflicts_and_keeps_log() {
        let repository = InMemoryEventRepository::new();
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [1, 2]))
            .await
            .unwrap();
        let error = repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [2, 3]))
            .await
            .unwrap_err();

        assert!(error.is_transient());
        assert!(error.to_string().contains("Conflict"));
        assert_eq!(sequence_ids(&repository, "a").await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_aggregates_are_independent() {
        let repository = InMemoryEventRepository::new();
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [1, 2]))
            .await
            .unwrap();
        repository
            .append_events(&aggregate_type(), &aggregate_id("b"), batch("b", [1]))
            .await
            .unwrap();

        assert_eq!(sequence_ids(&repository, "a").await, vec![1, 2]);
        assert_eq!(sequence_ids(&repository, "b").await, vec![1]);
    }

    #[tokio::test]
    async fn test_list_events_after_with_limit() {
        let repository = InMemoryEventRepository::new();
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", 1..=4))
            .await
            .unwrap();

        let events = repository
            .list_events(&aggregate_type(), &aggregate_id("a"), 1, Some(1))
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence_id, 2);
        assert_eq!(events[0].domain_event, "event-2");
    }

    #[tokio::test]
    async fn test_mark_delivered_zero_is_always_accepted() {
        let repository = InMemoryEventRepository::<String>::new();
        repository
            .mark_events_as_delivered_cumulative(&aggregate_type(), &aggregate_id("missing"), 0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mark_delivered_beyond_tail_is_rejected() {
        let repository = InMemoryEventRepository::new();
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [1]))
            .await
            .unwrap();

        for (id, delivered) in [("a", 2), ("missing", 1)] {
            let error = repository
                .mark_events_as_delivered_cumulative(&aggregate_type(), &aggregate_id(id), delivered)
                .await
                .unwrap_err();
            assert!(matches!(
                error,
                RepositoryError::InvalidArgument { argument: "delivered_sequence_id", .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_mark_delivered_is_monotonic_and_removes_window() {
        let repository = InMemoryEventRepository::new();
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", 1..=3))
            .await
            .unwrap();

        repository
            .mark_events_as_delivered_cumulative(&aggregate_type(), &aggregate_id("a"), 2)
            .await
            .unwrap();
        assert_eq!(undelivered_ids(&repository).await, vec![3]);

        repository
            .mark_events_as_delivered_cumulative(&aggregate_type(), &aggregate_id("a"), 1)
            .await
            .unwrap();
        assert_eq!(undelivered_ids(&repository).await, vec![3]);

        repository
            .mark_events_as_delivered_cumulative(&aggregate_type(), &aggregate_id("a"), 3)
            .await
            .unwrap();
        assert!(undelivered_ids(&repository).await.is_empty());
        assert!(repository.undelivered.get(&AggregateKey::new(aggregate_type(), aggregate_id("a"))).is_none());

        repository
            .mark_events_as_delivered_cumulative(&aggregate_type(), &aggregate_id("a"), 3)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_after_full_delivery_reopens_window() {
        let repository = InMemoryEventRepository::new();
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [1]))
            .await
            .unwrap();
        repository
            .mark_events_as_delivered_cumulative(&aggregate_type(), &aggregate_id("a"), 1)
            .await
            .unwrap();
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [2, 3]))
            .await
            .unwrap();

        assert_eq!(undelivered_ids(&repository).await, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_list_undelivered_zero_max_count_is_rejected() {
        let repository = InMemoryEventRepository::<String>::new();
        let error = repository.list_undelivered_events(Some(0)).await.unwrap_err();
        assert!(matches!(error, RepositoryError::InvalidArgument { argument: "max_count", .. }));
    }

    #[tokio::test]
    async fn test_list_undelivered_max_count_is_cumulative() {
        let repository = InMemoryEventRepository::new();
        for id in ["a", "b", "c"] {
            repository
                .append_events(&aggregate_type(), &aggregate_id(id), batch(id, 1..=2))
                .await
                .unwrap();
        }

        for max_count in 1..=7 {
            let listed: usize = repository
                .list_undelivered_events(Some(max_count))
                .await
                .unwrap()
                .iter()
                .map(|aggregate| {
                    assert!(!aggregate.events.is_empty());
                    aggregate.events.len()
                })
                .sum();
            assert_eq!(listed, max_count.min(6));
        }
    }

    #[tokio::test]
    async fn test_list_aggregate_ids_pagination() {
        let repository = InMemoryEventRepository::new();
        for id in ["c", "a", "d", "b"] {
            repository
                .append_events(&aggregate_type(), &aggregate_id(id), batch(id, [1]))
                .await
                .unwrap();
        }
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [2]))
            .await
            .unwrap();

        assert_eq!(list_ids(&repository, None, None).await, vec!["a", "b", "c", "d"]);
        assert_eq!(list_ids(&repository, Some("a"), Some(2)).await, vec!["b", "c"]);
        assert_eq!(list_ids(&repository, Some("bb"), None).await, vec!["c", "d"]);
        assert!(list_ids(&repository, Some("d"), None).await.is_empty());
        assert!(list_ids(&repository, None, Some(0)).await.is_empty());

        let other = repository
            .list_aggregate_ids(&AggregateType::try_new("Other").unwrap(), None, None)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_live_lock_limit_is_configurable() {
        let repository = InMemoryEventRepository::<String>::new().with_config(
            RepositoryConfig::default().with_live_lock_limit(LiveLockLimit::try_new(3).unwrap()),
        );
        assert_eq!(repository.live_lock_limit(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appenders_keep_stream_contiguous() {
        let repository = Arc::new(InMemoryEventRepository::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let repository = Arc::clone(&repository);
            tasks.push(tokio::spawn(async move {
                let mut committed = 0;
                while committed < 10 {
                    let tail = repository
                        .list_events(&aggregate_type(), &aggregate_id("a"), 0, None)
                        .await
                        .unwrap()
                        .last()
                        .map_or(0, |event| event.sequence_id);
                    match repository
                        .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [tail + 1]))
                        .await
                    {
                        Ok(()) => committed += 1,
                        Err(error) => assert!(error.is_transient(), "unexpected error: {error}"),
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let ids = sequence_ids(&repository, "a").await;
        assert_eq!(ids, (1..=80).collect::<Vec<_>>());
        assert_eq!(undelivered_ids(&repository).await, ids);
        repository
            .mark_events_as_delivered_cumulative(&aggregate_type(), &aggregate_id("a"), 80)
            .await
            .unwrap();
        assert!(undelivered_ids(&repository).await.is_empty());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_conflicts_are_logged() {
        let repository = InMemoryEventRepository::new();
        repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [1]))
            .await
            .unwrap();
        let _ = repository
            .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", [1]))
            .await;

        assert!(logs_contain("Append lost optimistic concurrency race"));
    }

    proptest! {
        #[test]
        fn prop_list_events_pages_through_stream(
            count in 0u64..20,
            after in 0u64..25,
            max_count in proptest::option::of(0usize..25),
        ) {
            tokio_test::block_on(async {
                let repository = InMemoryEventRepository::new();
                repository
                    .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", 1..=count))
                    .await
                    .unwrap();

                let listed: Vec<_> = repository
                    .list_events(&aggregate_type(), &aggregate_id("a"), after, max_count)
                    .await
                    .unwrap()
                    .iter()
                    .map(|event| event.sequence_id)
                    .collect();

                let expected: Vec<_> = (after + 1..=count)
                    .take(max_count.unwrap_or(usize::MAX))
                    .collect();
                prop_assert_eq!(listed, expected);
                Ok(())
            })?;
        }

        #[test]
        fn prop_mark_delivered_leaves_only_later_events(
            count in 0u64..6,
            marks in proptest::collection::vec(0u64..8, 0..4),
        ) {
            tokio_test::block_on(async {
                let repository = InMemoryEventRepository::new();
                repository
                    .append_events(&aggregate_type(), &aggregate_id("a"), batch("a", 1..=count))
                    .await
                    .unwrap();

                let mut watermark = 0;
                for mark in marks {
                    let result = repository
                        .mark_events_as_delivered_cumulative(&aggregate_type(), &aggregate_id("a"), mark)
                        .await;
                    if mark > count {
                        prop_assert!(result.is_err());
                    } else {
                        prop_assert!(result.is_ok());
                        watermark = watermark.max(mark);
                    }
                }

                let expected: Vec<_> = (watermark + 1..=count).collect();
                prop_assert_eq!(undelivered_ids(&repository).await, expected);
                Ok(())
            })?;
        }
    }
}
