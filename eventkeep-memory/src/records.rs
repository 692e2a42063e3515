//! Immutable per-aggregate snapshots swapped in by the repository.

use eventkeep::{AggregateId, SequenceId, SharedEvent};
use std::collections::BTreeSet;

/// Committed stream of one aggregate.
pub(crate) struct AggregateEvents<E> {
    pub(crate) tail_sequence_id: SequenceId,
    pub(crate) events: Vec<SharedEvent<E>>,
}

impl<E> AggregateEvents<E> {
    pub(crate) const fn empty() -> Self {
        Self {
            tail_sequence_id: 0,
            events: Vec::new(),
        }
    }

    /// New snapshot with `appended` added after the current events.
    pub(crate) fn with_appended(&self, appended: &[SharedEvent<E>]) -> Self {
        let mut events = Vec::with_capacity(self.events.len() + appended.len());
        events.extend(self.events.iter().cloned());
        events.extend(appended.iter().cloned());
        Self {
            tail_sequence_id: events.last().map_or(0, |event| event.sequence_id),
            events,
        }
    }

    /// Events after `after_sequence_id`, at most `max_count` of them.
    pub(crate) fn slice_after(
        &self,
        after_sequence_id: SequenceId,
        max_count: Option<usize>,
    ) -> &[SharedEvent<E>] {
        let start = self
            .events
            .partition_point(|event| event.sequence_id <= after_sequence_id);
        let end = max_count.map_or(self.events.len(), |max_count| {
            start.saturating_add(max_count).min(self.events.len())
        });
        &self.events[start..end]
    }
}

/// Undelivered window of one aggregate.
///
/// `delivered` is the watermark; `transaction_first..=transaction_last` is the
/// range the latest append announced. The upper bound may run ahead of the
/// committed tail when that append lost its race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AggregateSequenceIds {
    pub(crate) delivered: SequenceId,
    pub(crate) transaction_first: SequenceId,
    pub(crate) transaction_last: SequenceId,
}

impl AggregateSequenceIds {
    pub(crate) const fn opened(first: SequenceId, last: SequenceId) -> Self {
        Self {
            delivered: first - 1,
            transaction_first: first,
            transaction_last: last,
        }
    }

    /// Whether this window was left behind by an append that did not commit:
    /// it starts inside the committed range but reaches past its tail.
    pub(crate) const fn is_speculative(&self, tail_sequence_id: SequenceId) -> bool {
        self.transaction_first <= tail_sequence_id && tail_sequence_id < self.transaction_last
    }
}

/// Ordered id index of one aggregate type.
#[derive(Default)]
pub(crate) struct AggregateTypeIds {
    pub(crate) tail_index: u64,
    pub(crate) ids: BTreeSet<AggregateId>,
}

impl AggregateTypeIds {
    pub(crate) fn with_inserted(&self, aggregate_id: &AggregateId) -> Self {
        let mut ids = self.ids.clone();
        ids.insert(aggregate_id.clone());
        Self {
            tail_index: self.tail_index + 1,
            ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventkeep::{AggregateType, WrappedEvent};
    use std::sync::Arc;

    fn events(count: u64) -> Vec<SharedEvent<u64>> {
        (1..=count)
            .map(|sequence_id| {
                Arc::new(WrappedEvent::new(
                    AggregateType::try_new("T").unwrap(),
                    AggregateId::try_new("a").unwrap(),
                    sequence_id,
                    sequence_id,
                    eventkeep::IdempotenceId::nil(),
                ))
            })
            .collect()
    }

    #[test]
    fn appending_moves_the_tail() {
        let snapshot = AggregateEvents::empty().with_appended(&events(3));
        assert_eq!(snapshot.tail_sequence_id, 3);
        assert_eq!(snapshot.events.len(), 3);
    }

    #[test]
    fn slice_after_respects_cursor_and_limit() {
        let snapshot = AggregateEvents::empty().with_appended(&events(4));
        let ids = |slice: &[SharedEvent<u64>]| slice.iter().map(|e| e.sequence_id).collect::<Vec<_>>();

        assert_eq!(ids(snapshot.slice_after(0, None)), vec![1, 2, 3, 4]);
        assert_eq!(ids(snapshot.slice_after(1, Some(1))), vec![2]);
        assert_eq!(ids(snapshot.slice_after(2, Some(10))), vec![3, 4]);
        assert!(snapshot.slice_after(4, None).is_empty());
        assert!(snapshot.slice_after(0, Some(0)).is_empty());
    }

    #[test]
    fn speculative_window_detection() {
        let window = AggregateSequenceIds::opened(3, 5);
        assert_eq!(window.delivered, 2);
        assert!(!window.is_speculative(2));
        assert!(window.is_speculative(3));
        assert!(window.is_speculative(4));
        assert!(!window.is_speculative(5));
    }

    #[test]
    fn id_index_counts_insertions() {
        let index = AggregateTypeIds::default()
            .with_inserted(&AggregateId::try_new("b").unwrap())
            .with_inserted(&AggregateId::try_new("a").unwrap());
        assert_eq!(index.tail_index, 2);
        let ids: Vec<_> = index.ids.iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
