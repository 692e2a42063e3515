//! Core identifier types.
//!
//! Aggregate types and ids are validated at construction time, following the
//! "parse, don't validate" principle: an [`AggregateType`] or [`AggregateId`]
//! that exists is always non-empty, trimmed and at most 255 characters long.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position of an event inside its aggregate stream.
///
/// Sequence ids are 1-based and contiguous per aggregate. `0` is used as the
/// "nothing yet" marker in cursors and watermarks.
pub type SequenceId = u64;

/// Identity of a command submission, recorded on every event it produced.
pub type IdempotenceId = Uuid;

/// Name of an aggregate kind (e.g. `"Round"`), selecting factories and
/// partitioning the id index.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct AggregateType(String);

/// Identifier of one aggregate instance within its [`AggregateType`].
///
/// Ids are ordered lexicographically; the repository id index relies on this
/// for stable cursor pagination.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct AggregateId(String);

/// Identifies one event stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    /// Kind of the aggregate
    pub aggregate_type: AggregateType,
    /// Instance id of the aggregate
    pub aggregate_id: AggregateId,
}

impl AggregateKey {
    /// Creates a key from its parts.
    pub const fn new(aggregate_type: AggregateType, aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_type,
            aggregate_id,
        }
    }
}

impl std::fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.aggregate_id)
    }
}
