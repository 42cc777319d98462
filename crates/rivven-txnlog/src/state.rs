//! Transaction states and enlisted partitions
//!
//! ```text
//! Empty ──────> Ongoing ──────> PrepareCommit ──────> CompleteCommit
//!   ^              │                                     │
//!   │              └──────> PrepareAbort ──────> CompleteAbort
//!   │                                                    │
//!   └──────────────── (Empty or Ongoing) <───────────────┘
//! ```
//!
//! `Dead` is never a transition target. A transactional-id becomes dead only
//! when a tombstone for it is written to the log.

use serde::{Deserialize, Serialize};

/// Transaction state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// No active transaction
    Empty,

    /// Transaction in progress, accepting partitions
    Ongoing,

    /// Preparing to commit (2PC phase 1)
    PrepareCommit,

    /// Preparing to abort (2PC phase 1)
    PrepareAbort,

    /// Commit complete (2PC phase 2)
    CompleteCommit,

    /// Abort complete (2PC phase 2)
    CompleteAbort,

    /// Removed from the log by a tombstone
    Dead,
}

impl TransactionState {
    /// All states that can be written to the log
    pub const WRITABLE: [TransactionState; 6] = [
        TransactionState::Empty,
        TransactionState::Ongoing,
        TransactionState::PrepareCommit,
        TransactionState::PrepareAbort,
        TransactionState::CompleteCommit,
        TransactionState::CompleteAbort,
    ];

    /// Wire tag for this state. The numbering is fixed for compatibility and
    /// does not follow lifecycle order. `Dead` has no tag.
    pub fn tag(&self) -> Option<i8> {
        match self {
            TransactionState::Empty => Some(0),
            TransactionState::Ongoing => Some(1),
            TransactionState::PrepareAbort => Some(2),
            TransactionState::PrepareCommit => Some(3),
            TransactionState::CompleteCommit => Some(4),
            TransactionState::CompleteAbort => Some(5),
            TransactionState::Dead => None,
        }
    }

    /// Convert from a wire tag
    pub fn from_tag(tag: i8) -> Option<Self> {
        match tag {
            0 => Some(TransactionState::Empty),
            1 => Some(TransactionState::Ongoing),
            2 => Some(TransactionState::PrepareAbort),
            3 => Some(TransactionState::PrepareCommit),
            4 => Some(TransactionState::CompleteCommit),
            5 => Some(TransactionState::CompleteAbort),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Empty => "Empty",
            TransactionState::Ongoing => "Ongoing",
            TransactionState::PrepareCommit => "PrepareCommit",
            TransactionState::PrepareAbort => "PrepareAbort",
            TransactionState::CompleteCommit => "CompleteCommit",
            TransactionState::CompleteAbort => "CompleteAbort",
            TransactionState::Dead => "Dead",
        }
    }

    /// Check whether `self -> target` is in the transition table
    pub fn valid_transition(&self, target: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, target),
            (Empty, Ongoing)
                | (Ongoing, PrepareCommit)
                | (Ongoing, PrepareAbort)
                | (PrepareCommit, CompleteCommit)
                | (PrepareAbort, CompleteAbort)
                | (CompleteCommit, Empty)
                | (CompleteCommit, Ongoing)
                | (CompleteAbort, Empty)
                | (CompleteAbort, Ongoing)
        )
    }

    /// States that may never be persisted with enlisted partitions
    pub fn requires_empty_partitions(&self) -> bool {
        matches!(self, TransactionState::Empty | TransactionState::Dead)
    }

    /// States with no open work. Moving into one drops the enlisted partitions.
    pub fn closes_transaction(&self) -> bool {
        matches!(
            self,
            TransactionState::Empty
                | TransactionState::CompleteCommit
                | TransactionState::CompleteAbort
        )
    }

    /// Check if transaction is still active (can accept partitions)
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Ongoing)
    }

    /// Check if this is a preparing state
    pub fn is_preparing(&self) -> bool {
        matches!(
            self,
            TransactionState::PrepareCommit | TransactionState::PrepareAbort
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A topic-partition enlisted in a transaction
///
/// Ordered by topic, then partition, so that sets of partitions encode and
/// render deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionPartition {
    pub topic: String,
    pub partition: i32,
}

impl TransactionPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TransactionPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_state_tags_are_fixed() {
        assert_eq!(TransactionState::Empty.tag(), Some(0));
        assert_eq!(TransactionState::Ongoing.tag(), Some(1));
        assert_eq!(TransactionState::PrepareAbort.tag(), Some(2));
        assert_eq!(TransactionState::PrepareCommit.tag(), Some(3));
        assert_eq!(TransactionState::CompleteCommit.tag(), Some(4));
        assert_eq!(TransactionState::CompleteAbort.tag(), Some(5));
        assert_eq!(TransactionState::Dead.tag(), None);

        for state in TransactionState::WRITABLE {
            let tag = state.tag().unwrap();
            assert_eq!(TransactionState::from_tag(tag), Some(state));
        }
        assert_eq!(TransactionState::from_tag(6), None);
        assert_eq!(TransactionState::from_tag(-1), None);
    }

    #[test]
    fn test_transition_table() {
        use TransactionState::*;

        let allowed = [
            (Empty, Ongoing),
            (Ongoing, PrepareCommit),
            (Ongoing, PrepareAbort),
            (PrepareCommit, CompleteCommit),
            (PrepareAbort, CompleteAbort),
            (CompleteCommit, Empty),
            (CompleteCommit, Ongoing),
            (CompleteAbort, Empty),
            (CompleteAbort, Ongoing),
        ];

        let all = [
            Empty,
            Ongoing,
            PrepareCommit,
            PrepareAbort,
            CompleteCommit,
            CompleteAbort,
            Dead,
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.valid_transition(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_partition_rules() {
        assert!(TransactionState::Empty.requires_empty_partitions());
        assert!(TransactionState::Dead.requires_empty_partitions());
        assert!(!TransactionState::CompleteCommit.requires_empty_partitions());
        assert!(!TransactionState::Ongoing.requires_empty_partitions());

        assert!(TransactionState::Empty.closes_transaction());
        assert!(TransactionState::CompleteCommit.closes_transaction());
        assert!(TransactionState::CompleteAbort.closes_transaction());
        assert!(!TransactionState::PrepareAbort.closes_transaction());
    }

    #[test]
    fn test_partition_ordering_and_display() {
        let set: BTreeSet<_> = [
            TransactionPartition::new("b", 0),
            TransactionPartition::new("a", 2),
            TransactionPartition::new("a", 1),
            TransactionPartition::new("a", 1),
        ]
        .into_iter()
        .collect();

        let rendered: Vec<String> = set.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, vec!["a-1", "a-2", "b-0"]);
    }
}
