//! Transaction metadata owned by the coordinator
//!
//! [`TransactionMetadata`] is the mutable, in-memory state of one
//! transactional-id. Every change that must survive a coordinator restart is
//! first captured as a [`TxnTransitMetadata`] snapshot, written to the log,
//! and only then applied back with [`TransactionMetadata::complete_transition`].
//!
//! ```text
//! metadata ── prepare_*() ──> TxnTransitMetadata ── codec ──> log append
//!    ^                                                          │
//!    └───────────────── complete_transition() <─────────────────┘
//! ```
//!
//! The cross-field invariant (an `Empty` transaction holds no partitions) is
//! checked on every snapshot, including the as-is path. Transitions into
//! `Empty`, `CompleteCommit` or `CompleteAbort` drop the enlisted partitions.

use crate::error::{Error, Result};
use crate::state::{TransactionPartition, TransactionState};
use std::collections::BTreeSet;
use tracing::debug;

/// Producer ID type
pub type ProducerId = i64;

/// Producer epoch (bumped when a producer re-registers, used for fencing)
pub type ProducerEpoch = i16;

/// Producer id used before one has been assigned
pub const NO_PRODUCER_ID: ProducerId = -1;

/// Highest epoch a producer may reach before it must rotate its producer id
pub const MAX_PRODUCER_EPOCH: ProducerEpoch = i16::MAX - 1;

/// Check the cross-field invariant for a state and partition set
pub(crate) fn check_partitions(
    transactional_id: &str,
    state: TransactionState,
    partitions: &BTreeSet<TransactionPartition>,
) -> Result<()> {
    if state.requires_empty_partitions() && !partitions.is_empty() {
        return Err(Error::InvalidState {
            transactional_id: transactional_id.to_string(),
            state,
            partitions: partitions.len(),
        });
    }
    Ok(())
}

/// Immutable, validated snapshot of [`TransactionMetadata`]
///
/// This is the only type the codec serializes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnTransitMetadata {
    pub transactional_id: String,
    pub producer_id: ProducerId,
    pub producer_epoch: ProducerEpoch,
    pub txn_timeout_ms: i32,
    pub state: TransactionState,
    pub topic_partitions: BTreeSet<TransactionPartition>,
    pub txn_last_update_timestamp: i64,
}

impl TxnTransitMetadata {
    /// Check that this snapshot may be written to the log
    pub fn validate(&self) -> Result<()> {
        if self.transactional_id.is_empty() {
            return Err(self.illegal("transactional id must not be empty"));
        }
        if self.state == TransactionState::Dead {
            return Err(self.illegal("Dead is only expressed by a tombstone"));
        }
        if self.producer_epoch < 0 {
            return Err(self.illegal(format!(
                "producer epoch {} is negative",
                self.producer_epoch
            )));
        }
        if self.txn_timeout_ms <= 0 {
            return Err(self.illegal(format!(
                "transaction timeout {} ms is not positive",
                self.txn_timeout_ms
            )));
        }
        check_partitions(&self.transactional_id, self.state, &self.topic_partitions)
    }

    fn illegal(&self, reason: impl Into<String>) -> Error {
        Error::IllegalTransitMetadata {
            transactional_id: self.transactional_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Mutable state of one transactional producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMetadata {
    transactional_id: String,

    /// Producer ID owning this transactional-id
    pub producer_id: ProducerId,

    /// Producer epoch (for fencing)
    pub producer_epoch: ProducerEpoch,

    /// Transaction timeout in milliseconds
    pub txn_timeout_ms: i32,

    /// Current state
    pub state: TransactionState,

    /// Partitions enlisted in the current transaction
    pub topic_partitions: BTreeSet<TransactionPartition>,

    /// Wall-clock time (ms) of the last persisted change
    pub txn_last_update_timestamp: i64,

    /// State of a snapshot that has been prepared but not yet completed
    pending_state: Option<TransactionState>,
}

impl TransactionMetadata {
    /// Create metadata for a transactional-id with no enlisted partitions
    pub fn new(
        transactional_id: impl Into<String>,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        txn_timeout_ms: i32,
        state: TransactionState,
        txn_last_update_timestamp: i64,
    ) -> Self {
        Self {
            transactional_id: transactional_id.into(),
            producer_id,
            producer_epoch,
            txn_timeout_ms,
            state,
            topic_partitions: BTreeSet::new(),
            txn_last_update_timestamp,
            pending_state: None,
        }
    }

    pub(crate) fn from_parts(
        transactional_id: String,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        txn_timeout_ms: i32,
        state: TransactionState,
        topic_partitions: BTreeSet<TransactionPartition>,
        txn_last_update_timestamp: i64,
    ) -> Self {
        Self {
            transactional_id,
            producer_id,
            producer_epoch,
            txn_timeout_ms,
            state,
            topic_partitions,
            txn_last_update_timestamp,
            pending_state: None,
        }
    }

    pub fn transactional_id(&self) -> &str {
        &self.transactional_id
    }

    pub fn pending_state(&self) -> Option<TransactionState> {
        self.pending_state
    }

    /// Union `partitions` into the enlisted set.
    ///
    /// Legality against the current state is checked when a snapshot is taken.
    pub fn add_partitions(&mut self, partitions: impl IntoIterator<Item = TransactionPartition>) {
        self.topic_partitions.extend(partitions);
    }

    /// Remove a single enlisted partition, returning whether it was present
    pub fn remove_partition(&mut self, partition: &TransactionPartition) -> bool {
        self.topic_partitions.remove(partition)
    }

    pub fn is_producer_epoch_exhausted(&self) -> bool {
        self.producer_epoch >= MAX_PRODUCER_EPOCH
    }

    /// Snapshot the current fields verbatim, without moving state.
    ///
    /// Transition legality is not checked here, but the cross-field invariant is.
    pub fn prepare_snapshot_as_is(&self) -> Result<TxnTransitMetadata> {
        let transit = self.snapshot(
            self.state,
            self.topic_partitions.clone(),
            self.txn_last_update_timestamp,
        );
        transit.validate()?;
        Ok(transit)
    }

    /// Prepare a move to `target`, carrying the enlisted partitions forward
    /// unless `target` closes the transaction.
    pub fn prepare_transition(
        &mut self,
        target: TransactionState,
        now_ms: i64,
    ) -> Result<TxnTransitMetadata> {
        self.check_not_pending()?;
        if !self.state.valid_transition(target) {
            return Err(self.invalid_transition(target));
        }

        let partitions = if target.closes_transaction() {
            BTreeSet::new()
        } else {
            self.topic_partitions.clone()
        };
        self.prepare(target, partitions, self.producer_epoch, self.txn_timeout_ms, now_ms)
    }

    /// Prepare enlisting `partitions` in an ongoing transaction, starting one
    /// if none is open.
    pub fn prepare_add_partitions(
        &mut self,
        partitions: impl IntoIterator<Item = TransactionPartition>,
        now_ms: i64,
    ) -> Result<TxnTransitMetadata> {
        self.check_not_pending()?;
        let target = TransactionState::Ongoing;
        if !(self.state.is_active() || self.state.valid_transition(target)) {
            return Err(self.invalid_transition(target));
        }

        let mut union = self.topic_partitions.clone();
        union.extend(partitions);
        self.prepare(target, union, self.producer_epoch, self.txn_timeout_ms, now_ms)
    }

    /// Prepare bumping the producer epoch, keeping the current state
    pub fn prepare_increment_producer_epoch(
        &mut self,
        new_timeout_ms: i32,
        now_ms: i64,
    ) -> Result<TxnTransitMetadata> {
        self.check_not_pending()?;
        if self.state.is_preparing() || self.state == TransactionState::Dead {
            return Err(self.invalid_transition(self.state));
        }
        if self.is_producer_epoch_exhausted() {
            return Err(Error::ProducerEpochExhausted {
                transactional_id: self.transactional_id.clone(),
                producer_id: self.producer_id,
            });
        }

        self.prepare(
            self.state,
            self.topic_partitions.clone(),
            self.producer_epoch + 1,
            new_timeout_ms,
            now_ms,
        )
    }

    /// Apply a snapshot that has been durably written to the log
    pub fn complete_transition(&mut self, transit: TxnTransitMetadata) -> Result<()> {
        let pending = match self.pending_state {
            Some(pending) => pending,
            None => return Err(self.illegal_transit("no transition is pending")),
        };

        if transit.state != pending {
            return Err(self.illegal_transit(format!(
                "pending state is {}, transit state is {}",
                pending, transit.state
            )));
        }
        if transit.transactional_id != self.transactional_id {
            return Err(self.illegal_transit(format!(
                "transit belongs to {}",
                transit.transactional_id
            )));
        }
        if transit.producer_id != self.producer_id {
            return Err(self.illegal_transit(format!(
                "producer id changed from {} to {}",
                self.producer_id, transit.producer_id
            )));
        }
        if transit.producer_epoch < self.producer_epoch {
            return Err(self.illegal_transit(format!(
                "producer epoch moved back from {} to {}",
                self.producer_epoch, transit.producer_epoch
            )));
        }
        if transit.txn_last_update_timestamp < self.txn_last_update_timestamp {
            return Err(self.illegal_transit(format!(
                "last update timestamp moved back from {} to {}",
                self.txn_last_update_timestamp, transit.txn_last_update_timestamp
            )));
        }
        transit.validate()?;

        debug!(
            transactional_id = %self.transactional_id,
            from = %self.state,
            to = %transit.state,
            "Completed transaction state transition"
        );

        self.producer_epoch = transit.producer_epoch;
        self.txn_timeout_ms = transit.txn_timeout_ms;
        self.state = transit.state;
        self.topic_partitions = transit.topic_partitions;
        self.txn_last_update_timestamp = transit.txn_last_update_timestamp;
        self.pending_state = None;
        Ok(())
    }

    /// Drop a pending transition, e.g. after the log append failed
    pub fn clear_pending(&mut self) {
        self.pending_state = None;
    }

    fn prepare(
        &mut self,
        target: TransactionState,
        topic_partitions: BTreeSet<TransactionPartition>,
        producer_epoch: ProducerEpoch,
        txn_timeout_ms: i32,
        now_ms: i64,
    ) -> Result<TxnTransitMetadata> {
        if now_ms < self.txn_last_update_timestamp {
            return Err(self.illegal_transit(format!(
                "update timestamp {} is before last update {}",
                now_ms, self.txn_last_update_timestamp
            )));
        }

        let mut transit = self.snapshot(target, topic_partitions, now_ms);
        transit.producer_epoch = producer_epoch;
        transit.txn_timeout_ms = txn_timeout_ms;
        transit.validate()?;

        debug!(
            transactional_id = %self.transactional_id,
            from = %self.state,
            to = %target,
            "Prepared transaction state transition"
        );
        self.pending_state = Some(target);
        Ok(transit)
    }

    fn snapshot(
        &self,
        state: TransactionState,
        topic_partitions: BTreeSet<TransactionPartition>,
        txn_last_update_timestamp: i64,
    ) -> TxnTransitMetadata {
        TxnTransitMetadata {
            transactional_id: self.transactional_id.clone(),
            producer_id: self.producer_id,
            producer_epoch: self.producer_epoch,
            txn_timeout_ms: self.txn_timeout_ms,
            state,
            topic_partitions,
            txn_last_update_timestamp,
        }
    }

    fn check_not_pending(&self) -> Result<()> {
        match self.pending_state {
            Some(pending) => Err(Error::ConcurrentTransition {
                transactional_id: self.transactional_id.clone(),
                pending,
            }),
            None => Ok(()),
        }
    }

    fn invalid_transition(&self, to: TransactionState) -> Error {
        Error::InvalidTransition {
            transactional_id: self.transactional_id.clone(),
            from: self.state,
            to,
        }
    }

    fn illegal_transit(&self, reason: impl Into<String>) -> Error {
        Error::IllegalTransitMetadata {
            transactional_id: self.transactional_id.clone(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partitions() -> Vec<TransactionPartition> {
        vec![
            TransactionPartition::new("topic1", 0),
            TransactionPartition::new("topic1", 1),
            TransactionPartition::new("topic2", 0),
        ]
    }

    fn metadata(state: TransactionState) -> TransactionMetadata {
        TransactionMetadata::new("txn-1", 1000, 0, 60000, state, 0)
    }

    #[test]
    fn test_add_partitions_collapses_duplicates() {
        let mut txn = metadata(TransactionState::Empty);
        txn.add_partitions(partitions());
        txn.add_partitions(partitions());
        assert_eq!(txn.topic_partitions.len(), 3);

        assert!(txn.remove_partition(&TransactionPartition::new("topic2", 0)));
        assert!(!txn.remove_partition(&TransactionPartition::new("topic2", 0)));
        assert_eq!(txn.topic_partitions.len(), 2);
    }

    #[test]
    fn test_snapshot_as_is_rejects_empty_with_partitions() {
        let mut txn = metadata(TransactionState::Empty);
        txn.add_partitions(partitions());

        let err = txn.prepare_snapshot_as_is().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: TransactionState::Empty,
                partitions: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_snapshot_as_is_skips_transition_check() {
        let mut txn = metadata(TransactionState::PrepareAbort);
        txn.add_partitions(partitions());

        let transit = txn.prepare_snapshot_as_is().unwrap();
        assert_eq!(transit.state, TransactionState::PrepareAbort);
        assert_eq!(transit.topic_partitions, txn.topic_partitions);
        assert_eq!(txn.pending_state(), None);
    }

    #[test]
    fn test_full_commit_lifecycle() {
        let mut txn = metadata(TransactionState::Empty);

        let transit = txn.prepare_add_partitions(partitions(), 10).unwrap();
        assert_eq!(txn.pending_state(), Some(TransactionState::Ongoing));
        assert_eq!(txn.state, TransactionState::Empty);
        txn.complete_transition(transit).unwrap();
        assert_eq!(txn.state, TransactionState::Ongoing);
        assert_eq!(txn.topic_partitions.len(), 3);

        let transit = txn
            .prepare_transition(TransactionState::PrepareCommit, 20)
            .unwrap();
        assert_eq!(transit.topic_partitions.len(), 3);
        txn.complete_transition(transit).unwrap();

        let transit = txn
            .prepare_transition(TransactionState::CompleteCommit, 30)
            .unwrap();
        assert!(transit.topic_partitions.is_empty());
        txn.complete_transition(transit).unwrap();

        assert_eq!(txn.state, TransactionState::CompleteCommit);
        assert!(txn.topic_partitions.is_empty());
        assert_eq!(txn.txn_last_update_timestamp, 30);
        assert_eq!(txn.pending_state(), None);
    }

    #[test]
    fn test_enlist_then_transition_from_empty() {
        let mut txn = metadata(TransactionState::Empty);
        txn.add_partitions(partitions());

        let transit = txn
            .prepare_transition(TransactionState::Ongoing, 5)
            .unwrap();
        assert_eq!(transit.state, TransactionState::Ongoing);
        assert_eq!(transit.topic_partitions.len(), 3);
    }

    #[test]
    fn test_invalid_transition_leaves_metadata_untouched() {
        let mut txn = metadata(TransactionState::Empty);
        let before = txn.clone();

        let err = txn
            .prepare_transition(TransactionState::PrepareCommit, 10)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: TransactionState::Empty,
                to: TransactionState::PrepareCommit,
                ..
            }
        ));
        assert_eq!(txn, before);

        assert!(txn.prepare_transition(TransactionState::Dead, 10).is_err());
        assert_eq!(txn, before);
    }

    #[test]
    fn test_concurrent_prepare_rejected() {
        let mut txn = metadata(TransactionState::Ongoing);
        txn.prepare_transition(TransactionState::PrepareAbort, 10)
            .unwrap();

        let err = txn
            .prepare_transition(TransactionState::PrepareCommit, 11)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConcurrentTransition {
                pending: TransactionState::PrepareAbort,
                ..
            }
        ));

        txn.clear_pending();
        assert!(txn
            .prepare_transition(TransactionState::PrepareCommit, 11)
            .is_ok());
    }

    #[test]
    fn test_complete_transition_checks() {
        let mut txn = metadata(TransactionState::Ongoing);
        let transit = txn.prepare_snapshot_as_is().unwrap();
        assert!(matches!(
            txn.complete_transition(transit),
            Err(Error::IllegalTransitMetadata { .. })
        ));

        let transit = txn
            .prepare_transition(TransactionState::PrepareCommit, 10)
            .unwrap();

        let mut wrong_state = transit.clone();
        wrong_state.state = TransactionState::PrepareAbort;
        assert!(txn.complete_transition(wrong_state).is_err());

        let mut wrong_producer = transit.clone();
        wrong_producer.producer_id = 7;
        assert!(txn.complete_transition(wrong_producer).is_err());

        let mut stale_epoch = transit.clone();
        stale_epoch.producer_epoch = -1;
        assert!(txn.complete_transition(stale_epoch).is_err());

        assert_eq!(txn.state, TransactionState::Ongoing);
        txn.complete_transition(transit).unwrap();
        assert_eq!(txn.state, TransactionState::PrepareCommit);
    }

    #[test]
    fn test_timestamp_cannot_move_back() {
        let mut txn =
            TransactionMetadata::new("txn-1", 1000, 0, 60000, TransactionState::Empty, 50);
        let err = txn
            .prepare_transition(TransactionState::Ongoing, 49)
            .unwrap_err();
        assert!(matches!(err, Error::IllegalTransitMetadata { .. }));
        assert_eq!(txn.pending_state(), None);
    }

    #[test]
    fn test_increment_producer_epoch() {
        let mut txn = metadata(TransactionState::CompleteAbort);
        let transit = txn.prepare_increment_producer_epoch(30000, 10).unwrap();
        assert_eq!(transit.producer_epoch, 1);
        assert_eq!(transit.txn_timeout_ms, 30000);
        assert_eq!(transit.state, TransactionState::CompleteAbort);
        txn.complete_transition(transit).unwrap();
        assert_eq!(txn.producer_epoch, 1);
        assert_eq!(txn.txn_timeout_ms, 30000);

        let mut exhausted = metadata(TransactionState::Empty);
        exhausted.producer_epoch = MAX_PRODUCER_EPOCH;
        assert!(matches!(
            exhausted.prepare_increment_producer_epoch(30000, 10),
            Err(Error::ProducerEpochExhausted { .. })
        ));

        let mut preparing = metadata(TransactionState::PrepareCommit);
        assert!(matches!(
            preparing.prepare_increment_producer_epoch(30000, 10),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_add_partitions_after_complete_starts_fresh() {
        let mut txn = metadata(TransactionState::CompleteCommit);
        let transit = txn
            .prepare_add_partitions(vec![TransactionPartition::new("topic3", 4)], 10)
            .unwrap();
        assert_eq!(transit.state, TransactionState::Ongoing);
        assert_eq!(transit.topic_partitions.len(), 1);

        let mut preparing = metadata(TransactionState::PrepareCommit);
        assert!(preparing.prepare_add_partitions(partitions(), 10).is_err());
    }

    #[test]
    fn test_snapshot_rejects_meaningless_fields() {
        let valid = metadata(TransactionState::Ongoing)
            .prepare_snapshot_as_is()
            .unwrap();

        let cases = [
            TxnTransitMetadata {
                transactional_id: String::new(),
                ..valid.clone()
            },
            TxnTransitMetadata {
                txn_timeout_ms: 0,
                ..valid.clone()
            },
            TxnTransitMetadata {
                txn_timeout_ms: -5,
                ..valid.clone()
            },
            TxnTransitMetadata {
                producer_epoch: -1,
                ..valid.clone()
            },
        ];
        for transit in cases {
            assert!(
                matches!(
                    transit.validate(),
                    Err(Error::IllegalTransitMetadata { .. })
                ),
                "{:?}",
                transit
            );
        }

        let mut txn = TransactionMetadata::new("", 1000, 0, 60000, TransactionState::Empty, 0);
        assert!(txn.prepare_snapshot_as_is().is_err());
        assert!(txn.prepare_transition(TransactionState::Ongoing, 1).is_err());
        assert_eq!(txn.pending_state(), None);
    }

    #[test]
    fn test_dead_snapshot_not_writable() {
        let txn = metadata(TransactionState::Dead);
        assert!(matches!(
            txn.prepare_snapshot_as_is(),
            Err(Error::IllegalTransitMetadata { .. })
        ));
    }
}
