//! Transaction log error types

use crate::state::TransactionState;
use thiserror::Error;

/// Result type for transaction log operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transaction log errors
#[derive(Debug, Error)]
pub enum Error {
    // ==================== State Machine Errors ====================
    /// The cross-field invariant is violated: the state must not hold partitions
    #[error(
        "invalid transaction state for {transactional_id}: {state} must not hold partitions, found {partitions}"
    )]
    InvalidState {
        transactional_id: String,
        state: TransactionState,
        partitions: usize,
    },

    #[error("invalid transition for {transactional_id}: {from} -> {to}")]
    InvalidTransition {
        transactional_id: String,
        from: TransactionState,
        to: TransactionState,
    },

    #[error("concurrent transition for {transactional_id}: {pending} is already pending")]
    ConcurrentTransition {
        transactional_id: String,
        pending: TransactionState,
    },

    #[error("illegal transit metadata for {transactional_id}: {reason}")]
    IllegalTransitMetadata {
        transactional_id: String,
        reason: String,
    },

    #[error("producer epoch exhausted for {transactional_id} (producer {producer_id})")]
    ProducerEpochExhausted {
        transactional_id: String,
        producer_id: i64,
    },

    // ==================== Codec Errors ====================
    #[error("unsupported transaction log value version {version}, max known is {max}")]
    UnsupportedValueVersion { version: u16, max: u16 },

    #[error("malformed transaction log record: {0}")]
    MalformedBytes(String),

    #[error("record size {size} exceeds maximum {max}")]
    RecordTooLarge { size: usize, max: usize },

    #[error("too many partitions for {transactional_id}: {partitions} exceeds maximum {max}")]
    TooManyPartitions {
        transactional_id: String,
        partitions: usize,
        max: usize,
    },

    // ==================== Configuration Errors ====================
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedBytes(msg.into())
    }
}
