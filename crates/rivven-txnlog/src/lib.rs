//! Rivven Transaction State Log
//!
//! Persists the authoritative state of transactional producers into a
//! compacted log and rebuilds it on load. This crate covers two pieces:
//!
//! - **Metadata state machine** ([`TransactionMetadata`]): decides which
//!   combinations of producer id/epoch, timeout, partitions and state may be
//!   written, and produces immutable [`TxnTransitMetadata`] snapshots.
//! - **Record codec** ([`codec`]): versioned key/value encoding, tombstones,
//!   forward-compatible key decoding and a stable text rendering for log
//!   inspection tools.
//!
//! # Protocol Stability
//!
//! State tags, field order and the diagnostic text format are a
//! compatibility surface. Changing any of them breaks existing logs.
//!
//! # Example
//!
//! ```rust
//! use rivven_txnlog::{TransactionLog, TransactionMetadata, TransactionPartition, TransactionState};
//!
//! let log = TransactionLog::default();
//! let mut txn = TransactionMetadata::new("payments", 1000, 0, 60_000, TransactionState::Empty, 0);
//!
//! let transit = txn
//!     .prepare_add_partitions(vec![TransactionPartition::new("orders", 0)], 10)
//!     .unwrap();
//! let (key, value) = log.encode("payments", Some(&transit)).unwrap();
//! txn.complete_transition(transit).unwrap();
//!
//! let replayed = log.replay(vec![(key, value)]).unwrap();
//! assert_eq!(replayed.transactions["payments"], txn);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod log;
pub mod metadata;
pub mod record;
pub mod state;

pub use codec::{
    format_record_key_and_value, key_to_bytes, read_txn_record_key, read_txn_record_value,
    value_to_bytes, TOMBSTONE_MARKER,
};
pub use config::TxnLogConfig;
pub use error::{Error, Result};
pub use log::{ReplayedTransactions, TransactionLog, TxnLogRecord};
pub use metadata::{
    ProducerEpoch, ProducerId, TransactionMetadata, TxnTransitMetadata, MAX_PRODUCER_EPOCH,
    NO_PRODUCER_ID,
};
pub use record::{TxnRecordKey, TXN_KEY_CURRENT_VERSION, TXN_VALUE_CURRENT_VERSION};
pub use state::{TransactionPartition, TransactionState};
