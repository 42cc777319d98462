//! Transaction state log collaborator
//!
//! The storage layer appends what [`TransactionLog::encode`] produces and
//! feeds records back through [`TransactionLog::decode`] or
//! [`TransactionLog::replay`] when a coordinator loads its partition of the
//! log.

use crate::codec::{decode_value, encode_value, key_to_bytes, read_txn_record_key};
use crate::config::TxnLogConfig;
use crate::error::{Error, Result};
use crate::metadata::{TransactionMetadata, TxnTransitMetadata};
use crate::record::TxnRecordKey;
use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, info};

/// A decoded transaction log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnLogRecord {
    /// Persisted state of a transactional-id
    Transaction {
        transactional_id: String,
        metadata: TransactionMetadata,
    },

    /// The transactional-id has no persisted state
    Tombstone { transactional_id: String },

    /// Key of a newer schema version; the value was not inspected
    Unknown { version: u16 },
}

/// Result of replaying a sequence of log records
#[derive(Debug, Default)]
pub struct ReplayedTransactions {
    /// Latest live state per transactional-id
    pub transactions: HashMap<String, TransactionMetadata>,

    /// Total records read
    pub records: usize,

    /// Records that were tombstones
    pub tombstones: usize,

    /// Records skipped because of an unknown key version
    pub skipped: usize,
}

/// Encodes snapshots for appending and decodes records on replay
#[derive(Debug, Clone, Default)]
pub struct TransactionLog {
    config: TxnLogConfig,
}

impl TransactionLog {
    pub fn new(config: TxnLogConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TxnLogConfig {
        &self.config
    }

    /// Encode a record for `transactional_id`. `None` produces a tombstone.
    ///
    /// Values are held to the same partition limit [`TransactionLog::decode`]
    /// applies, so every record this log accepts can be replayed.
    pub fn encode(
        &self,
        transactional_id: &str,
        transit: Option<&TxnTransitMetadata>,
    ) -> Result<(Bytes, Option<Bytes>)> {
        let value = match transit {
            Some(transit) => {
                if transit.transactional_id != transactional_id {
                    return Err(Error::IllegalTransitMetadata {
                        transactional_id: transactional_id.to_string(),
                        reason: format!(
                            "snapshot belongs to {}",
                            transit.transactional_id
                        ),
                    });
                }
                Some(encode_value(
                    transit,
                    self.config.max_partitions_per_record,
                )?)
            }
            None => None,
        };
        let key = key_to_bytes(transactional_id)?;

        let size = key.len() + value.as_ref().map(|v| v.len()).unwrap_or(0);
        if size > self.config.max_record_size {
            return Err(Error::RecordTooLarge {
                size,
                max: self.config.max_record_size,
            });
        }
        Ok((key, value))
    }

    /// Decode one record
    pub fn decode(&self, key: &[u8], value: Option<&[u8]>) -> Result<TxnLogRecord> {
        let transactional_id = match read_txn_record_key(key)? {
            TxnRecordKey::Txn { transactional_id } => transactional_id,
            TxnRecordKey::Unknown { version } => return Ok(TxnLogRecord::Unknown { version }),
        };

        match value {
            Some(bytes) => {
                let metadata = decode_value(
                    &transactional_id,
                    bytes,
                    self.config.max_partitions_per_record,
                )?;
                Ok(TxnLogRecord::Transaction {
                    transactional_id,
                    metadata,
                })
            }
            None => {
                debug!(transactional_id = %transactional_id, "Decoded transaction log tombstone");
                Ok(TxnLogRecord::Tombstone { transactional_id })
            }
        }
    }

    /// Fold records in log order into the latest state per transactional-id.
    ///
    /// Later records replace earlier ones and tombstones remove, matching what
    /// compaction would retain. A decode error aborts the replay.
    pub fn replay<K, V>(
        &self,
        records: impl IntoIterator<Item = (K, Option<V>)>,
    ) -> Result<ReplayedTransactions>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut replayed = ReplayedTransactions::default();

        for (key, value) in records {
            replayed.records += 1;
            let value: Option<&[u8]> = value.as_ref().map(|v| v.as_ref());
            match self.decode(key.as_ref(), value)? {
                TxnLogRecord::Transaction {
                    transactional_id,
                    metadata,
                } => {
                    replayed.transactions.insert(transactional_id, metadata);
                }
                TxnLogRecord::Tombstone { transactional_id } => {
                    replayed.tombstones += 1;
                    replayed.transactions.remove(&transactional_id);
                }
                TxnLogRecord::Unknown { .. } => {
                    replayed.skipped += 1;
                }
            }
        }

        info!(
            records = replayed.records,
            live = replayed.transactions.len(),
            tombstones = replayed.tombstones,
            skipped = replayed.skipped,
            "Replayed transaction state log"
        );
        Ok(replayed)
    }
}
