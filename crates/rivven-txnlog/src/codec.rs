//! Transaction log record codec
//!
//! Converts between [`TxnTransitMetadata`] snapshots and the versioned key
//! and value bytes appended to the transaction state log.
//!
//! Version handling differs between keys and values:
//! - a key with an unknown version decodes to [`TxnRecordKey::Unknown`] and
//!   replay skips the record;
//! - a value with an unknown version is a hard error.

use crate::config::DEFAULT_MAX_PARTITIONS_PER_RECORD;
use crate::error::{Error, Result};
use crate::metadata::{check_partitions, TransactionMetadata, TxnTransitMetadata};
use crate::record::{
    read_version, PartitionEntry, TransactionLogKey, TransactionLogValue, TxnRecordKey,
    TXN_KEY_CURRENT_VERSION, TXN_VALUE_CURRENT_VERSION,
};
use crate::state::{TransactionPartition, TransactionState};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Value rendering of a tombstone
pub const TOMBSTONE_MARKER: &str = "<DELETE>";

/// Encode the log key for a transactional-id
pub fn key_to_bytes(transactional_id: &str) -> Result<Bytes> {
    if transactional_id.is_empty() {
        return Err(Error::IllegalTransitMetadata {
            transactional_id: String::new(),
            reason: "transactional id must not be empty".to_string(),
        });
    }
    let key = TransactionLogKey {
        transactional_id: transactional_id.to_string(),
    };
    let mut buf = BytesMut::with_capacity(4 + transactional_id.len());
    buf.put_u16(TXN_KEY_CURRENT_VERSION);
    key.write(&mut buf)?;
    Ok(buf.freeze())
}

/// Encode a snapshot as a log value.
///
/// The snapshot is validated first; nothing is encoded for an invalid one.
/// At most [`DEFAULT_MAX_PARTITIONS_PER_RECORD`] partitions are accepted, the
/// same bound [`read_txn_record_value`] applies.
pub fn value_to_bytes(transit: &TxnTransitMetadata) -> Result<Bytes> {
    encode_value(transit, DEFAULT_MAX_PARTITIONS_PER_RECORD)
}

pub(crate) fn encode_value(
    transit: &TxnTransitMetadata,
    max_partitions: usize,
) -> Result<Bytes> {
    transit.validate()?;
    if transit.topic_partitions.len() > max_partitions {
        return Err(Error::TooManyPartitions {
            transactional_id: transit.transactional_id.clone(),
            partitions: transit.topic_partitions.len(),
            max: max_partitions,
        });
    }
    let state = transit.state.tag().ok_or_else(|| Error::IllegalTransitMetadata {
        transactional_id: transit.transactional_id.clone(),
        reason: format!("{} has no wire representation", transit.state),
    })?;

    let value = TransactionLogValue {
        producer_id: transit.producer_id,
        producer_epoch: transit.producer_epoch,
        txn_timeout_ms: transit.txn_timeout_ms,
        state,
        partitions: transit
            .topic_partitions
            .iter()
            .map(|tp| PartitionEntry {
                topic: tp.topic.clone(),
                partition: tp.partition,
            })
            .collect(),
        txn_last_update_timestamp: transit.txn_last_update_timestamp,
    };

    let mut buf = BytesMut::with_capacity(2 + value.encoded_size());
    buf.put_u16(TXN_VALUE_CURRENT_VERSION);
    value.write(&mut buf)?;
    Ok(buf.freeze())
}

/// Decode a log key, returning [`TxnRecordKey::Unknown`] for versions newer
/// than this codec understands.
pub fn read_txn_record_key(key: &[u8]) -> Result<TxnRecordKey> {
    let mut buf = key;
    let version = read_version(&mut buf, "key version")?;
    if version > TXN_KEY_CURRENT_VERSION {
        warn!(
            version,
            max = TXN_KEY_CURRENT_VERSION,
            "Skipping transaction log key with unknown version"
        );
        return Ok(TxnRecordKey::Unknown { version });
    }

    let key = TransactionLogKey::read(&mut buf)?;
    Ok(TxnRecordKey::Txn {
        transactional_id: key.transactional_id,
    })
}

/// Decode a log value into metadata. `None` means a tombstone: the
/// transactional-id has no persisted state.
pub fn read_txn_record_value(
    transactional_id: &str,
    value: Option<&[u8]>,
) -> Result<Option<TransactionMetadata>> {
    match value {
        None => {
            debug!(transactional_id, "Read tombstone for transactional id");
            Ok(None)
        }
        Some(bytes) => {
            decode_value(transactional_id, bytes, DEFAULT_MAX_PARTITIONS_PER_RECORD).map(Some)
        }
    }
}

pub(crate) fn decode_value(
    transactional_id: &str,
    bytes: &[u8],
    max_partitions: usize,
) -> Result<TransactionMetadata> {
    let mut buf = bytes;
    let version = read_version(&mut buf, "value version")?;
    if version > TXN_VALUE_CURRENT_VERSION {
        return Err(Error::UnsupportedValueVersion {
            version,
            max: TXN_VALUE_CURRENT_VERSION,
        });
    }

    let value = TransactionLogValue::read(&mut buf, max_partitions)?;
    let state = TransactionState::from_tag(value.state).ok_or_else(|| {
        Error::malformed(format!("unknown transaction state tag {}", value.state))
    })?;
    let topic_partitions: BTreeSet<TransactionPartition> = value
        .partitions
        .into_iter()
        .map(|entry| TransactionPartition::new(entry.topic, entry.partition))
        .collect();
    check_partitions(transactional_id, state, &topic_partitions)?;

    Ok(TransactionMetadata::from_parts(
        transactional_id.to_string(),
        value.producer_id,
        value.producer_epoch,
        value.txn_timeout_ms,
        state,
        topic_partitions,
        value.txn_last_update_timestamp,
    ))
}

/// Render a record for log inspection tools.
///
/// Keys of an unknown version render as `unknown::version=<v>` with no value.
pub fn format_record_key_and_value(
    key: &[u8],
    value: Option<&[u8]>,
) -> Result<(String, Option<String>)> {
    match read_txn_record_key(key)? {
        TxnRecordKey::Txn { transactional_id } => {
            let key_string = format!("transaction_metadata::transactionalId={}", transactional_id);
            let value_string = match read_txn_record_value(&transactional_id, value)? {
                Some(metadata) => format_metadata(&metadata),
                None => TOMBSTONE_MARKER.to_string(),
            };
            Ok((key_string, Some(value_string)))
        }
        TxnRecordKey::Unknown { version } => Ok((format!("unknown::version={}", version), None)),
    }
}

fn format_metadata(metadata: &TransactionMetadata) -> String {
    let partitions = metadata
        .topic_partitions
        .iter()
        .map(|tp| tp.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "producerId:{},producerEpoch:{},state={},partitions=[{}],txnLastUpdateTimestamp:={},txnTimeoutMs:={}",
        metadata.producer_id,
        metadata.producer_epoch,
        metadata.state,
        partitions,
        metadata.txn_last_update_timestamp,
        metadata.txn_timeout_ms
    )
}
