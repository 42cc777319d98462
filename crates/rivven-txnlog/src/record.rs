//! Wire-level key and value records of the transaction state log
//!
//! ```text
//! key:   [version:u16][transactional_id:string]
//! value: [version:u16][producer_id:i64][producer_epoch:i16][txn_timeout_ms:i32]
//!        [state:i8][count:i32]{count × [topic:string][partition:i32]}
//!        [txn_last_update_timestamp:i64]
//! string: [len:i16][utf-8 bytes]
//! ```
//!
//! All integers are big-endian. Any byte left over after the last field makes
//! the record malformed.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Key schema version emitted by writers
pub const TXN_KEY_CURRENT_VERSION: u16 = 0;

/// Value schema version emitted by writers
pub const TXN_VALUE_CURRENT_VERSION: u16 = 0;

/// Smallest encoded partition entry: empty topic (2) + partition (4)
const MIN_PARTITION_ENTRY_SIZE: usize = 6;

/// Fixed part of a value after the version: 8 + 2 + 4 + 1 + 4 + 8
const VALUE_FIXED_SIZE: usize = 27;

/// Decoded record key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnRecordKey {
    /// Key of a known schema version
    Txn { transactional_id: String },

    /// Key written by a newer schema; the record should be skipped
    Unknown { version: u16 },
}

impl TxnRecordKey {
    pub fn transactional_id(&self) -> Option<&str> {
        match self {
            TxnRecordKey::Txn { transactional_id } => Some(transactional_id.as_str()),
            TxnRecordKey::Unknown { .. } => None,
        }
    }
}

/// Key record body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLogKey {
    pub transactional_id: String,
}

impl TransactionLogKey {
    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        put_string(buf, &self.transactional_id)
    }

    pub fn read(buf: &mut &[u8]) -> Result<Self> {
        let transactional_id = get_string(buf, "transactional id")?;
        ensure_consumed(buf, "key")?;
        Ok(Self { transactional_id })
    }
}

/// One enlisted partition as written on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub topic: String,
    pub partition: i32,
}

/// Value record body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLogValue {
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub txn_timeout_ms: i32,
    pub state: i8,
    pub partitions: Vec<PartitionEntry>,
    pub txn_last_update_timestamp: i64,
}

impl TransactionLogValue {
    pub fn encoded_size(&self) -> usize {
        VALUE_FIXED_SIZE
            + self
                .partitions
                .iter()
                .map(|p| MIN_PARTITION_ENTRY_SIZE + p.topic.len())
                .sum::<usize>()
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        let count = i32::try_from(self.partitions.len()).map_err(|_| {
            Error::malformed(format!(
                "partition count {} exceeds int32",
                self.partitions.len()
            ))
        })?;

        buf.put_i64(self.producer_id);
        buf.put_i16(self.producer_epoch);
        buf.put_i32(self.txn_timeout_ms);
        buf.put_i8(self.state);
        buf.put_i32(count);
        for entry in &self.partitions {
            put_string(buf, &entry.topic)?;
            buf.put_i32(entry.partition);
        }
        buf.put_i64(self.txn_last_update_timestamp);
        Ok(())
    }

    /// Read a value body. `max_partitions` bounds the declared partition count.
    pub fn read(buf: &mut &[u8], max_partitions: usize) -> Result<Self> {
        ensure_remaining(buf, VALUE_FIXED_SIZE, "value")?;
        let producer_id = buf.get_i64();
        let producer_epoch = buf.get_i16();
        let txn_timeout_ms = buf.get_i32();
        let state = buf.get_i8();

        let count = buf.get_i32();
        if count < 0 {
            return Err(Error::malformed(format!(
                "negative partition count {}",
                count
            )));
        }
        let count = count as usize;
        if count > max_partitions {
            return Err(Error::malformed(format!(
                "partition count {} exceeds maximum {}",
                count, max_partitions
            )));
        }
        // The timestamp still follows the partition list
        let available = buf.remaining().saturating_sub(8);
        if count.saturating_mul(MIN_PARTITION_ENTRY_SIZE) > available {
            return Err(Error::malformed(format!(
                "partition count {} exceeds remaining {} bytes",
                count, available
            )));
        }

        let mut partitions = Vec::with_capacity(count);
        for _ in 0..count {
            let topic = get_string(buf, "topic")?;
            ensure_remaining(buf, 4, "partition index")?;
            let partition = buf.get_i32();
            partitions.push(PartitionEntry { topic, partition });
        }

        ensure_remaining(buf, 8, "last update timestamp")?;
        let txn_last_update_timestamp = buf.get_i64();
        ensure_consumed(buf, "value")?;

        Ok(Self {
            producer_id,
            producer_epoch,
            txn_timeout_ms,
            state,
            partitions,
            txn_last_update_timestamp,
        })
    }
}

/// Read the leading schema version of a key or value
pub fn read_version(buf: &mut &[u8], what: &str) -> Result<u16> {
    ensure_remaining(buf, 2, what)?;
    Ok(buf.get_u16())
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    let len = i16::try_from(s.len()).map_err(|_| {
        Error::malformed(format!("string of {} bytes exceeds int16 length", s.len()))
    })?;
    buf.put_i16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_string(buf: &mut &[u8], what: &str) -> Result<String> {
    ensure_remaining(buf, 2, what)?;
    let len = buf.get_i16();
    if len < 0 {
        return Err(Error::malformed(format!(
            "negative {} length {}",
            what, len
        )));
    }
    let len = len as usize;
    ensure_remaining(buf, len, what)?;

    let s = std::str::from_utf8(&buf[..len])
        .map_err(|e| Error::malformed(format!("{} is not valid UTF-8: {}", what, e)))?
        .to_string();
    buf.advance(len);
    Ok(s)
}

fn ensure_remaining(buf: &&[u8], needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(Error::malformed(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

fn ensure_consumed(buf: &&[u8], what: &str) -> Result<()> {
    if buf.has_remaining() {
        return Err(Error::malformed(format!(
            "{} trailing bytes after {}",
            buf.remaining(),
            what
        )));
    }
    Ok(())
}
