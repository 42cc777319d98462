use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default maximum encoded record size (key + value)
pub const DEFAULT_MAX_RECORD_SIZE: usize = 1024 * 1024; // 1 MiB

/// Default maximum number of partitions a single value may declare
pub const DEFAULT_MAX_PARTITIONS_PER_RECORD: usize = 100_000;

/// Configuration for the transaction state log codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnLogConfig {
    /// Maximum encoded size of a key plus value
    pub max_record_size: usize,

    /// Upper bound on the partition count accepted when decoding a value
    pub max_partitions_per_record: usize,
}

impl Default for TxnLogConfig {
    fn default() -> Self {
        Self {
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            max_partitions_per_record: DEFAULT_MAX_PARTITIONS_PER_RECORD,
        }
    }
}

impl TxnLogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_record_size(mut self, max_record_size: usize) -> Self {
        self.max_record_size = max_record_size;
        self
    }

    pub fn with_max_partitions_per_record(mut self, max_partitions: usize) -> Self {
        self.max_partitions_per_record = max_partitions;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_record_size == 0 {
            return Err(Error::InvalidConfig(
                "max_record_size must be greater than 0".to_string(),
            ));
        }
        if self.max_partitions_per_record == 0 {
            return Err(Error::InvalidConfig(
                "max_partitions_per_record must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TxnLogConfig::default();
        assert_eq!(config.max_record_size, 1024 * 1024);
        assert_eq!(config.max_partitions_per_record, 100_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = TxnLogConfig::new()
            .with_max_record_size(4096)
            .with_max_partitions_per_record(16);

        assert_eq!(config.max_record_size, 4096);
        assert_eq!(config.max_partitions_per_record, 16);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = TxnLogConfig::new().with_max_record_size(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = TxnLogConfig::new().with_max_partitions_per_record(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: TxnLogConfig = serde_json::from_str(r#"{"max_record_size": 2048}"#).unwrap();
        assert_eq!(config.max_record_size, 2048);
        assert_eq!(
            config.max_partitions_per_record,
            DEFAULT_MAX_PARTITIONS_PER_RECORD
        );

        let json = serde_json::to_string(&config).unwrap();
        let back: TxnLogConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
