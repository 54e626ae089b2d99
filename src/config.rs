use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Replica agreement requested from the column store for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Consistency {
    One,
    #[default]
    Quorum,
    All,
}

/// Store configuration
///
/// Built once at startup and handed to `EntityStore::new`. Every value here is
/// fixed for the life of the store except the executor's worker count, which
/// can be changed through `TaskExecutor::set_max_workers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name of the task executor, used in spans and rejection messages
    pub executor_name: String,

    /// Maximum number of concurrently running tasks
    pub max_workers: usize,

    /// Number of admitted tasks allowed to wait for a worker (0 = reject when busy)
    pub queue_capacity: usize,

    /// Historical shard bucket counts, most recent first
    pub bucket_counts: Vec<u32>,

    /// Time-to-live of unique value claims written before commit
    #[serde(with = "duration_ms")]
    pub unique_claim_ttl: Duration,

    /// Consistency for reads
    pub read_consistency: Consistency,

    /// Consistency for writes
    pub write_consistency: Consistency,

    /// Maximum log versions scanned when resolving the latest committed version
    pub log_scan_limit: usize,

    /// Maximum versions loaded to build a change log
    pub history_limit: usize,

    /// Delete losing duplicate claims found while loading unique values
    pub read_repair: bool,
}

impl StoreConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self {
            executor_name: "mvcc-store".to_string(),
            max_workers: 100,
            queue_capacity: 0,
            bucket_counts: vec![1],
            unique_claim_ttl: Duration::from_secs(10),
            read_consistency: Consistency::Quorum,
            write_consistency: Consistency::Quorum,
            log_scan_limit: 100,
            history_limit: 1000,
            read_repair: true,
        }
    }

    /// Parse a JSON document; missing keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| format!("Invalid store config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the executor name
    pub fn executor_name(mut self, name: &str) -> Self {
        self.executor_name = name.to_string();
        self
    }

    /// Set maximum concurrently running tasks
    pub fn max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Set the bounded queue size
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set shard bucket counts, most recent first
    pub fn bucket_counts(mut self, counts: Vec<u32>) -> Self {
        self.bucket_counts = counts;
        self
    }

    /// Set unique claim TTL (zero disables expiry)
    pub fn unique_claim_ttl(mut self, ttl: Duration) -> Self {
        self.unique_claim_ttl = ttl;
        self
    }

    /// Set read consistency
    pub fn read_consistency(mut self, consistency: Consistency) -> Self {
        self.read_consistency = consistency;
        self
    }

    /// Set write consistency
    pub fn write_consistency(mut self, consistency: Consistency) -> Self {
        self.write_consistency = consistency;
        self
    }

    /// Set log scan limit
    pub fn log_scan_limit(mut self, limit: usize) -> Self {
        self.log_scan_limit = limit;
        self
    }

    /// Set history limit
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Enable or disable unique value read repair
    pub fn read_repair(mut self, enabled: bool) -> Self {
        self.read_repair = enabled;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.executor_name.trim().is_empty() {
            return Err("executor_name cannot be empty".to_string());
        }

        if self.max_workers == 0 {
            return Err("max_workers must be > 0".to_string());
        }

        if self.bucket_counts.is_empty() {
            return Err("bucket_counts cannot be empty".to_string());
        }

        if self.bucket_counts.contains(&0) {
            return Err("bucket_counts must all be > 0".to_string());
        }

        if self.bucket_counts.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err("bucket_counts must be strictly descending (most recent first)".to_string());
        }

        if self.log_scan_limit == 0 {
            return Err("log_scan_limit must be > 0".to_string());
        }

        if self.history_limit == 0 {
            return Err("history_limit must be > 0".to_string());
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.max_workers, 100);
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.bucket_counts, vec![1]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = StoreConfig::new()
            .executor_name("unique-verify")
            .max_workers(8)
            .queue_capacity(16)
            .bucket_counts(vec![8, 4, 2, 1])
            .unique_claim_ttl(Duration::from_millis(250))
            .read_repair(false);

        assert_eq!(config.executor_name, "unique-verify");
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.bucket_counts, vec![8, 4, 2, 1]);
        assert_eq!(config.unique_claim_ttl, Duration::from_millis(250));
        assert!(!config.read_repair);
    }

    #[test]
    fn test_validate() {
        assert!(StoreConfig::new().max_workers(0).validate().is_err());
        assert!(StoreConfig::new().bucket_counts(vec![]).validate().is_err());
        assert!(StoreConfig::new().bucket_counts(vec![4, 0]).validate().is_err());
        assert!(StoreConfig::new().bucket_counts(vec![2, 4]).validate().is_err());
        assert!(StoreConfig::new().bucket_counts(vec![4, 4]).validate().is_err());
        assert!(StoreConfig::new().log_scan_limit(0).validate().is_err());
        assert!(StoreConfig::new().bucket_counts(vec![16, 8]).validate().is_ok());
    }

    #[test]
    fn test_from_json_keeps_defaults() {
        let config = StoreConfig::from_json(
            r#"{ "max_workers": 4, "bucket_counts": [8, 4], "unique_claim_ttl": 1500, "read_consistency": "One" }"#,
        )
        .unwrap();

        assert_eq!(config.max_workers, 4);
        assert_eq!(config.bucket_counts, vec![8, 4]);
        assert_eq!(config.unique_claim_ttl, Duration::from_millis(1500));
        assert_eq!(config.read_consistency, Consistency::One);
        assert_eq!(config.write_consistency, Consistency::Quorum);
        assert_eq!(config.history_limit, 1000);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(StoreConfig::from_json(r#"{ "bucket_counts": [1, 2] }"#).is_err());
        assert!(StoreConfig::from_json("not json").is_err());
    }
}
