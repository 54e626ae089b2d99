use super::hashing::ShardKey;
use super::locator::ShardLocator;
use crate::core::{Result, StoreError};
use std::fmt;

/// Shard locators for every bucket count the keyspace has been written under.
///
/// Re-sharding is lazy: rows written under an older bucket count stay where
/// they are. Writers use the most recent count, readers probe one bucket per
/// historical count, so read fan-out is bounded by the number of epochs and not
/// by the number of buckets.
pub struct ExpandingShardLocator<K: ShardKey + ?Sized> {
    locators: Vec<ShardLocator<K>>,
}

impl<K: ShardKey + ?Sized> ExpandingShardLocator<K> {
    /// `bucket_counts` is ordered most recent first, e.g. `[8, 4, 2, 1]`.
    pub fn new(bucket_counts: &[u32]) -> Result<Self> {
        if bucket_counts.is_empty() {
            return Err(StoreError::InvalidArgument(
                "at least one bucket count is required".to_string(),
            ));
        }
        if bucket_counts.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(StoreError::InvalidArgument(format!(
                "bucket counts must be strictly descending, got {:?}",
                bucket_counts
            )));
        }

        let locators = bucket_counts
            .iter()
            .map(|count| ShardLocator::new(*count))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { locators })
    }

    pub fn bucket_counts(&self) -> Vec<u32> {
        self.locators.iter().map(|l| l.bucket_count()).collect()
    }

    pub fn epoch_count(&self) -> usize {
        self.locators.len()
    }

    /// Bucket under the most recent bucket count; all new writes go here.
    pub fn get_current_bucket(&self, key: &K) -> u32 {
        self.locators[0].get_bucket(key)
    }

    /// One bucket per configured bucket count, in configuration order.
    pub fn get_all_buckets(&self, key: &K) -> Vec<u32> {
        self.locators.iter().map(|l| l.get_bucket(key)).collect()
    }

    /// Buckets to probe physically: `get_all_buckets` without repeats,
    /// current bucket first.
    pub fn get_distinct_buckets(&self, key: &K) -> Vec<u32> {
        let mut buckets = Vec::with_capacity(self.locators.len());
        for bucket in self.get_all_buckets(key) {
            if !buckets.contains(&bucket) {
                buckets.push(bucket);
            }
        }
        buckets
    }
}

impl<K: ShardKey + ?Sized> Clone for ExpandingShardLocator<K> {
    fn clone(&self) -> Self {
        Self {
            locators: self.locators.clone(),
        }
    }
}

impl<K: ShardKey + ?Sized> fmt::Debug for ExpandingShardLocator<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpandingShardLocator")
            .field("bucket_counts", &self.bucket_counts())
            .finish()
    }
}
