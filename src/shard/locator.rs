use super::hashing::{ShardKey, consistent_hash, hash_key};
use crate::core::{Result, StoreError};
use std::fmt;
use std::marker::PhantomData;

/// Deterministic key-to-bucket assignment for a fixed bucket count.
///
/// `get_bucket` is a pure function of `(key, bucket_count)`: it holds no state,
/// is safe to share across threads and gives the same answer in every process.
pub struct ShardLocator<K: ShardKey + ?Sized> {
    bucket_count: u32,
    _key: PhantomData<fn(&K)>,
}

impl<K: ShardKey + ?Sized> ShardLocator<K> {
    pub fn new(bucket_count: u32) -> Result<Self> {
        if bucket_count == 0 {
            return Err(StoreError::InvalidArgument(
                "bucket_count must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            bucket_count,
            _key: PhantomData,
        })
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    /// Returns the bucket of `key` in `[0, bucket_count)`.
    pub fn get_bucket(&self, key: &K) -> u32 {
        consistent_hash(hash_key(key) as u64, self.bucket_count)
    }
}

impl<K: ShardKey + ?Sized> Clone for ShardLocator<K> {
    fn clone(&self) -> Self {
        Self {
            bucket_count: self.bucket_count,
            _key: PhantomData,
        }
    }
}

impl<K: ShardKey + ?Sized> fmt::Debug for ShardLocator<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardLocator")
            .field("bucket_count", &self.bucket_count)
            .finish()
    }
}
