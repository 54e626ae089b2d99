// ============================================================================
// Shard Location
// ============================================================================
//
// Consistent-hash bucket assignment for arbitrary keys, plus the expanding
// variant that remembers every historical bucket count.
//
// ============================================================================

pub mod expanding;
pub mod hashing;
pub mod locator;

pub use expanding::ExpandingShardLocator;
pub use hashing::{ShardKey, consistent_hash, hash_key};
pub use locator::ShardLocator;
