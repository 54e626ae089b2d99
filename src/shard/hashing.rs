// ============================================================================
// Shard Key Hashing
// ============================================================================
//
// Keys are funnelled into a byte sink, hashed with XXH3-128 and the low 64
// bits are fed to a jump consistent hash. Growing the bucket count from
// n - 1 to n moves a key to bucket n - 1 with probability 1/n and leaves it
// where it was otherwise.
//
// ============================================================================

use crate::core::{Id, scope::write_str};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_128;

/// Multiplier of the linear congruential generator driving the jumps.
const LCG_MULTIPLIER: u64 = 2_862_933_555_777_941_757;

/// 2^31, the range of the generator's 31-bit output.
const LCG_RANGE: f64 = 2_147_483_648.0;

/// A value that can be located on a shard.
///
/// Implementations must write the same bytes on every platform and in every
/// process, otherwise a key would be located differently by different readers.
pub trait ShardKey {
    fn funnel(&self, sink: &mut Vec<u8>);
}

impl ShardKey for [u8] {
    fn funnel(&self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(self);
    }
}

impl ShardKey for Vec<u8> {
    fn funnel(&self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(self);
    }
}

impl ShardKey for str {
    fn funnel(&self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(self.as_bytes());
    }
}

impl ShardKey for String {
    fn funnel(&self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(self.as_bytes());
    }
}

impl ShardKey for u64 {
    fn funnel(&self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(&self.to_be_bytes());
    }
}

impl ShardKey for Uuid {
    fn funnel(&self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(self.as_bytes());
    }
}

impl ShardKey for Id {
    fn funnel(&self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(self.uuid().as_bytes());
        write_str(sink, self.entity_type());
    }
}

impl<T: ShardKey + ?Sized> ShardKey for &T {
    fn funnel(&self, sink: &mut Vec<u8>) {
        (**self).funnel(sink)
    }
}

/// 128-bit non-cryptographic hash of a key.
pub fn hash_key<K: ShardKey + ?Sized>(key: &K) -> u128 {
    let mut bytes = Vec::with_capacity(64);
    key.funnel(&mut bytes);
    xxh3_128(&bytes)
}

/// Assigns `input` to a bucket in `[0, buckets)` with minimal movement when
/// `buckets` grows. `buckets == 0` is treated as a single bucket.
pub fn consistent_hash(input: u64, buckets: u32) -> u32 {
    if buckets <= 1 {
        return 0;
    }

    let mut state = input;
    let mut candidate: i64 = 0;
    loop {
        state = state.wrapping_mul(LCG_MULTIPLIER).wrapping_add(1);
        let draw = ((state >> 33) as f64 + 1.0) / LCG_RANGE;
        let next = ((candidate + 1) as f64 / draw) as i64;
        if next >= 0 && next < buckets as i64 {
            candidate = next;
        } else {
            return candidate as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_bucket_is_always_zero() {
        for input in [0u64, 1, 42, u64::MAX] {
            assert_eq!(consistent_hash(input, 1), 0);
            assert_eq!(consistent_hash(input, 0), 0);
        }
    }

    #[test]
    fn test_result_in_range() {
        for input in 0..10_000u64 {
            let h = hash_key(&input) as u64;
            for buckets in [2u32, 3, 7, 64, 1000] {
                assert!(consistent_hash(h, buckets) < buckets);
            }
        }
    }

    #[test]
    fn test_growth_only_moves_to_new_bucket() {
        for input in 0..10_000u64 {
            let h = hash_key(&input) as u64;
            for n in 2u32..20 {
                let before = consistent_hash(h, n - 1);
                let after = consistent_hash(h, n);
                assert!(after == before || after == n - 1);
            }
        }
    }

    #[test]
    fn test_hash_key_is_deterministic_and_type_sensitive() {
        assert_eq!(hash_key("user-1"), hash_key(&"user-1".to_string()));
        assert_ne!(hash_key("user-1"), hash_key("user-2"));

        let uuid = Uuid::from_u128(99);
        assert_ne!(
            hash_key(&Id::new(uuid, "user")),
            hash_key(&Id::new(uuid, "group"))
        );
    }
}
