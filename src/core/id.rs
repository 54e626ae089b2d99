// ============================================================================
// Identity and Version
// ============================================================================
//
// Both entity ids and entity versions are UUIDv7 values: a 48-bit unix
// millisecond timestamp, a 12-bit counter and a random tail. Byte order is
// time order, so comparing two values compares their creation time.
//
// ============================================================================

use super::{Result, StoreError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use uuid::{Builder, Uuid};

/// Largest value of the 12-bit counter packed after the timestamp.
const MAX_COUNTER: u16 = 0x0fff;

/// Identifies an entity across all of its versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id {
    uuid: Uuid,
    entity_type: String,
}

impl Id {
    pub fn new(uuid: Uuid, entity_type: impl Into<String>) -> Self {
        Self {
            uuid,
            entity_type: entity_type.into(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Rejects ids that cannot be persisted.
    pub fn validate(&self) -> Result<()> {
        if self.uuid.is_nil() {
            return Err(StoreError::InvalidArgument(
                "entity id uuid must not be nil".to_string(),
            ));
        }
        if self.entity_type.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "entity id type must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.uuid)
    }
}

/// A time-ordered version of an entity. Later versions compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(Uuid);

impl Version {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Version(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Version(Uuid::from_bytes(bytes))
    }

    /// Unix milliseconds embedded in the version.
    pub fn timestamp_millis(&self) -> u64 {
        let bytes = self.0.as_bytes();
        let mut millis = [0u8; 8];
        millis[2..].copy_from_slice(&bytes[..6]);
        u64::from_be_bytes(millis)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_millis() as i64)
            .single()
            .unwrap_or_default()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic generator of time-ordered UUIDs.
///
/// Within one millisecond the 12-bit counter is incremented; when it would
/// overflow, the clock borrows the next millisecond so the sequence never
/// goes backwards, even if the wall clock does.
#[derive(Debug, Default)]
pub struct VersionClock {
    state: Mutex<ClockState>,
}

#[derive(Debug, Default)]
struct ClockState {
    last_millis: u64,
    counter: u16,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new version, strictly greater than every earlier one.
    pub fn next_version(&self) -> Result<Version> {
        Ok(Version(self.next_uuid()?))
    }

    /// Allocates a new entity id of the given type.
    pub fn next_id(&self, entity_type: impl Into<String>) -> Result<Id> {
        Ok(Id::new(self.next_uuid()?, entity_type))
    }

    fn next_uuid(&self) -> Result<Uuid> {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let (millis, counter) = {
            let mut state = self.state.lock()?;
            if now > state.last_millis {
                state.last_millis = now;
                state.counter = 0;
            } else if state.counter >= MAX_COUNTER {
                state.last_millis += 1;
                state.counter = 0;
            } else {
                state.counter += 1;
            }
            (state.last_millis, state.counter)
        };

        // Counter occupies the 12 bits after the version nibble; the rest is random.
        let random = Uuid::new_v4();
        let mut tail = [0u8; 10];
        tail.copy_from_slice(&random.as_bytes()[6..]);
        tail[0] = (counter >> 8) as u8;
        tail[1] = (counter & 0xff) as u8;

        Ok(Builder::from_unix_timestamp_millis(millis, &tail).into_uuid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_strictly_increase() {
        let clock = VersionClock::new();
        let mut previous = clock.next_version().unwrap();
        for _ in 0..10_000 {
            let next = clock.next_version().unwrap();
            assert!(next > previous, "{} must be greater than {}", next, previous);
            previous = next;
        }
    }

    #[test]
    fn test_version_is_v7_with_current_timestamp() {
        let clock = VersionClock::new();
        let before = Utc::now().timestamp_millis() as u64;
        let version = clock.next_version().unwrap();
        let after = Utc::now().timestamp_millis() as u64;

        assert_eq!(version.as_uuid().get_version_num(), 7);
        // The clock may borrow a few milliseconds on counter overflow, never fewer.
        assert!(version.timestamp_millis() >= before);
        assert!(version.timestamp_millis() <= after + 1);
    }

    #[test]
    fn test_version_bytes_round_trip() {
        let clock = VersionClock::new();
        let version = clock.next_version().unwrap();
        assert_eq!(Version::from_bytes(*version.as_bytes()), version);
    }

    #[test]
    fn test_id_validation() {
        assert!(Id::new(Uuid::nil(), "user").validate().is_err());
        assert!(Id::new(Uuid::new_v4(), "  ").validate().is_err());
        assert!(Id::new(Uuid::new_v4(), "user").validate().is_ok());
    }

    #[test]
    fn test_id_display() {
        let id = Id::new(Uuid::nil(), "user");
        assert_eq!(id.to_string(), "user:00000000-0000-0000-0000-000000000000");
    }
}
