pub mod entity;
pub mod log;
pub mod versions;

pub use entity::{EntityData, MvccEntity};
pub use self::log::{LogState, MvccLogEntry, Stage, VersionLog};
pub use versions::EntityVersionStore;

use crate::core::scope::write_str;
use crate::core::{CollectionScope, Id};

/// Partition key of every per-entity row: scope prefix + id.
pub(crate) fn entity_partition(scope: &CollectionScope, id: &Id) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    scope.write_key_bytes(&mut key);
    key.extend_from_slice(id.uuid().as_bytes());
    write_str(&mut key, id.entity_type());
    key
}
