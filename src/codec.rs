// ============================================================================
// Column Value Codec
// ============================================================================
//
// Column values are MessagePack documents behind a one-byte format version:
//
//   [format: u8][rmp payload ...]
//
// `FieldValue` serializes externally tagged, so every stored field keeps its
// type discriminator and all six variants decode back to the same variant.
//
// ============================================================================

use crate::core::{Field, Result, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const FORMAT_VERSION: u8 = 1;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = vec![FORMAT_VERSION];
    rmp_serde::encode::write(&mut out, value)?;
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    match bytes.split_first() {
        Some((&FORMAT_VERSION, payload)) => Ok(rmp_serde::from_slice(payload)?),
        Some((format, _)) => Err(StoreError::Serialization(format!(
            "unsupported column format {}",
            format
        ))),
        None => Err(StoreError::Serialization("empty column value".to_string())),
    }
}

/// Stored form of one entity version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum StoredEntity {
    Present(Vec<Field>),
    Deleted,
}

/// Encode a version's field set; `None` is a tombstone.
pub fn encode_entity(fields: Option<&[Field]>) -> Result<Vec<u8>> {
    let stored = match fields {
        Some(fields) => StoredEntity::Present(fields.to_vec()),
        None => StoredEntity::Deleted,
    };
    encode(&stored)
}

pub fn decode_entity(bytes: &[u8]) -> Result<Option<Vec<Field>>> {
    Ok(match decode::<StoredEntity>(bytes)? {
        StoredEntity::Present(fields) => Some(fields),
        StoredEntity::Deleted => None,
    })
}
