// ============================================================================
// Unique Value Rows
// ============================================================================
//
// unique_values     key  = scope + field name + tagged field value
//                   col  = owner uuid + owner type + version   (empty value)
//
// unique_value_log  key  = scope + entity id
//                   col  = version + field name               (encoded field)
//
// Claims are written with a TTL and rewritten without one when the owning
// version commits, so an abandoned write releases its claims by itself.
//
// When a value row holds claims of several entities (concurrent claims in
// different shard epochs), the entity with the oldest id owns the value.
//
// ============================================================================

use super::value::{UniqueValue, UniqueValueSet};
use crate::codec;
use crate::config::StoreConfig;
use crate::core::scope::write_str;
use crate::core::{CollectionScope, Field, Id, Result, StoreError, Version};
use crate::mvcc::entity_partition;
use crate::storage::{ColumnFamily, ColumnRange, Keyspace, MutationBatch, RowCondition};
use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct UniqueValueSerialization {
    keyspace: Arc<Keyspace>,
    claim_ttl: Duration,
    read_repair: bool,
}

impl UniqueValueSerialization {
    pub fn new(keyspace: Arc<Keyspace>, config: &StoreConfig) -> Self {
        Self {
            keyspace,
            claim_ttl: config.unique_claim_ttl,
            read_repair: config.read_repair,
        }
    }

    /// Write a provisional claim. The value row is only touched when every
    /// claim already in it belongs to the same entity.
    ///
    /// Returns `false` when another entity holds the value in the current
    /// bucket.
    pub async fn write(&self, scope: &CollectionScope, value: &UniqueValue) -> Result<bool> {
        let mut log_batch = self.keyspace.batch()?;
        log_batch.put_with_ttl(
            self.log_row(scope, value.entity_id()),
            log_column(value.entity_version(), value.field().name()),
            codec::encode(value.field())?,
            self.claim_ttl,
        );
        self.keyspace.execute(log_batch).await?;

        let row = self
            .keyspace
            .write_row(ColumnFamily::UniqueValues, &value_partition(scope, value.field()));
        let mut batch = self.keyspace.batch()?;
        batch.put_with_ttl(row.clone(), claim_column(value), Vec::new(), self.claim_ttl);

        let condition = RowCondition::OwnedBy(owner_prefix(value.entity_id()));
        self.keyspace.check_and_mutate(&row, condition, batch).await
    }

    /// Queue the permanent form of a claim.
    pub fn confirm_mutation(
        &self,
        batch: &mut MutationBatch,
        scope: &CollectionScope,
        value: &UniqueValue,
    ) -> Result<()> {
        let row = self
            .keyspace
            .write_row(ColumnFamily::UniqueValues, &value_partition(scope, value.field()));
        batch.put(row, claim_column(value), Vec::new());
        batch.put(
            self.log_row(scope, value.entity_id()),
            log_column(value.entity_version(), value.field().name()),
            codec::encode(value.field())?,
        );
        Ok(())
    }

    /// Queue removal of a claim and its log entry from every shard epoch.
    pub fn delete_mutation(
        &self,
        batch: &mut MutationBatch,
        scope: &CollectionScope,
        value: &UniqueValue,
    ) {
        self.keyspace.delete_column_everywhere(
            batch,
            ColumnFamily::UniqueValues,
            &value_partition(scope, value.field()),
            &claim_column(value),
        );
        self.keyspace.delete_column_everywhere(
            batch,
            ColumnFamily::UniqueValueLog,
            &entity_partition(scope, value.entity_id()),
            &log_column(value.entity_version(), value.field().name()),
        );
    }

    pub async fn delete(&self, scope: &CollectionScope, value: &UniqueValue) -> Result<()> {
        let mut batch = self.keyspace.batch()?;
        self.delete_mutation(&mut batch, scope, value);
        self.keyspace.execute(batch).await
    }

    /// Remove several claims in one batch.
    pub async fn delete_all(&self, scope: &CollectionScope, values: &[UniqueValue]) -> Result<()> {
        let mut batch = self.keyspace.batch()?;
        for value in values {
            self.delete_mutation(&mut batch, scope, value);
        }
        self.keyspace.execute(batch).await
    }

    /// Current owner of `field`'s value, repairing duplicates when enabled.
    pub async fn load(&self, scope: &CollectionScope, field: &Field) -> Result<Option<UniqueValue>> {
        self.load_with(scope, field, self.read_repair).await
    }

    /// Current owner of `field`'s value without touching the row.
    pub async fn load_unrepaired(
        &self,
        scope: &CollectionScope,
        field: &Field,
    ) -> Result<Option<UniqueValue>> {
        self.load_with(scope, field, false).await
    }

    pub async fn load_set(&self, scope: &CollectionScope, fields: &[Field]) -> Result<UniqueValueSet> {
        let mut set = UniqueValueSet::new();
        for field in fields {
            if let Some(value) = self.load(scope, field).await? {
                set.insert(value);
            }
        }
        Ok(set)
    }

    /// Every claim `id` has written and not released, oldest version first.
    pub async fn load_all_for_entity(
        &self,
        scope: &CollectionScope,
        id: &Id,
    ) -> Result<Vec<UniqueValue>> {
        let columns = self
            .keyspace
            .read(
                ColumnFamily::UniqueValueLog,
                &entity_partition(scope, id),
                &ColumnRange::all(),
            )
            .await?;

        columns
            .iter()
            .map(|column| {
                let version = parse_version(&column.name)?;
                let field: Field = codec::decode(&column.value)?;
                Ok(UniqueValue::new(field, id.clone(), version))
            })
            .collect()
    }

    async fn load_with(
        &self,
        scope: &CollectionScope,
        field: &Field,
        repair: bool,
    ) -> Result<Option<UniqueValue>> {
        let partition = value_partition(scope, field);
        let columns = self
            .keyspace
            .read(ColumnFamily::UniqueValues, &partition, &ColumnRange::all())
            .await?;

        // Ordered by id; time-ordered ids put the oldest entity first.
        let mut owners: BTreeMap<Id, OwnerClaims> = BTreeMap::new();
        for column in columns {
            let (owner, version) = parse_claim_column(&column.name)?;
            let claims = owners.entry(owner).or_insert_with(|| OwnerClaims {
                latest: version,
                columns: Vec::new(),
            });
            claims.latest = claims.latest.max(version);
            claims.columns.push(column.name);
        }

        let mut owners = owners.into_iter();
        let Some((winner, claims)) = owners.next() else {
            return Ok(None);
        };

        if repair {
            let mut batch = self.keyspace.batch()?;
            for (loser, loser_claims) in owners {
                warn!(
                    "Duplicate unique value {} in {} owned by {}; removing newer claim of {} at version {}",
                    field, scope, winner, loser, loser_claims.latest
                );
                for name in loser_claims.columns {
                    self.keyspace.delete_column_everywhere(
                        &mut batch,
                        ColumnFamily::UniqueValues,
                        &partition,
                        &name,
                    );
                }
            }
            self.keyspace.execute(batch).await?;
        }

        Ok(Some(UniqueValue::new(field.clone(), winner, claims.latest)))
    }

    fn log_row(&self, scope: &CollectionScope, id: &Id) -> crate::storage::RowKey {
        self.keyspace
            .write_row(ColumnFamily::UniqueValueLog, &entity_partition(scope, id))
    }
}

struct OwnerClaims {
    latest: Version,
    columns: Vec<Vec<u8>>,
}

fn value_partition(scope: &CollectionScope, field: &Field) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    scope.write_key_bytes(&mut key);
    write_str(&mut key, field.name());
    field.value().write_key_bytes(&mut key);
    key
}

fn owner_prefix(id: &Id) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(32);
    prefix.extend_from_slice(id.uuid().as_bytes());
    write_str(&mut prefix, id.entity_type());
    prefix
}

fn claim_column(value: &UniqueValue) -> Vec<u8> {
    let mut name = owner_prefix(value.entity_id());
    name.extend_from_slice(value.entity_version().as_bytes());
    name
}

fn parse_claim_column(name: &[u8]) -> Result<(Id, Version)> {
    let malformed = || StoreError::Serialization(format!("malformed claim column ({} bytes)", name.len()));

    let uuid = name.get(..16).ok_or_else(malformed)?;
    let len_bytes: [u8; 4] = name
        .get(16..20)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(malformed)?;
    let type_end = 20 + u32::from_be_bytes(len_bytes) as usize;
    let entity_type = name.get(20..type_end).ok_or_else(malformed)?;
    let version = name.get(type_end..).ok_or_else(malformed)?;

    let uuid = Uuid::from_slice(uuid).map_err(|_| malformed())?;
    let entity_type = std::str::from_utf8(entity_type).map_err(|_| malformed())?;
    let version = parse_version(version)?;
    if version.as_bytes().len() != name.len() - type_end {
        return Err(malformed());
    }
    Ok((Id::new(uuid, entity_type), version))
}

fn log_column(version: Version, field_name: &str) -> Vec<u8> {
    let mut name = version.as_bytes().to_vec();
    name.extend_from_slice(field_name.as_bytes());
    name
}

/// Version in the first 16 bytes of a column name.
fn parse_version(name: &[u8]) -> Result<Version> {
    let bytes: [u8; 16] = name
        .get(..16)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StoreError::Serialization("column name too short for a version".to_string()))?;
    Ok(Version::from_bytes(bytes))
}
