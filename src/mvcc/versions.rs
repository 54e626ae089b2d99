use super::entity::{EntityData, MvccEntity};
use super::entity_partition;
use crate::codec;
use crate::core::{CollectionScope, Id, Result, StoreError, Version};
use crate::storage::{Column, ColumnFamily, ColumnRange, Keyspace, MutationBatch};
use std::sync::Arc;

/// Entity-version rows: one row per entity, one column per version.
pub struct EntityVersionStore {
    keyspace: Arc<Keyspace>,
}

impl EntityVersionStore {
    pub fn new(keyspace: Arc<Keyspace>) -> Self {
        Self { keyspace }
    }

    /// Queue the snapshot into `batch`.
    pub fn write_mutation(
        &self,
        batch: &mut MutationBatch,
        scope: &CollectionScope,
        entity: &MvccEntity,
    ) -> Result<()> {
        let fields = entity
            .entity()
            .map(|data| data.fields().cloned().collect::<Vec<_>>());
        let value = codec::encode_entity(fields.as_deref())?;
        let row = self
            .keyspace
            .write_row(ColumnFamily::EntityVersions, &entity_partition(scope, entity.id()));
        batch.put(row, entity.version().as_bytes().to_vec(), value);
        Ok(())
    }

    pub async fn write(&self, scope: &CollectionScope, entity: &MvccEntity) -> Result<()> {
        let mut batch = self.keyspace.batch()?;
        self.write_mutation(&mut batch, scope, entity)?;
        self.keyspace.execute(batch).await
    }

    pub async fn load(
        &self,
        scope: &CollectionScope,
        id: &Id,
        version: Version,
    ) -> Result<Option<MvccEntity>> {
        let range = ColumnRange::prefix(version.as_bytes());
        let columns = self
            .keyspace
            .read(ColumnFamily::EntityVersions, &entity_partition(scope, id), &range)
            .await?;
        match columns.first() {
            Some(column) => Ok(Some(decode_column(id, column)?)),
            None => Ok(None),
        }
    }

    /// Load the given versions in the given order, skipping missing ones.
    pub async fn load_many(
        &self,
        scope: &CollectionScope,
        id: &Id,
        versions: &[Version],
    ) -> Result<Vec<MvccEntity>> {
        if versions.is_empty() {
            return Ok(Vec::new());
        }

        let (Some(oldest), Some(newest)) = (versions.iter().min(), versions.iter().max()) else {
            return Ok(Vec::new());
        };
        let range = ColumnRange {
            start: Some(oldest.as_bytes().to_vec()),
            end: ColumnRange::prefix(newest.as_bytes()).end,
            reversed: false,
            limit: None,
        };
        let columns = self
            .keyspace
            .read(ColumnFamily::EntityVersions, &entity_partition(scope, id), &range)
            .await?;

        let mut loaded = Vec::with_capacity(versions.len());
        for version in versions {
            if let Some(column) = columns.iter().find(|c| c.name == version.as_bytes()) {
                loaded.push(decode_column(id, column)?);
            }
        }
        Ok(loaded)
    }

    /// Queue removal of one version from every shard epoch.
    pub fn delete_mutation(
        &self,
        batch: &mut MutationBatch,
        scope: &CollectionScope,
        id: &Id,
        version: Version,
    ) {
        self.keyspace.delete_column_everywhere(
            batch,
            ColumnFamily::EntityVersions,
            &entity_partition(scope, id),
            version.as_bytes(),
        );
    }
}

fn decode_column(id: &Id, column: &Column) -> Result<MvccEntity> {
    let bytes: [u8; 16] = column.name.as_slice().try_into().map_err(|_| {
        StoreError::Serialization(format!(
            "entity column name of {} has {} bytes, expected 16",
            id,
            column.name.len()
        ))
    })?;
    let entity = codec::decode_entity(&column.value)?
        .map(EntityData::from_fields)
        .transpose()?;
    Ok(MvccEntity::new(id.clone(), Version::from_bytes(bytes), entity))
}
