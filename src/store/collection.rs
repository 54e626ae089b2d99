// ============================================================================
// Entity Collection Manager
// ============================================================================
//
// Write path:
//
//   begin_write          ACTIVE log entry, new version
//   claim_all            unique claims (TTL), rolled back on Conflict
//   entity row           field set of the new version
//   commit               claims confirmed + COMPLETE entry, one batch
//   release superseded   claims written by older versions
//
// Any failure before commit removes the ACTIVE entry, so the attempt never
// becomes readable. Reads only see versions with a COMPLETE entry.
//
// ============================================================================

use super::entity_store::StoreInner;
use crate::changelog::ChangeLogEntry;
use crate::core::{CollectionScope, Field, Id, Result, StoreError, Version};
use crate::mvcc::{EntityData, LogState, MvccEntity};
use crate::unique::UniqueValue;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Caller-facing operations on the entities of one collection scope.
#[derive(Clone)]
pub struct EntityCollectionManager {
    store: Arc<StoreInner>,
    scope: CollectionScope,
}

impl EntityCollectionManager {
    pub(crate) fn new(store: Arc<StoreInner>, scope: CollectionScope) -> Self {
        Self { store, scope }
    }

    pub fn scope(&self) -> &CollectionScope {
        &self.scope
    }

    /// Allocate a new id of `entity_type` and write its first version.
    pub async fn create(
        &self,
        entity_type: impl Into<String>,
        fields: Vec<Field>,
    ) -> Result<(Id, Version)> {
        let id = self.store.clock.next_id(entity_type)?;
        let version = self.write(&id, fields).await?;
        Ok((id, version))
    }

    /// Write a new version of `id` holding exactly `fields`.
    ///
    /// Fails with `Conflict` when a unique field's value is owned by another
    /// entity; nothing of the attempt stays visible.
    pub async fn write(&self, id: &Id, fields: Vec<Field>) -> Result<Version> {
        let span = info_span!("entity.write", scope = %self.scope, entity = %id);
        self.write_inner(id, fields).instrument(span).await
    }

    async fn write_inner(&self, id: &Id, fields: Vec<Field>) -> Result<Version> {
        id.validate()?;
        let data = EntityData::from_fields(fields)?;

        let version = self.store.log.begin_write(&self.scope, id).await?;
        let claims: Vec<UniqueValue> = data
            .unique_fields()
            .map(|field| UniqueValue::new(field.clone(), id.clone(), version))
            .collect();

        if let Err(err) = self.store.unique.claim_all(&self.scope, claims.clone()).await {
            self.abandon(id, version, &[]).await;
            event!(Level::DEBUG, version = %version, error = %err, "write rejected by unique check");
            return Err(err);
        }

        let entity = MvccEntity::new(id.clone(), version, Some(data));
        if let Err(err) = self.persist_and_commit(&entity, &claims, LogState::Complete).await {
            self.abandon(id, version, &claims).await;
            event!(Level::ERROR, version = %version, error = %err, "write failed before commit");
            return Err(err);
        }

        if let Err(err) = self.release_superseded(id, version).await {
            event!(Level::WARN, version = %version, error = %err, "failed to release superseded claims");
        }

        event!(Level::DEBUG, version = %version, "entity written");
        Ok(version)
    }

    /// Entity data, then confirmed claims and the COMPLETE entry together.
    async fn persist_and_commit(
        &self,
        entity: &MvccEntity,
        claims: &[UniqueValue],
        state: LogState,
    ) -> Result<()> {
        self.store.versions.write(&self.scope, entity).await?;

        let mut batch = self.store.keyspace.batch()?;
        for claim in claims {
            self.store
                .unique
                .serialization()
                .confirm_mutation(&mut batch, &self.scope, claim)?;
        }
        self.store
            .log
            .commit_mutation(&mut batch, &self.scope, entity.id(), entity.version(), state)?;
        self.store
            .log
            .commit_batch(&self.scope, entity.id(), entity.version(), batch)
            .await
    }

    /// Best-effort cleanup of a failed attempt. Claims left behind expire.
    async fn abandon(&self, id: &Id, version: Version, claims: &[UniqueValue]) {
        if let Err(err) = self.store.unique.serialization().delete_all(&self.scope, claims).await {
            event!(Level::WARN, version = %version, error = %err, "failed to release claims of abandoned write");
        }
        if let Err(err) = self.store.log.remove(&self.scope, id, version).await {
            event!(Level::WARN, version = %version, error = %err, "failed to remove ACTIVE entry");
        }
    }

    /// Release claims written by versions before `version`. Values the new
    /// version still holds keep its own claim.
    async fn release_superseded(&self, id: &Id, version: Version) -> Result<()> {
        let serialization = self.store.unique.serialization();
        let stale: Vec<UniqueValue> = serialization
            .load_all_for_entity(&self.scope, id)
            .await?
            .into_iter()
            .filter(|claim| claim.entity_version() < version)
            .collect();

        if !stale.is_empty() {
            event!(Level::DEBUG, released = stale.len(), "releasing superseded claims");
            serialization.delete_all(&self.scope, &stale).await?;
        }
        Ok(())
    }

    /// Load `version` of `id`, or its latest committed version when `None`.
    ///
    /// Versions that were begun but never committed are `NotFound`. The
    /// returned entity is a tombstone when the version marks a delete.
    pub async fn load(&self, id: &Id, version: Option<Version>) -> Result<MvccEntity> {
        let span = info_span!("entity.load", scope = %self.scope, entity = %id);
        self.load_inner(id, version).instrument(span).await
    }

    async fn load_inner(&self, id: &Id, version: Option<Version>) -> Result<MvccEntity> {
        let version = match version {
            Some(version) => match self.store.log.verify_committed(&self.scope, id, version).await {
                Ok(_) => version,
                Err(StoreError::IncompleteWrite { .. }) => {
                    return Err(not_found(id, Some(version)));
                }
                Err(err) => return Err(err),
            },
            None => match self.store.log.load_latest_committed(&self.scope, id).await? {
                Some((version, _)) => version,
                None => return Err(not_found(id, None)),
            },
        };

        self.store
            .versions
            .load(&self.scope, id, version)
            .await?
            .ok_or_else(|| not_found(id, Some(version)))
    }

    /// Up to `max_versions` committed versions, newest first.
    pub async fn load_history(&self, id: &Id, max_versions: usize) -> Result<Vec<MvccEntity>> {
        let span = info_span!("entity.load_history", scope = %self.scope, entity = %id);
        async {
            let committed = self
                .store
                .log
                .committed_versions(&self.scope, id, max_versions)
                .await?;
            let versions: Vec<Version> = committed.into_iter().map(|(v, _)| v).collect();
            self.store.versions.load_many(&self.scope, id, &versions).await
        }
        .instrument(span)
        .await
    }

    /// Field changes of `id` up to and including `target`.
    pub async fn get_change_log(&self, id: &Id, target: Version) -> Result<Vec<ChangeLogEntry>> {
        let span = info_span!("entity.change_log", scope = %self.scope, entity = %id);
        async {
            let mut history = self.load_history(id, self.store.config.history_limit).await?;
            history.reverse();
            self.store.changelog.get_change_log(&history, target)
        }
        .instrument(span)
        .await
    }

    /// Physically remove one version: its entity row column, both log entries
    /// and the claims it wrote.
    ///
    /// Removing the newest committed version makes the one before it current
    /// again, so that version's unique values are claimed back first. Fails
    /// with `Conflict`, deleting nothing, when another entity has taken one of
    /// them since.
    pub async fn delete(&self, id: &Id, version: Version) -> Result<()> {
        let span = info_span!("entity.delete", scope = %self.scope, entity = %id, version = %version);
        async {
            let entries = self.store.log.load_version(&self.scope, id, version).await?;
            let stored = self.store.versions.load(&self.scope, id, version).await?;
            if entries.is_empty() && stored.is_none() {
                return Err(not_found(id, Some(version)));
            }

            let reclaimed = self.reclaim_previous(id, version).await?;

            let serialization = self.store.unique.serialization();
            let claims: Vec<UniqueValue> = serialization
                .load_all_for_entity(&self.scope, id)
                .await?
                .into_iter()
                .filter(|claim| claim.entity_version() == version)
                .collect();

            let mut batch = self.store.keyspace.batch()?;
            self.store.versions.delete_mutation(&mut batch, &self.scope, id, version);
            self.store.log.remove_mutation(&mut batch, &self.scope, id, version);
            for claim in &claims {
                serialization.delete_mutation(&mut batch, &self.scope, claim);
            }
            for claim in &reclaimed {
                serialization.confirm_mutation(&mut batch, &self.scope, claim)?;
            }
            self.store.keyspace.execute(batch).await?;

            event!(
                Level::DEBUG,
                released = claims.len(),
                reclaimed = reclaimed.len(),
                "version deleted"
            );
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Provisional claims for the version that becomes current once `version`
    /// is removed. Empty unless `version` is the newest committed one.
    async fn reclaim_previous(&self, id: &Id, version: Version) -> Result<Vec<UniqueValue>> {
        let committed = self.store.log.committed_versions(&self.scope, id, 2).await?;
        let (previous, state) = match committed.as_slice() {
            [(newest, _), previous] if *newest == version => *previous,
            _ => return Ok(Vec::new()),
        };
        if state == LogState::Deleted {
            return Ok(Vec::new());
        }

        let Some(entity) = self.store.versions.load(&self.scope, id, previous).await? else {
            return Ok(Vec::new());
        };
        let claims: Vec<UniqueValue> = entity
            .entity()
            .map(|data| {
                data.unique_fields()
                    .map(|field| UniqueValue::new(field.clone(), id.clone(), previous))
                    .collect()
            })
            .unwrap_or_default();

        self.store.unique.claim_all(&self.scope, claims.clone()).await?;
        Ok(claims)
    }

    /// Write a tombstone version and release every unique claim of `id`.
    pub async fn mark_deleted(&self, id: &Id) -> Result<Version> {
        let span = info_span!("entity.mark_deleted", scope = %self.scope, entity = %id);
        async {
            id.validate()?;
            let version = self.store.log.begin_write(&self.scope, id).await?;
            let tombstone = MvccEntity::tombstone(id.clone(), version);
            if let Err(err) = self.persist_and_commit(&tombstone, &[], LogState::Deleted).await {
                self.abandon(id, version, &[]).await;
                return Err(err);
            }

            // The tombstone is committed; a failed release only leaves claims behind
            if let Err(err) = self.release_superseded(id, version).await {
                event!(Level::WARN, version = %version, error = %err, "failed to release claims of deleted entity");
            }

            event!(Level::DEBUG, version = %version, "entity marked deleted");
            Ok(version)
        }
        .instrument(span)
        .await
    }

    /// Current owner of a unique field value in this collection.
    pub async fn load_unique(&self, field: &Field) -> Result<Option<UniqueValue>> {
        self.store.unique.load(&self.scope, field).await
    }
}

fn not_found(id: &Id, version: Option<Version>) -> StoreError {
    match version {
        Some(version) => StoreError::NotFound(format!("{} at version {}", id, version)),
        None => StoreError::NotFound(format!("{} has no committed version", id)),
    }
}
