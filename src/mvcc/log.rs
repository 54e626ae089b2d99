// ============================================================================
// Version Log
// ============================================================================
//
// Write-ahead log of entity writes. Every write attempt appends two entries
// to the entity's log row:
//
//   begin_write   ACTIVE    before any entity data or unique claim
//   commit_write  COMPLETE  after entity data and every claim succeeded
//
// Column name = version (16 bytes) + stage ordinal (1 byte), so both entries
// of a version sit side by side and a reversed slice yields newest versions
// first. A version with ACTIVE but no COMPLETE never happened as far as
// readers are concerned.
//
// ============================================================================

use super::entity_partition;
use crate::codec;
use crate::core::{CollectionScope, Id, Result, StoreError, Version, VersionClock};
use crate::storage::{ColumnFamily, ColumnRange, Keyspace, MutationBatch};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{Level, event};

/// Stage of a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Active,
    Complete,
}

impl Stage {
    pub fn ordinal(&self) -> u8 {
        match self {
            Stage::Active => 0,
            Stage::Complete => 1,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Result<Self> {
        match ordinal {
            0 => Ok(Stage::Active),
            1 => Ok(Stage::Complete),
            other => Err(StoreError::Serialization(format!(
                "unknown log stage {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Active => write!(f, "ACTIVE"),
            Stage::Complete => write!(f, "COMPLETE"),
        }
    }
}

/// What the version holds once its write finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogState {
    /// Write in progress (ACTIVE entries)
    Partial,
    /// Entity data written
    Complete,
    /// Tombstone written
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvccLogEntry {
    pub entity_id: Id,
    pub version: Version,
    pub stage: Stage,
    pub state: LogState,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogValue {
    stage: Stage,
    state: LogState,
}

fn column_name(version: Version, stage: Stage) -> Vec<u8> {
    let mut name = Vec::with_capacity(17);
    name.extend_from_slice(version.as_bytes());
    name.push(stage.ordinal());
    name
}

fn parse_column_name(name: &[u8]) -> Result<(Version, Stage)> {
    if name.len() != 17 {
        return Err(StoreError::Serialization(format!(
            "log column name has {} bytes, expected 17",
            name.len()
        )));
    }
    let mut version = [0u8; 16];
    version.copy_from_slice(&name[..16]);
    Ok((Version::from_bytes(version), Stage::from_ordinal(name[16])?))
}

pub struct VersionLog {
    keyspace: Arc<Keyspace>,
    clock: Arc<VersionClock>,
    scan_limit: usize,
}

impl VersionLog {
    pub fn new(keyspace: Arc<Keyspace>, clock: Arc<VersionClock>, scan_limit: usize) -> Self {
        Self {
            keyspace,
            clock,
            scan_limit,
        }
    }

    /// Allocate a version for `id` and durably record its ACTIVE entry.
    pub async fn begin_write(&self, scope: &CollectionScope, id: &Id) -> Result<Version> {
        let version = self.clock.next_version()?;
        let mut batch = self.keyspace.batch()?;
        self.entry_mutation(&mut batch, scope, id, version, Stage::Active, LogState::Partial)?;
        self.keyspace.execute(batch).await?;

        event!(Level::DEBUG, entity = %id, version = %version, "write started");
        Ok(version)
    }

    /// Record the COMPLETE entry of a version whose ACTIVE entry exists.
    pub async fn commit_write(
        &self,
        scope: &CollectionScope,
        id: &Id,
        version: Version,
        state: LogState,
    ) -> Result<()> {
        let mut batch = self.keyspace.batch()?;
        self.commit_mutation(&mut batch, scope, id, version, state)?;
        self.commit_batch(scope, id, version, batch).await
    }

    /// Execute a batch carrying a COMPLETE entry, after checking that the
    /// version was begun.
    pub async fn commit_batch(
        &self,
        scope: &CollectionScope,
        id: &Id,
        version: Version,
        batch: MutationBatch,
    ) -> Result<()> {
        let stages = self.load_version(scope, id, version).await?;
        if !stages.iter().any(|entry| entry.stage == Stage::Active) {
            return Err(StoreError::NotFound(format!(
                "no ACTIVE log entry for {} at version {}",
                id, version
            )));
        }
        self.keyspace.execute(batch).await?;

        event!(Level::DEBUG, entity = %id, version = %version, "write committed");
        Ok(())
    }

    /// Queue the COMPLETE entry of `version` into `batch`.
    pub fn commit_mutation(
        &self,
        batch: &mut MutationBatch,
        scope: &CollectionScope,
        id: &Id,
        version: Version,
        state: LogState,
    ) -> Result<()> {
        if state == LogState::Partial {
            return Err(StoreError::InvalidArgument(
                "a COMPLETE entry cannot be partial".to_string(),
            ));
        }
        self.entry_mutation(batch, scope, id, version, Stage::Complete, state)
    }

    fn entry_mutation(
        &self,
        batch: &mut MutationBatch,
        scope: &CollectionScope,
        id: &Id,
        version: Version,
        stage: Stage,
        state: LogState,
    ) -> Result<()> {
        let row = self
            .keyspace
            .write_row(ColumnFamily::LogEntries, &entity_partition(scope, id));
        let value = codec::encode(&LogValue { stage, state })?;
        batch.put(row, column_name(version, stage), value);
        Ok(())
    }

    /// Log entries of the newest `max_versions` versions, newest first; within
    /// a version COMPLETE precedes ACTIVE.
    pub async fn load_log(
        &self,
        scope: &CollectionScope,
        id: &Id,
        max_versions: usize,
    ) -> Result<Vec<MvccLogEntry>> {
        let range = ColumnRange::all().reversed().limit(max_versions.saturating_mul(2));
        let columns = self
            .keyspace
            .read(ColumnFamily::LogEntries, &entity_partition(scope, id), &range)
            .await?;

        let mut entries = Vec::with_capacity(columns.len());
        let mut versions_seen = 0;
        for column in columns {
            let entry = self.parse_entry(id, &column.name, &column.value)?;
            let new_version = entries
                .last()
                .is_none_or(|last: &MvccLogEntry| last.version != entry.version);
            if new_version {
                if versions_seen == max_versions {
                    break;
                }
                versions_seen += 1;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Entries of a single version.
    pub async fn load_version(
        &self,
        scope: &CollectionScope,
        id: &Id,
        version: Version,
    ) -> Result<Vec<MvccLogEntry>> {
        let range = ColumnRange::prefix(version.as_bytes());
        let columns = self
            .keyspace
            .read(ColumnFamily::LogEntries, &entity_partition(scope, id), &range)
            .await?;
        columns
            .iter()
            .map(|column| self.parse_entry(id, &column.name, &column.value))
            .collect()
    }

    /// Committed versions, newest first, skipping incomplete writes among the
    /// newest `max_versions + scan_limit` versions.
    pub async fn committed_versions(
        &self,
        scope: &CollectionScope,
        id: &Id,
        max_versions: usize,
    ) -> Result<Vec<(Version, LogState)>> {
        let entries = self
            .load_log(scope, id, max_versions.saturating_add(self.scan_limit))
            .await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.stage == Stage::Complete)
            .map(|entry| (entry.version, entry.state))
            .take(max_versions)
            .collect())
    }

    /// Newest committed version within the scan limit.
    pub async fn load_latest_committed(
        &self,
        scope: &CollectionScope,
        id: &Id,
    ) -> Result<Option<(Version, LogState)>> {
        let entries = self.load_log(scope, id, self.scan_limit).await?;
        Ok(entries
            .into_iter()
            .find(|entry| entry.stage == Stage::Complete)
            .map(|entry| (entry.version, entry.state)))
    }

    /// `NotFound` for an unknown version, `IncompleteWrite` for a version that
    /// was begun but never committed.
    pub async fn verify_committed(
        &self,
        scope: &CollectionScope,
        id: &Id,
        version: Version,
    ) -> Result<LogState> {
        let entries = self.load_version(scope, id, version).await?;
        if let Some(complete) = entries.iter().find(|e| e.stage == Stage::Complete) {
            return Ok(complete.state);
        }
        if entries.is_empty() {
            Err(StoreError::NotFound(format!("{} at version {}", id, version)))
        } else {
            Err(StoreError::IncompleteWrite {
                id: id.clone(),
                version,
            })
        }
    }

    /// Queue removal of both entries of `version` from every shard epoch.
    pub fn remove_mutation(
        &self,
        batch: &mut MutationBatch,
        scope: &CollectionScope,
        id: &Id,
        version: Version,
    ) {
        let key = entity_partition(scope, id);
        for stage in [Stage::Active, Stage::Complete] {
            self.keyspace.delete_column_everywhere(
                batch,
                ColumnFamily::LogEntries,
                &key,
                &column_name(version, stage),
            );
        }
    }

    /// Remove both entries of `version`, used to roll back a failed write.
    pub async fn remove(&self, scope: &CollectionScope, id: &Id, version: Version) -> Result<()> {
        let mut batch = self.keyspace.batch()?;
        self.remove_mutation(&mut batch, scope, id, version);
        self.keyspace.execute(batch).await
    }

    fn parse_entry(&self, id: &Id, name: &[u8], value: &[u8]) -> Result<MvccLogEntry> {
        let (version, stage) = parse_column_name(name)?;
        let stored: LogValue = codec::decode(value)?;
        if stored.stage != stage {
            return Err(StoreError::Serialization(format!(
                "log entry {} of {} stored as {} under a {} column",
                version, id, stored.stage, stage
            )));
        }
        Ok(MvccLogEntry {
            entity_id: id.clone(),
            version,
            stage,
            state: stored.state,
        })
    }
}
