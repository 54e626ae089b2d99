use super::collection::EntityCollectionManager;
use crate::changelog::ChangeLogGenerator;
use crate::config::StoreConfig;
use crate::core::{CollectionScope, Result, StoreError, VersionClock};
use crate::executor::TaskExecutor;
use crate::mvcc::{EntityVersionStore, VersionLog};
use crate::storage::{ColumnStore, Keyspace};
use crate::unique::{UniqueValueEnforcer, UniqueValueSerialization};
use std::sync::Arc;
use tracing::{Level, event};

/// Entry point: one per backend, shared by every collection.
///
/// Owns the task executor, the version clock and the shard-aware keyspace.
/// Cloning is cheap.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub(crate) config: StoreConfig,
    pub(crate) executor: TaskExecutor,
    pub(crate) keyspace: Arc<Keyspace>,
    pub(crate) clock: Arc<VersionClock>,
    pub(crate) log: VersionLog,
    pub(crate) versions: EntityVersionStore,
    pub(crate) unique: UniqueValueEnforcer,
    pub(crate) changelog: ChangeLogGenerator,
}

impl EntityStore {
    pub fn new(config: StoreConfig, backend: Arc<dyn ColumnStore>) -> Result<Self> {
        config.validate().map_err(StoreError::InvalidArgument)?;

        let executor = TaskExecutor::from_config(&config)?;
        let keyspace = Arc::new(Keyspace::new(backend, executor.clone(), &config)?);
        let clock = Arc::new(VersionClock::new());
        let serialization = Arc::new(UniqueValueSerialization::new(keyspace.clone(), &config));

        event!(
            Level::INFO,
            executor = %config.executor_name,
            max_workers = config.max_workers,
            bucket_counts = ?config.bucket_counts,
            "entity store started"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                log: VersionLog::new(keyspace.clone(), clock.clone(), config.log_scan_limit),
                versions: EntityVersionStore::new(keyspace.clone()),
                unique: UniqueValueEnforcer::new(serialization, executor.clone()),
                changelog: ChangeLogGenerator::new(),
                config,
                executor,
                keyspace,
                clock,
            }),
        })
    }

    /// Manager for one collection scope.
    pub fn collection(&self, scope: CollectionScope) -> Result<EntityCollectionManager> {
        scope.validate()?;
        Ok(EntityCollectionManager::new(self.inner.clone(), scope))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.inner.executor
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.inner.keyspace
    }

    pub fn unique_values(&self) -> &UniqueValueEnforcer {
        &self.inner.unique
    }

    pub fn version_log(&self) -> &VersionLog {
        &self.inner.log
    }

    pub fn clock(&self) -> &Arc<VersionClock> {
        &self.inner.clock
    }

    /// Stop accepting executor work. Calls in flight finish.
    pub fn shutdown(&self) {
        self.inner.executor.shutdown();
    }
}
