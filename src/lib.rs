// ============================================================================
// MvccStore Library
// ============================================================================

pub mod changelog;
pub mod codec;
pub mod config;
pub mod core;
pub mod executor;
pub mod mvcc;
pub mod shard;
pub mod storage;
pub mod store;
pub mod unique;

// Re-export main types for convenience
pub use changelog::{ChangeLogEntry, ChangeLogGenerator, ChangeType};
pub use config::{Consistency, StoreConfig};
pub use crate::core::{
    CollectionScope, Field, FieldValue, Id, Result, StoreError, Version, VersionClock,
};
pub use executor::{ForkedTask, Task, TaskContext, TaskExecutor, TaskHandle, TaskState};
pub use mvcc::{EntityData, LogState, MvccEntity, MvccLogEntry, Stage};
pub use shard::{ExpandingShardLocator, ShardLocator};
pub use storage::{ColumnStore, InMemoryColumnStore};
pub use store::{EntityCollectionManager, EntityStore};
pub use unique::{UniqueValue, UniqueValueEnforcer};

/// Build a store over an in-memory column store with default configuration.
///
/// # Examples
///
/// ```
/// use mvccstore::{CollectionScope, Field, Id};
///
/// # tokio_test::block_on(async {
/// let store = mvccstore::in_memory()?;
/// let app = Id::new(uuid::Uuid::now_v7(), "application");
/// let users = store.collection(CollectionScope::new(uuid::Uuid::now_v7(), app, "users"))?;
///
/// let (id, v1) = users
///     .create("user", vec![Field::unique("email", "ann@example.com")])
///     .await?;
/// let latest = users.load(&id, None).await?;
/// assert_eq!(latest.version(), v1);
/// # Ok::<(), mvccstore::StoreError>(())
/// # }).unwrap();
/// ```
pub fn in_memory() -> Result<EntityStore> {
    EntityStore::new(
        StoreConfig::new(),
        std::sync::Arc::new(InMemoryColumnStore::new()),
    )
}
