//! Unique value tests
//!
//! Claim, conflict, release and expiry of unique field values
//! Run with: cargo test --test unique_value_tests

use async_trait::async_trait;
use futures::FutureExt;
use mvccstore::executor::ClosureTask;
use mvccstore::storage::{
    Column, ColumnFamily, ColumnRange, Mutation, MutationBatch, RowCondition, RowKey,
};
use mvccstore::{
    CollectionScope, ColumnStore, Consistency, EntityCollectionManager, EntityStore, Field, Id,
    InMemoryColumnStore, StoreConfig, StoreError, UniqueValue,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Barrier, Semaphore};
use uuid::Uuid;

fn scope(name: &str) -> CollectionScope {
    CollectionScope::new(
        Uuid::now_v7(),
        Id::new(Uuid::now_v7(), "application"),
        name,
    )
}

fn setup(config: StoreConfig) -> (Arc<InMemoryColumnStore>, EntityStore, EntityCollectionManager) {
    let backend = Arc::new(InMemoryColumnStore::new());
    let store = EntityStore::new(config, backend.clone()).unwrap();
    let users = store.collection(scope("users")).unwrap();
    (backend, store, users)
}

#[tokio::test]
async fn test_second_owner_conflicts() {
    let (_backend, _store, users) = setup(StoreConfig::new());
    let email = Field::unique("email", "ann@example.com");

    let (ann, _) = users.create("user", vec![email.clone()]).await.unwrap();
    let err = users.create("user", vec![email.clone()]).await.unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(err.conflicting_fields(), vec!["email"]);

    let owner = users.load_unique(&email).await.unwrap().unwrap();
    assert_eq!(owner.entity_id(), &ann);
}

#[tokio::test]
async fn test_conflict_names_every_lost_field() {
    let (backend, _store, users) = setup(StoreConfig::new());
    users
        .create(
            "user",
            vec![
                Field::unique("email", "ann@example.com"),
                Field::unique("username", "ann"),
            ],
        )
        .await
        .unwrap();
    let claims_before = backend.live_column_count(ColumnFamily::UniqueValues).await;

    let err = users
        .create(
            "user",
            vec![
                Field::unique("username", "ann"),
                Field::unique("phone", "555-0100"),
                Field::unique("email", "ann@example.com"),
            ],
        )
        .await
        .unwrap_err();

    assert_eq!(err.conflicting_fields(), vec!["email", "username"]);
    // The free phone value was not left claimed
    assert_eq!(
        backend.live_column_count(ColumnFamily::UniqueValues).await,
        claims_before
    );
    assert!(
        users
            .load_unique(&Field::unique("phone", "555-0100"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_rewrite_keeps_own_value() {
    let (_backend, _store, users) = setup(StoreConfig::new());
    let email = Field::unique("email", "ann@example.com");

    let (ann, _) = users.create("user", vec![email.clone()]).await.unwrap();
    let v2 = users
        .write(&ann, vec![email.clone(), Field::new("name", "Ann")])
        .await
        .unwrap();

    let owner = users.load_unique(&email).await.unwrap().unwrap();
    assert_eq!(owner.entity_id(), &ann);
    assert_eq!(owner.entity_version(), v2);
}

#[tokio::test]
async fn test_changed_value_releases_old_one() {
    let (_backend, _store, users) = setup(StoreConfig::new());
    let old_email = Field::unique("email", "ann@example.com");
    let new_email = Field::unique("email", "ann@example.org");

    let (ann, _) = users.create("user", vec![old_email.clone()]).await.unwrap();
    users.write(&ann, vec![new_email.clone()]).await.unwrap();

    assert!(users.load_unique(&old_email).await.unwrap().is_none());
    assert_eq!(
        users.load_unique(&new_email).await.unwrap().unwrap().entity_id(),
        &ann
    );

    // The released value is free for someone else
    users.create("user", vec![old_email]).await.unwrap();
}

#[tokio::test]
async fn test_mark_deleted_releases_values() {
    let (backend, _store, users) = setup(StoreConfig::new());
    let email = Field::unique("email", "ann@example.com");

    let (ann, _) = users.create("user", vec![email.clone()]).await.unwrap();
    users.mark_deleted(&ann).await.unwrap();

    assert!(users.load_unique(&email).await.unwrap().is_none());
    assert_eq!(backend.live_column_count(ColumnFamily::UniqueValues).await, 0);
    assert_eq!(backend.live_column_count(ColumnFamily::UniqueValueLog).await, 0);

    users.create("user", vec![email]).await.unwrap();
}

#[tokio::test]
async fn test_values_are_scoped_per_collection() {
    let (_backend, store, users) = setup(StoreConfig::new());
    let admins = store.collection(scope("admins")).unwrap();
    let email = Field::unique("email", "ann@example.com");

    users.create("user", vec![email.clone()]).await.unwrap();
    admins.create("admin", vec![email]).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let (backend, _store, users) = setup(StoreConfig::new());
    let contenders = 8;
    let barrier = Arc::new(Barrier::new(contenders));

    let mut handles = Vec::new();
    for _ in 0..contenders {
        let users = users.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            users
                .create("user", vec![Field::unique("email", "race@example.com")])
                .await
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok((id, _)) => winners.push(id),
            Err(err) => assert!(err.is_conflict(), "unexpected error: {}", err),
        }
    }

    assert_eq!(winners.len(), 1);
    let owner = users
        .load_unique(&Field::unique("email", "race@example.com"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(owner.entity_id(), &winners[0]);
    assert_eq!(backend.live_column_count(ColumnFamily::UniqueValues).await, 1);
}

#[tokio::test]
async fn test_unconfirmed_claim_expires() {
    let config = StoreConfig::new().unique_claim_ttl(Duration::from_millis(50));
    let (_backend, store, users) = setup(config);
    let email = Field::unique("email", "ann@example.com");

    let ann = store.clock().next_id("user").unwrap();
    let version = store.clock().next_version().unwrap();
    let claim = UniqueValue::new(email.clone(), ann.clone(), version);
    store
        .unique_values()
        .claim(users.scope(), &claim)
        .await
        .unwrap();

    // Claimed but never committed
    assert!(users.create("user", vec![email.clone()]).await.unwrap_err().is_conflict());

    tokio::time::sleep(Duration::from_millis(120)).await;

    let (bob, _) = users.create("user", vec![email.clone()]).await.unwrap();
    assert_eq!(
        users.load_unique(&email).await.unwrap().unwrap().entity_id(),
        &bob
    );
}

#[tokio::test]
async fn test_committed_claim_outlives_ttl() {
    let config = StoreConfig::new().unique_claim_ttl(Duration::from_millis(50));
    let (_backend, _store, users) = setup(config);
    let email = Field::unique("email", "ann@example.com");

    let (ann, _) = users.create("user", vec![email.clone()]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(
        users.load_unique(&email).await.unwrap().unwrap().entity_id(),
        &ann
    );
    assert!(users.create("user", vec![email]).await.unwrap_err().is_conflict());
}

#[tokio::test]
async fn test_saturated_executor_rejects_write() {
    let config = StoreConfig::new().max_workers(1);
    let (backend, store, users) = setup(config);

    let gate = Arc::new(Semaphore::new(0));
    let blocker = {
        let gate = gate.clone();
        store.executor().submit(ClosureTask::new("blocker", move |_ctx| {
            let gate = gate.clone();
            async move {
                let _pass = gate.acquire().await;
                Ok(())
            }
            .boxed()
        }))
    };

    let id = store.clock().next_id("user").unwrap();
    let err = users
        .write(&id, vec![Field::unique("email", "ann@example.com")])
        .await
        .unwrap_err();
    assert!(err.is_rejected(), "unexpected error: {}", err);

    // Nothing of the rejected write is visible
    assert!(users.load(&id, None).await.unwrap_err().is_not_found());
    assert_eq!(backend.live_column_count(ColumnFamily::UniqueValues).await, 0);
    assert_eq!(backend.live_column_count(ColumnFamily::LogEntries).await, 0);

    gate.add_permits(1);
    blocker.join().await.unwrap();

    users
        .write(&id, vec![Field::unique("email", "ann@example.com")])
        .await
        .unwrap();
    assert!(store.executor().stats().rejected >= 1);
}

#[tokio::test]
async fn test_backend_unavailable_during_claim() {
    let (backend, _store, users) = setup(StoreConfig::new());
    backend.set_available(false);

    let err = users
        .create("user", vec![Field::unique("email", "ann@example.com")])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::BackendUnavailable(_)));

    backend.set_available(true);
    users
        .create("user", vec![Field::unique("email", "ann@example.com")])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_deleting_newest_version_keeps_value_owned() {
    let (_backend, _store, users) = setup(StoreConfig::new());
    let email = Field::unique("email", "ann@example.com");

    let (ann, v1) = users.create("user", vec![email.clone()]).await.unwrap();
    let v2 = users
        .write(&ann, vec![email.clone(), Field::new("name", "Ann")])
        .await
        .unwrap();

    users.delete(&ann, v2).await.unwrap();
    assert_eq!(users.load(&ann, None).await.unwrap().version(), v1);

    let owner = users.load_unique(&email).await.unwrap().unwrap();
    assert_eq!(owner.entity_id(), &ann);
    assert_eq!(owner.entity_version(), v1);
    assert!(users.create("user", vec![email]).await.unwrap_err().is_conflict());
}

#[tokio::test]
async fn test_delete_conflicts_when_older_value_was_taken() {
    let (_backend, _store, users) = setup(StoreConfig::new());
    let old_email = Field::unique("email", "ann@example.com");
    let new_email = Field::unique("email", "ann@example.org");

    let (ann, _) = users.create("user", vec![old_email.clone()]).await.unwrap();
    let v2 = users.write(&ann, vec![new_email.clone()]).await.unwrap();
    let (bob, _) = users.create("user", vec![old_email.clone()]).await.unwrap();

    let err = users.delete(&ann, v2).await.unwrap_err();
    assert_eq!(err.conflicting_fields(), vec!["email"]);

    // Nothing was deleted
    assert_eq!(users.load(&ann, None).await.unwrap().version(), v2);
    assert_eq!(
        users.load_unique(&new_email).await.unwrap().unwrap().entity_id(),
        &ann
    );
    assert_eq!(
        users.load_unique(&old_email).await.unwrap().unwrap().entity_id(),
        &bob
    );
}

#[tokio::test]
async fn test_deleting_older_version_leaves_current_claims() {
    let (_backend, _store, users) = setup(StoreConfig::new());
    let email = Field::unique("email", "ann@example.com");

    let (ann, v1) = users.create("user", vec![email.clone()]).await.unwrap();
    let v2 = users.write(&ann, vec![email.clone()]).await.unwrap();

    users.delete(&ann, v1).await.unwrap();
    let owner = users.load_unique(&email).await.unwrap().unwrap();
    assert_eq!(owner.entity_version(), v2);
}

// ============================================================================
// Scripted backend
// ============================================================================

/// In-memory store that can interfere with the calls passing through it.
struct ScriptedColumnStore {
    inner: Arc<InMemoryColumnStore>,
    /// Value bytes whose first conditional claim is preceded by a rival write
    contested: Vec<u8>,
    rival: OnceLock<(EntityCollectionManager, Field)>,
    rival_fired: AtomicBool,
    fail_releases: AtomicBool,
}

impl ScriptedColumnStore {
    fn new(contested: &str) -> Self {
        Self {
            inner: Arc::new(InMemoryColumnStore::new()),
            contested: contested.as_bytes().to_vec(),
            rival: OnceLock::new(),
            rival_fired: AtomicBool::new(false),
            fail_releases: AtomicBool::new(false),
        }
    }

    fn is_contested(&self, row: &RowKey) -> bool {
        row.family == ColumnFamily::UniqueValues
            && row
                .key
                .windows(self.contested.len())
                .any(|window| window == self.contested.as_slice())
    }
}

#[async_trait]
impl ColumnStore for ScriptedColumnStore {
    async fn execute(&self, batch: MutationBatch) -> mvccstore::Result<()> {
        let releases_claim = batch.mutations().iter().any(|mutation| {
            matches!(mutation, Mutation::DeleteColumn { row, .. } if row.family == ColumnFamily::UniqueValues)
        });
        if releases_claim && self.fail_releases.load(Ordering::SeqCst) {
            return Err(StoreError::BackendUnavailable("release dropped".to_string()));
        }
        self.inner.execute(batch).await
    }

    async fn read(
        &self,
        row: &RowKey,
        range: &ColumnRange,
        consistency: Consistency,
    ) -> mvccstore::Result<Vec<Column>> {
        self.inner.read(row, range, consistency).await
    }

    async fn check_and_mutate(
        &self,
        row: &RowKey,
        condition: RowCondition,
        batch: MutationBatch,
    ) -> mvccstore::Result<bool> {
        if self.is_contested(row) && !self.rival_fired.swap(true, Ordering::SeqCst) {
            if let Some((users, field)) = self.rival.get() {
                users.create("user", vec![field.clone()]).await?;
            }
        }
        self.inner.check_and_mutate(row, condition, batch).await
    }
}

#[tokio::test]
async fn test_lost_race_rolls_back_won_claims() {
    let backend = Arc::new(ScriptedColumnStore::new("contested-handle"));
    let store = EntityStore::new(StoreConfig::new(), backend.clone()).unwrap();
    let users = store.collection(scope("users")).unwrap();
    let handle = Field::unique("username", "contested-handle");
    let _ = backend.rival.set((users.clone(), handle.clone()));

    // Pre-check passes for every field; the rival claims the handle right
    // before our conditional write lands.
    let err = users
        .create(
            "user",
            vec![
                Field::unique("email", "ann@example.com"),
                handle.clone(),
                Field::unique("phone", "555-0100"),
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(err.conflicting_fields(), vec!["username"]);

    let rival = users.load_unique(&handle).await.unwrap().unwrap();
    assert!(
        users
            .load_unique(&Field::unique("email", "ann@example.com"))
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        users
            .load_unique(&Field::unique("phone", "555-0100"))
            .await
            .unwrap()
            .is_none()
    );

    // Only the rival's claim and its log entry survive
    let inner = &backend.inner;
    assert_eq!(inner.live_column_count(ColumnFamily::UniqueValues).await, 1);
    assert_eq!(inner.live_column_count(ColumnFamily::UniqueValueLog).await, 1);
    assert_eq!(inner.live_column_count(ColumnFamily::LogEntries).await, 2);
    assert_eq!(users.load(rival.entity_id(), None).await.unwrap().version(), rival.entity_version());
}

#[tokio::test]
async fn test_mark_deleted_succeeds_when_release_fails() {
    let backend = Arc::new(ScriptedColumnStore::new("unused"));
    let store = EntityStore::new(StoreConfig::new(), backend.clone()).unwrap();
    let users = store.collection(scope("users")).unwrap();
    let email = Field::unique("email", "ann@example.com");

    let (ann, v1) = users.create("user", vec![email.clone()]).await.unwrap();

    backend.fail_releases.store(true, Ordering::SeqCst);
    let v2 = users.mark_deleted(&ann).await.unwrap();
    assert!(v2 > v1);
    assert!(users.load(&ann, None).await.unwrap().is_deleted());

    // The claim is left behind until the release is retried
    assert!(users.load_unique(&email).await.unwrap().is_some());
}
