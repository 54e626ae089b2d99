use super::backend::ColumnStore;
use super::column::{Column, ColumnFamily, ColumnRange, MutationBatch, RowCondition, RowKey};
use super::memory::now_micros;
use crate::config::{Consistency, StoreConfig};
use crate::core::Result;
use crate::executor::{ClosureTask, TaskExecutor};
use crate::shard::ExpandingShardLocator;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Shard-aware view of the column store.
///
/// Writes go to the row in the key's current bucket. Reads probe one row per
/// distinct historical bucket and merge the columns last-write-wins, so data
/// written before a bucket-count change stays visible without being moved.
pub struct Keyspace {
    backend: Arc<dyn ColumnStore>,
    executor: TaskExecutor,
    locator: ExpandingShardLocator<[u8]>,
    read_consistency: Consistency,
    write_consistency: Consistency,
    /// Last issued write timestamp (microseconds)
    clock: Mutex<i64>,
}

impl Keyspace {
    pub fn new(
        backend: Arc<dyn ColumnStore>,
        executor: TaskExecutor,
        config: &StoreConfig,
    ) -> Result<Self> {
        Ok(Self {
            backend,
            executor,
            locator: ExpandingShardLocator::new(&config.bucket_counts)?,
            read_consistency: config.read_consistency,
            write_consistency: config.write_consistency,
            clock: Mutex::new(0),
        })
    }

    pub fn backend(&self) -> &Arc<dyn ColumnStore> {
        &self.backend
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn locator(&self) -> &ExpandingShardLocator<[u8]> {
        &self.locator
    }

    /// Row that new writes of `key` target.
    pub fn write_row(&self, family: ColumnFamily, key: &[u8]) -> RowKey {
        RowKey::new(family, self.locator.get_current_bucket(key), key.to_vec())
    }

    /// Every physical row `key` may have been written to, current first.
    pub fn probe_rows(&self, family: ColumnFamily, key: &[u8]) -> Vec<RowKey> {
        self.locator
            .get_distinct_buckets(key)
            .into_iter()
            .map(|bucket| RowKey::new(family, bucket, key.to_vec()))
            .collect()
    }

    /// Empty batch stamped with the next write timestamp.
    pub fn batch(&self) -> Result<MutationBatch> {
        Ok(MutationBatch::new(self.next_timestamp()?, self.write_consistency))
    }

    /// Strictly increasing microsecond timestamps, tied to wall time.
    fn next_timestamp(&self) -> Result<i64> {
        let mut last = self.clock.lock()?;
        let now = now_micros().max(*last + 1);
        *last = now;
        Ok(now)
    }

    /// Queue a delete of column `name` in every row `key` may live in.
    pub fn delete_column_everywhere(
        &self,
        batch: &mut MutationBatch,
        family: ColumnFamily,
        key: &[u8],
        name: &[u8],
    ) {
        for row in self.probe_rows(family, key) {
            batch.delete_column(row, name.to_vec());
        }
    }

    pub async fn execute(&self, batch: MutationBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.backend.execute(batch).await
    }

    pub async fn check_and_mutate(
        &self,
        row: &RowKey,
        condition: RowCondition,
        batch: MutationBatch,
    ) -> Result<bool> {
        self.backend.check_and_mutate(row, condition, batch).await
    }

    /// Read `key` across all shard epochs.
    ///
    /// Columns are merged by name keeping the highest timestamp, then ordered
    /// and limited as `range` asks. Extra probes are forked onto the executor
    /// and run inline when no worker is free.
    pub async fn read(
        &self,
        family: ColumnFamily,
        key: &[u8],
        range: &ColumnRange,
    ) -> Result<Vec<Column>> {
        let mut rows = self.probe_rows(family, key).into_iter();
        let Some(current) = rows.next() else {
            return Ok(Vec::new());
        };

        let probes: Vec<_> = rows
            .map(|row| {
                let backend = self.backend.clone();
                let range = range.clone();
                let consistency = self.read_consistency;
                let id = format!("probe:{}", row);
                self.executor.fork(ClosureTask::new(id, move |_ctx| {
                    let backend = backend.clone();
                    let row = row.clone();
                    let range = range.clone();
                    async move { backend.read(&row, &range, consistency).await }.boxed()
                }))
            })
            .collect();

        let mut merged: BTreeMap<Vec<u8>, Column> = BTreeMap::new();
        let first = self.backend.read(&current, range, self.read_consistency).await?;
        merge_into(&mut merged, first);
        for probe in probes {
            merge_into(&mut merged, probe.join().await?);
        }

        let limit = range.limit.unwrap_or(usize::MAX);
        let columns = merged.into_values();
        Ok(if range.reversed {
            columns.rev().take(limit).collect()
        } else {
            columns.take(limit).collect()
        })
    }
}

fn merge_into(merged: &mut BTreeMap<Vec<u8>, Column>, columns: Vec<Column>) {
    for column in columns {
        match merged.get(&column.name) {
            Some(existing) if existing.timestamp >= column.timestamp => {}
            _ => {
                merged.insert(column.name.clone(), column);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryColumnStore;

    fn keyspace(backend: Arc<InMemoryColumnStore>, counts: Vec<u32>) -> Keyspace {
        let config = StoreConfig::new().bucket_counts(counts).max_workers(4);
        let executor = TaskExecutor::from_config(&config).unwrap();
        Keyspace::new(backend, executor, &config).unwrap()
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let ks = keyspace(Arc::new(InMemoryColumnStore::new()), vec![1]);
        let mut last = 0;
        for _ in 0..1000 {
            let ts = ks.batch().unwrap().timestamp();
            assert!(ts > last);
            last = ts;
        }
    }

    #[tokio::test]
    async fn test_reads_see_rows_from_older_epochs() {
        let backend = Arc::new(InMemoryColumnStore::new());
        let old = keyspace(backend.clone(), vec![1]);
        let new = keyspace(backend.clone(), vec![16, 1]);

        for i in 0..50u8 {
            let key = [7, i];
            let mut batch = old.batch().unwrap();
            batch.put(old.write_row(ColumnFamily::LogEntries, &key), vec![1], vec![i]);
            old.execute(batch).await.unwrap();

            let mut batch = new.batch().unwrap();
            batch.put(new.write_row(ColumnFamily::LogEntries, &key), vec![2], vec![i]);
            new.execute(batch).await.unwrap();

            let columns = new
                .read(ColumnFamily::LogEntries, &key, &ColumnRange::all())
                .await
                .unwrap();
            let names: Vec<_> = columns.into_iter().map(|c| c.name).collect();
            assert_eq!(names, vec![vec![1], vec![2]]);

            // The single-epoch keyspace only sees bucket 0.
            let current = new.locator().get_current_bucket(&key);
            let visible = old
                .read(ColumnFamily::LogEntries, &key, &ColumnRange::all())
                .await
                .unwrap();
            assert_eq!(visible.len(), if current == 0 { 2 } else { 1 });
        }
    }

    #[tokio::test]
    async fn test_merge_keeps_newest_cell() {
        let backend = Arc::new(InMemoryColumnStore::new());
        let old = keyspace(backend.clone(), vec![1]);
        let new = keyspace(backend.clone(), vec![64, 1]);

        let key = (0..=255u8)
            .map(|b| vec![b])
            .find(|k| new.locator().get_current_bucket(k) != 0)
            .unwrap();

        let mut batch = old.batch().unwrap();
        batch.put(old.write_row(ColumnFamily::EntityVersions, &key), vec![9], b"old".to_vec());
        old.execute(batch).await.unwrap();

        let mut batch = new.batch().unwrap();
        batch.put(new.write_row(ColumnFamily::EntityVersions, &key), vec![9], b"new".to_vec());
        new.execute(batch).await.unwrap();

        let columns = new
            .read(ColumnFamily::EntityVersions, &key, &ColumnRange::all())
            .await
            .unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].value, b"new".to_vec());
    }
}
