use super::backend::ColumnStore;
use super::column::{Column, ColumnFamily, ColumnRange, Mutation, MutationBatch, RowCondition, RowKey};
use crate::config::Consistency;
use crate::core::{Result, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Stored cell; `value == None` is a tombstone.
#[derive(Debug, Clone)]
struct Cell {
    value: Option<Vec<u8>>,
    timestamp: i64,
    expires_at: Option<i64>,
}

impl Cell {
    fn is_live(&self, now: i64) -> bool {
        self.value.is_some() && self.expires_at.is_none_or(|at| at > now)
    }
}

type StoredRow = BTreeMap<Vec<u8>, Cell>;

/// Single-node column store kept in memory.
///
/// Each row sits behind its own lock, so batches touching different rows
/// proceed in parallel while the mutations of one row apply atomically.
/// Consistency levels are accepted and ignored: there is one replica.
pub struct InMemoryColumnStore {
    /// Rows with individual locks
    rows: RwLock<HashMap<RowKey, Arc<RwLock<StoredRow>>>>,
    /// Cleared to simulate an unreachable store
    available: AtomicBool,
}

impl InMemoryColumnStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent call fail with `BackendUnavailable` (or succeed
    /// again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Number of live columns in `family`, across all buckets.
    pub async fn live_column_count(&self, family: ColumnFamily) -> usize {
        let now = now_micros();
        let handles: Vec<_> = {
            let rows = self.rows.read().await;
            rows.iter()
                .filter(|(key, _)| key.family == family)
                .map(|(_, row)| row.clone())
                .collect()
        };

        let mut count = 0;
        for handle in handles {
            let row = handle.read().await;
            count += row.values().filter(|cell| cell.is_live(now)).count();
        }
        count
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::BackendUnavailable(
                "in-memory column store is offline".to_string(),
            ))
        }
    }

    async fn existing_row(&self, key: &RowKey) -> Option<Arc<RwLock<StoredRow>>> {
        self.rows.read().await.get(key).cloned()
    }

    async fn row_handle(&self, key: &RowKey) -> Arc<RwLock<StoredRow>> {
        if let Some(handle) = self.existing_row(key).await {
            return handle;
        }
        let mut rows = self.rows.write().await;
        rows.entry(key.clone()).or_default().clone()
    }
}

impl Default for InMemoryColumnStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ColumnStore for InMemoryColumnStore {
    async fn execute(&self, batch: MutationBatch) -> Result<()> {
        self.check_available()?;

        let timestamp = batch.timestamp();
        let mut by_row: BTreeMap<RowKey, Vec<Mutation>> = BTreeMap::new();
        for mutation in batch.into_mutations() {
            by_row.entry(mutation.row().clone()).or_default().push(mutation);
        }

        let now = now_micros();
        for (key, mutations) in by_row {
            let handle = self.row_handle(&key).await;
            let mut row = handle.write().await;
            for mutation in mutations {
                apply(&mut row, mutation, timestamp, now);
            }
        }
        Ok(())
    }

    async fn read(
        &self,
        row: &RowKey,
        range: &ColumnRange,
        _consistency: Consistency,
    ) -> Result<Vec<Column>> {
        self.check_available()?;

        let Some(handle) = self.existing_row(row).await else {
            return Ok(Vec::new());
        };
        let stored = handle.read().await;
        Ok(slice(&stored, range, now_micros()))
    }

    async fn check_and_mutate(
        &self,
        row: &RowKey,
        condition: RowCondition,
        batch: MutationBatch,
    ) -> Result<bool> {
        self.check_available()?;

        if let Some(stray) = batch.mutations().iter().find(|m| m.row() != row) {
            return Err(StoreError::InvalidArgument(format!(
                "conditional batch on {} also touches {}",
                row,
                stray.row()
            )));
        }

        let handle = self.row_handle(row).await;
        let mut stored = handle.write().await;
        let now = now_micros();

        let live = stored
            .iter()
            .filter(|(_, cell)| cell.is_live(now))
            .map(|(name, _)| name.as_slice());
        if !condition.holds(live) {
            return Ok(false);
        }

        let timestamp = batch.timestamp();
        for mutation in batch.into_mutations() {
            apply(&mut stored, mutation, timestamp, now);
        }
        Ok(true)
    }
}

fn apply(row: &mut StoredRow, mutation: Mutation, timestamp: i64, now: i64) {
    match mutation {
        Mutation::Put {
            name, value, ttl, ..
        } => {
            let expires_at = ttl.map(|ttl| now.saturating_add(ttl.as_micros() as i64));
            write_cell(
                row,
                name,
                Cell {
                    value: Some(value),
                    timestamp,
                    expires_at,
                },
            );
        }
        Mutation::DeleteColumn { name, .. } => {
            write_cell(
                row,
                name,
                Cell {
                    value: None,
                    timestamp,
                    expires_at: None,
                },
            );
        }
        Mutation::DeleteRow { .. } => {
            for cell in row.values_mut() {
                if cell.timestamp <= timestamp {
                    *cell = Cell {
                        value: None,
                        timestamp,
                        expires_at: None,
                    };
                }
            }
        }
    }
}

/// Last write wins; equal timestamps let the later mutation through.
fn write_cell(row: &mut StoredRow, name: Vec<u8>, cell: Cell) {
    match row.get(&name) {
        Some(existing) if existing.timestamp > cell.timestamp => {}
        _ => {
            row.insert(name, cell);
        }
    }
}

fn slice(row: &StoredRow, range: &ColumnRange, now: i64) -> Vec<Column> {
    let lower = match &range.start {
        Some(start) => Bound::Included(start.clone()),
        None => Bound::Unbounded,
    };
    let upper = match &range.end {
        Some(end) => Bound::Excluded(end.clone()),
        None => Bound::Unbounded,
    };
    if let (Bound::Included(start), Bound::Excluded(end)) = (&lower, &upper) {
        if start >= end {
            return Vec::new();
        }
    }

    let live = row
        .range((lower, upper))
        .filter(|(_, cell)| cell.is_live(now))
        .filter_map(|(name, cell)| {
            cell.value.as_ref().map(|value| Column {
                name: name.clone(),
                value: value.clone(),
                timestamp: cell.timestamp,
            })
        });

    let limit = range.limit.unwrap_or(usize::MAX);
    if range.reversed {
        live.rev().take(limit).collect()
    } else {
        live.take(limit).collect()
    }
}

pub(crate) fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}
