use super::column::{Column, ColumnRange, MutationBatch, RowCondition, RowKey};
use crate::config::Consistency;
use crate::core::Result;
use async_trait::async_trait;

/// Boundary to the sharded column store.
///
/// Implementations resolve concurrent writes to one column last-write-wins by
/// the batch timestamp and apply the mutations of one row atomically. Nothing
/// is promised across rows. Every failure to reach the store surfaces as
/// `StoreError::BackendUnavailable`; callers do not retry.
#[async_trait]
pub trait ColumnStore: Send + Sync {
    /// Apply a batch of mutations.
    async fn execute(&self, batch: MutationBatch) -> Result<()>;

    /// Read the live columns of `row` selected by `range`.
    async fn read(
        &self,
        row: &RowKey,
        range: &ColumnRange,
        consistency: Consistency,
    ) -> Result<Vec<Column>>;

    /// Apply `batch` only if `condition` holds for `row`, atomically with the
    /// check. Every mutation of `batch` must target `row`.
    ///
    /// Returns whether the batch was applied.
    async fn check_and_mutate(
        &self,
        row: &RowKey,
        condition: RowCondition,
        batch: MutationBatch,
    ) -> Result<bool>;
}
