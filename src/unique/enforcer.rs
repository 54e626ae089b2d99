// ============================================================================
// Unique Value Enforcement
// ============================================================================
//
// Claim protocol for one value, no locks involved:
//
//   1. pre-check   load the owner; another entity owns it -> Conflict
//   2. write       conditional insert into the current bucket's value row
//   3. verify      re-read across all epochs; someone else won -> release
//                  our claim, Conflict
//
// `claim_all` pre-checks every field, then claims them in parallel by
// splitting the set in halves on the task executor. When any field loses, the
// claims already taken for the version are released before the Conflict is
// returned.
//
// ============================================================================

use super::serialization::UniqueValueSerialization;
use super::value::UniqueValue;
use crate::core::{CollectionScope, Field, Result, StoreError};
use crate::executor::{Task, TaskContext, TaskExecutor};
use async_recursion::async_recursion;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{Level, event};

#[derive(Clone)]
pub struct UniqueValueEnforcer {
    serialization: Arc<UniqueValueSerialization>,
    executor: TaskExecutor,
}

impl UniqueValueEnforcer {
    pub fn new(serialization: Arc<UniqueValueSerialization>, executor: TaskExecutor) -> Self {
        Self {
            serialization,
            executor,
        }
    }

    pub fn serialization(&self) -> &Arc<UniqueValueSerialization> {
        &self.serialization
    }

    /// Claim one value for its entity. Re-claiming a value the entity already
    /// owns succeeds.
    pub async fn claim(&self, scope: &CollectionScope, value: &UniqueValue) -> Result<()> {
        if let Some(owner) = self.serialization.load_unrepaired(scope, value.field()).await? {
            if !owner.is_owned_by(value.entity_id()) {
                return Err(conflict(value, vec![value.field().clone()]));
            }
        }

        if claim_one(&self.serialization, scope, value).await? {
            Ok(())
        } else {
            Err(conflict(value, vec![value.field().clone()]))
        }
    }

    pub async fn load(&self, scope: &CollectionScope, field: &Field) -> Result<Option<UniqueValue>> {
        self.serialization.load(scope, field).await
    }

    pub async fn release(&self, scope: &CollectionScope, value: &UniqueValue) -> Result<()> {
        self.serialization.delete(scope, value).await
    }

    /// Claim every value of one entity version, all or nothing.
    ///
    /// Fails with `Conflict` naming every lost field, `Rejected` when the
    /// executor has no room for the claim, or the first backend error.
    pub async fn claim_all(&self, scope: &CollectionScope, values: Vec<UniqueValue>) -> Result<()> {
        let Some(first) = values.first().cloned() else {
            return Ok(());
        };

        let mut violations = Vec::new();
        for value in &values {
            if let Some(owner) = self.serialization.load_unrepaired(scope, value.field()).await? {
                if !owner.is_owned_by(value.entity_id()) {
                    violations.push(value.field().clone());
                }
            }
        }
        if !violations.is_empty() {
            event!(
                Level::DEBUG,
                entity = %first.entity_id(),
                fields = violations.len(),
                "unique pre-check failed"
            );
            return Err(conflict(&first, violations));
        }

        let task = ClaimTask {
            serialization: self.serialization.clone(),
            scope: Arc::new(scope.clone()),
            values,
        };
        let outcome = self.executor.submit(task).join().await?;

        if outcome.conflicts.is_empty() && outcome.failure.is_none() {
            return Ok(());
        }

        self.roll_back(scope, &outcome.claimed).await?;

        let ClaimOutcome {
            mut conflicts,
            failure,
            ..
        } = outcome;
        if conflicts.is_empty() {
            return Err(failure.unwrap_or_else(|| {
                StoreError::TaskFailed("claim failed without a cause".to_string())
            }));
        }
        conflicts.sort_by(|a, b| a.name().cmp(b.name()));
        Err(conflict(&first, conflicts))
    }

    async fn roll_back(&self, scope: &CollectionScope, claimed: &[UniqueValue]) -> Result<()> {
        let Some(first) = claimed.first() else {
            return Ok(());
        };

        event!(
            Level::DEBUG,
            entity = %first.entity_id(),
            version = %first.entity_version(),
            released = claimed.len(),
            "releasing partial unique claims"
        );
        self.serialization.delete_all(scope, claimed).await
    }
}

fn conflict(value: &UniqueValue, fields: Vec<Field>) -> StoreError {
    StoreError::Conflict {
        entity: value.entity_id().clone(),
        fields,
    }
}

/// Write then verify one claim. `Ok(false)` means another entity owns the
/// value; our own claim has been removed again.
async fn claim_one(
    serialization: &UniqueValueSerialization,
    scope: &CollectionScope,
    value: &UniqueValue,
) -> Result<bool> {
    if !serialization.write(scope, value).await? {
        serialization.delete(scope, value).await?;
        return Ok(false);
    }

    match serialization.load_unrepaired(scope, value.field()).await? {
        Some(owner) if owner.is_owned_by(value.entity_id()) => Ok(true),
        _ => {
            serialization.delete(scope, value).await?;
            Ok(false)
        }
    }
}

/// Result of claiming part of a value set.
#[derive(Debug, Default)]
struct ClaimOutcome {
    /// Claims possibly written, to release on failure
    claimed: Vec<UniqueValue>,
    conflicts: Vec<Field>,
    failure: Option<StoreError>,
}

impl ClaimOutcome {
    fn merge(&mut self, other: ClaimOutcome) {
        self.claimed.extend(other.claimed);
        self.conflicts.extend(other.conflicts);
        if self.failure.is_none() {
            self.failure = other.failure;
        }
    }
}

struct ClaimTask {
    serialization: Arc<UniqueValueSerialization>,
    scope: Arc<CollectionScope>,
    values: Vec<UniqueValue>,
}

#[async_trait]
impl Task for ClaimTask {
    type Output = ClaimOutcome;

    fn id(&self) -> String {
        match self.values.first() {
            Some(value) => format!("unique-claim:{}:{}", value.entity_id(), self.values.len()),
            None => "unique-claim:empty".to_string(),
        }
    }

    async fn compute(&mut self, ctx: &TaskContext) -> Result<ClaimOutcome> {
        let values = std::mem::take(&mut self.values);
        Ok(claim_range(
            self.serialization.clone(),
            self.scope.clone(),
            values,
            ctx.clone(),
        )
        .await)
    }
}

/// Fork the left half, claim the right half in place, then join.
#[async_recursion]
async fn claim_range(
    serialization: Arc<UniqueValueSerialization>,
    scope: Arc<CollectionScope>,
    mut values: Vec<UniqueValue>,
    ctx: TaskContext,
) -> ClaimOutcome {
    match values.len() {
        0 => ClaimOutcome::default(),
        1 => {
            let mut outcome = ClaimOutcome::default();
            let value = values.remove(0);
            match claim_one(&serialization, &scope, &value).await {
                Ok(true) => outcome.claimed.push(value),
                Ok(false) => outcome.conflicts.push(value.field().clone()),
                Err(err) => {
                    outcome.claimed.push(value);
                    outcome.failure = Some(err);
                }
            }
            outcome
        }
        len => {
            let right = values.split_off(len / 2);
            let left = ctx.fork(ClaimTask {
                serialization: serialization.clone(),
                scope: scope.clone(),
                values,
            });

            let mut outcome = claim_range(serialization, scope, right, ctx).await;
            match left.join().await {
                Ok(left) => outcome.merge(left),
                Err(err) => {
                    if outcome.failure.is_none() {
                        outcome.failure = Some(err);
                    }
                }
            }
            outcome
        }
    }
}
