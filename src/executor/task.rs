// ============================================================================
// Task Definition
// ============================================================================
//
// A task is a named computation with two hooks: `on_failure` runs when the
// computation errors or panics, `on_rejected` runs synchronously when the
// executor refuses to admit it.
//
// ============================================================================

use super::TaskContext;
use crate::core::{Result, StoreError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Unit of work scheduled on a `TaskExecutor`.
#[async_trait]
pub trait Task: Send + 'static {
    type Output: Send + 'static;

    /// Opaque identifier used in spans and log events.
    fn id(&self) -> String;

    /// Runs the computation. May fork child tasks through `ctx`.
    async fn compute(&mut self, ctx: &TaskContext) -> Result<Self::Output>;

    /// Called with the failure before the executor logs it.
    fn on_failure(&self, _error: &StoreError) {}

    /// Called instead of `compute` when the executor refuses the task.
    fn on_rejected(&self) {}
}

/// Lifecycle of a submitted task
///
/// ```text
/// Submitted ──> Running ──> Completed
///     │            └──────> Failed
///     └──> Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Submitted,
    Running,
    Completed,
    Failed,
    Rejected,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Rejected
        )
    }

    fn as_u8(self) -> u8 {
        match self {
            TaskState::Submitted => 0,
            TaskState::Running => 1,
            TaskState::Completed => 2,
            TaskState::Failed => 3,
            TaskState::Rejected => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Submitted,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Failed,
            _ => TaskState::Rejected,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Submitted => write!(f, "SUBMITTED"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Completed => write!(f, "COMPLETED"),
            TaskState::Failed => write!(f, "FAILED"),
            TaskState::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Shared, lock-free cell holding a `TaskState`.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: TaskState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: TaskState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

type Computation<V> = Box<dyn FnMut(TaskContext) -> BoxFuture<'static, Result<V>> + Send>;
type FailureHook = Box<dyn Fn(&StoreError) + Send + Sync>;
type RejectionHook = Box<dyn Fn() + Send + Sync>;

/// A `Task` assembled from closures.
///
/// ```ignore
/// let task = ClosureTask::new("load-versions", |_ctx| async { Ok(42) }.boxed())
///     .on_rejected(|| tracing::warn!("busy"));
/// ```
pub struct ClosureTask<V> {
    id: String,
    computation: Computation<V>,
    failure_hook: Option<FailureHook>,
    rejection_hook: Option<RejectionHook>,
}

impl<V: Send + 'static> ClosureTask<V> {
    pub fn new<F>(id: impl Into<String>, computation: F) -> Self
    where
        F: FnMut(TaskContext) -> BoxFuture<'static, Result<V>> + Send + 'static,
    {
        Self {
            id: id.into(),
            computation: Box::new(computation),
            failure_hook: None,
            rejection_hook: None,
        }
    }

    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        self.failure_hook = Some(Box::new(hook));
        self
    }

    pub fn on_rejected<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.rejection_hook = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl<V: Send + 'static> Task for ClosureTask<V> {
    type Output = V;

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn compute(&mut self, ctx: &TaskContext) -> Result<V> {
        (self.computation)(ctx.clone()).await
    }

    fn on_failure(&self, error: &StoreError) {
        if let Some(hook) = &self.failure_hook {
            hook(error);
        }
    }

    fn on_rejected(&self) {
        if let Some(hook) = &self.rejection_hook {
            hook();
        }
    }
}
