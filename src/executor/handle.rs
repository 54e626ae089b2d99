use super::pool::run_guarded;
use super::task::{StateCell, Task, TaskState};
use super::TaskContext;
use crate::core::{Result, StoreError};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Handle to a task submitted to a `TaskExecutor`.
///
/// Dropping the handle does not cancel the task; it keeps running and its
/// result is discarded.
pub struct TaskHandle<V> {
    id: String,
    state: Arc<StateCell>,
    inner: HandleInner<V>,
}

enum HandleInner<V> {
    Spawned(JoinHandle<Result<V>>),
    Rejected(String),
}

impl<V> TaskHandle<V> {
    pub(crate) fn spawned(id: String, state: Arc<StateCell>, join: JoinHandle<Result<V>>) -> Self {
        Self {
            id,
            state,
            inner: HandleInner::Spawned(join),
        }
    }

    pub(crate) fn rejected(id: String, reason: String) -> Self {
        Self {
            id,
            state: Arc::new(StateCell::new(TaskState::Rejected)),
            inner: HandleInner::Rejected(reason),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner, HandleInner::Rejected(_))
    }

    /// Waits for the task and returns its result.
    ///
    /// A rejected task yields `StoreError::Rejected`.
    pub async fn join(self) -> Result<V> {
        match self.inner {
            HandleInner::Spawned(join) => match join.await {
                Ok(result) => result,
                Err(err) => Err(StoreError::TaskFailed(format!(
                    "task {} join: {}",
                    self.id, err
                ))),
            },
            HandleInner::Rejected(reason) => Err(StoreError::Rejected(reason)),
        }
    }
}

/// A child task forked from a running task.
///
/// The child either runs on a free worker, or, when none is free, runs in the
/// joining task at `join` time. Forking never rejects.
pub enum ForkedTask<V> {
    Spawned(TaskHandle<V>),
    Inline {
        task: Box<dyn Task<Output = V>>,
        ctx: TaskContext,
    },
}

impl<V: Send + 'static> ForkedTask<V> {
    pub fn is_inline(&self) -> bool {
        matches!(self, ForkedTask::Inline { .. })
    }

    pub async fn join(self) -> Result<V> {
        match self {
            ForkedTask::Spawned(handle) => handle.join().await,
            ForkedTask::Inline { mut task, ctx } => {
                let state = StateCell::new(TaskState::Submitted);
                run_guarded(task.as_mut(), &ctx, &state).await
            }
        }
    }
}
