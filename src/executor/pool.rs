use super::handle::{ForkedTask, TaskHandle};
use super::task::{StateCell, Task, TaskState};
use crate::config::StoreConfig;
use crate::core::{Result, StoreError};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{Instrument, Level, event, info_span};

/// Bounded task pool
///
/// Admission is capped at `max_workers + queue_capacity` tasks in flight.
/// A submission beyond that is rejected immediately: the task's `on_rejected`
/// hook runs on the caller and the returned handle resolves to
/// `StoreError::Rejected`. Admitted tasks then wait for one of `max_workers`
/// run slots.
///
/// Cloning is cheap; clones share the same pool. `submit` and `fork` must be
/// called from within a tokio runtime; `set_max_workers` may be called from
/// anywhere.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    name: String,
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    max_workers: AtomicUsize,
    queue_capacity: usize,
    shutdown: AtomicBool,
    /// Permits still to retire after a shrink, taken as running tasks finish
    admission_debt: AtomicUsize,
    worker_debt: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    inlined: AtomicU64,
}

/// Point-in-time counters of a `TaskExecutor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorStats {
    pub name: String,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub inlined: u64,
}

impl TaskExecutor {
    pub fn new(name: impl Into<String>, max_workers: usize, queue_capacity: usize) -> Result<Self> {
        if max_workers == 0 {
            return Err(StoreError::InvalidArgument(
                "max_workers must be > 0".to_string(),
            ));
        }

        Ok(Self {
            inner: Arc::new(ExecutorInner {
                name: name.into(),
                admission: Arc::new(Semaphore::new(max_workers + queue_capacity)),
                workers: Arc::new(Semaphore::new(max_workers)),
                max_workers: AtomicUsize::new(max_workers),
                queue_capacity,
                shutdown: AtomicBool::new(false),
                admission_debt: AtomicUsize::new(0),
                worker_debt: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                inlined: AtomicU64::new(0),
            }),
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::new(
            config.executor_name.clone(),
            config.max_workers,
            config.queue_capacity,
        )
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers.load(Ordering::Acquire)
    }

    /// Admit `task` or reject it without blocking.
    pub fn submit<T: Task>(&self, task: T) -> TaskHandle<T::Output> {
        let id = task.id();

        if self.is_shutdown() {
            return self.reject(task, id, "executor is shut down");
        }

        match self.inner.admission.clone().try_acquire_owned() {
            Ok(admit) => self.spawn(task, id, admit, None),
            Err(_) => self.reject(task, id, "pool and queue are full"),
        }
    }

    /// Fork a child of a running task.
    ///
    /// The child gets its own worker only when one is free right now;
    /// otherwise it is deferred and runs in the joining task.
    pub(crate) fn fork<T: Task>(&self, task: T) -> ForkedTask<T::Output> {
        if !self.is_shutdown() {
            if let Ok(worker) = self.inner.workers.clone().try_acquire_owned() {
                if let Ok(admit) = self.inner.admission.clone().try_acquire_owned() {
                    let id = task.id();
                    return ForkedTask::Spawned(self.spawn(task, id, admit, Some(worker)));
                }
            }
        }

        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.inlined.fetch_add(1, Ordering::Relaxed);
        ForkedTask::Inline {
            task: Box::new(task),
            ctx: TaskContext {
                executor: self.clone(),
            },
        }
    }

    /// Change the number of run slots. Idle slots are removed at once, busy
    /// ones as their tasks finish; running tasks are never interrupted.
    pub fn set_max_workers(&self, max_workers: usize) -> Result<()> {
        if max_workers == 0 {
            return Err(StoreError::InvalidArgument(
                "max_workers must be > 0".to_string(),
            ));
        }

        let previous = self.inner.max_workers.swap(max_workers, Ordering::AcqRel);
        if max_workers > previous {
            let delta = max_workers - previous;
            grow(&self.inner.workers, &self.inner.worker_debt, delta);
            grow(&self.inner.admission, &self.inner.admission_debt, delta);
        } else if max_workers < previous {
            let delta = previous - max_workers;
            shrink(&self.inner.workers, &self.inner.worker_debt, delta);
            shrink(&self.inner.admission, &self.inner.admission_debt, delta);
        }

        event!(
            Level::INFO,
            executor = %self.inner.name,
            previous,
            max_workers,
            "executor resized"
        );
        Ok(())
    }

    /// Stop admitting new tasks. Tasks already admitted run to completion.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::AcqRel) {
            event!(Level::INFO, executor = %self.inner.name, "executor shut down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            name: self.inner.name.clone(),
            max_workers: self.max_workers(),
            queue_capacity: self.inner.queue_capacity,
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            inlined: self.inner.inlined.load(Ordering::Relaxed),
        }
    }

    fn spawn<T: Task>(
        &self,
        mut task: T,
        id: String,
        admit: OwnedSemaphorePermit,
        worker: Option<OwnedSemaphorePermit>,
    ) -> TaskHandle<T::Output> {
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);

        let state = Arc::new(StateCell::new(TaskState::Submitted));
        let task_state = state.clone();
        let workers = self.inner.workers.clone();
        let inner = self.inner.clone();
        let ctx = TaskContext {
            executor: self.clone(),
        };
        let span = info_span!("executor.task", executor = %self.inner.name, task = %id);
        let task_id = id.clone();

        let join = tokio::spawn(
            async move {
                let worker = match worker {
                    Some(permit) => permit,
                    None => workers.acquire_owned().await.map_err(|_| {
                        task_state.set(TaskState::Rejected);
                        StoreError::Rejected(format!("task {} lost its worker slot", task_id))
                    })?,
                };
                let outcome = run_guarded(&mut task, &ctx, &task_state).await;
                retire(worker, &inner.worker_debt);
                retire(admit, &inner.admission_debt);
                outcome
            }
            .instrument(span),
        );

        TaskHandle::spawned(id, state, join)
    }

    fn reject<T: Task>(&self, task: T, id: String, reason: &str) -> TaskHandle<T::Output> {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
        task.on_rejected();

        event!(
            Level::WARN,
            executor = %self.inner.name,
            task = %id,
            reason,
            "task rejected"
        );

        let message = format!("{} rejected task {}: {}", self.inner.name, id, reason);
        TaskHandle::rejected(id, message)
    }

    fn record(&self, outcome: TaskState) {
        let counter = match outcome {
            TaskState::Completed => &self.inner.completed,
            _ => &self.inner.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs `task` to completion, converting panics into `TaskFailed`.
///
/// On failure the task's `on_failure` hook is called before the failure is
/// logged, and the error is returned to whoever joins the task.
pub(crate) async fn run_guarded<T: Task + ?Sized>(
    task: &mut T,
    ctx: &TaskContext,
    state: &StateCell,
) -> Result<T::Output> {
    state.set(TaskState::Running);

    let outcome = match AssertUnwindSafe(task.compute(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(StoreError::TaskFailed(format!(
            "task {} panicked: {}",
            task.id(),
            panic_message(panic.as_ref())
        ))),
    };

    match outcome {
        Ok(value) => {
            state.set(TaskState::Completed);
            ctx.executor.record(TaskState::Completed);
            Ok(value)
        }
        Err(err) => {
            state.set(TaskState::Failed);
            ctx.executor.record(TaskState::Failed);
            task.on_failure(&err);
            event!(
                Level::ERROR,
                executor = %ctx.executor.name(),
                task = %task.id(),
                error = %err,
                "task failed"
            );
            Err(err)
        }
    }
}

fn grow(semaphore: &Semaphore, debt: &AtomicUsize, delta: usize) {
    let cancelled = take_debt(debt, delta);
    semaphore.add_permits(delta - cancelled);
}

/// Forget idle permits now and leave the rest as debt.
fn shrink(semaphore: &Semaphore, debt: &AtomicUsize, delta: usize) {
    let idle = semaphore.available_permits().min(delta);
    let forgotten = match semaphore.try_acquire_many(idle as u32) {
        Ok(permits) => {
            permits.forget();
            idle
        }
        Err(_) => 0,
    };
    debt.fetch_add(delta - forgotten, Ordering::AcqRel);
}

/// Return a permit to its pool unless a shrink still owes one.
fn retire(permit: OwnedSemaphorePermit, debt: &AtomicUsize) {
    if take_debt(debt, 1) == 1 {
        permit.forget();
    }
}

/// Take up to `wanted` from `debt`, returning how much was taken.
fn take_debt(debt: &AtomicUsize, wanted: usize) -> usize {
    let previous = debt
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |owed| {
            Some(owed - owed.min(wanted))
        })
        .unwrap_or_else(|owed| owed);
    previous.min(wanted)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle a running task uses to fork children onto its executor.
#[derive(Clone)]
pub struct TaskContext {
    executor: TaskExecutor,
}

impl TaskContext {
    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn fork<T: Task>(&self, task: T) -> ForkedTask<T::Output> {
        self.executor.fork(task)
    }
}
