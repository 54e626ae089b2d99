//! Task executor tests
//!
//! Admission limits, rejection hooks and fork/join on the bounded executor
//! Run with: cargo test --test executor_tests

use async_trait::async_trait;
use futures::FutureExt;
use mvccstore::executor::ClosureTask;
use mvccstore::{Result, StoreError, Task, TaskContext, TaskExecutor, TaskState};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Sums `[low, high)` by splitting it in halves down to `leaf` sized ranges.
struct SumTask {
    low: u64,
    high: u64,
    leaf: u64,
}

#[async_trait]
impl Task for SumTask {
    type Output = u64;

    fn id(&self) -> String {
        format!("sum:{}..{}", self.low, self.high)
    }

    async fn compute(&mut self, ctx: &TaskContext) -> Result<u64> {
        if self.high - self.low <= self.leaf {
            return Ok((self.low..self.high).sum());
        }

        let mid = self.low + (self.high - self.low) / 2;
        let left = ctx.fork(SumTask {
            low: self.low,
            high: mid,
            leaf: self.leaf,
        });
        let right = ctx.fork(SumTask {
            low: mid,
            high: self.high,
            leaf: self.leaf,
        });

        Ok(left.join().await? + right.join().await?)
    }
}

fn held_task(id: usize, gate: Arc<Semaphore>, rejections: Arc<AtomicUsize>) -> ClosureTask<usize> {
    ClosureTask::new(format!("held-{}", id), move |_ctx| {
        let gate = gate.clone();
        async move {
            let _pass = gate.acquire().await;
            Ok(id)
        }
        .boxed()
    })
    .on_rejected(move || {
        rejections.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn test_pool_size_plus_one_is_rejected() {
    let pool_size = 4;
    let executor = TaskExecutor::new("bounded", pool_size, 0).unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let rejections = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..pool_size)
        .map(|n| executor.submit(held_task(n, gate.clone(), rejections.clone())))
        .collect();
    assert!(handles.iter().all(|h| !h.is_rejected()));

    let extra = executor.submit(held_task(pool_size, gate.clone(), rejections.clone()));
    assert!(extra.is_rejected());
    assert_eq!(extra.state(), TaskState::Rejected);
    assert_eq!(rejections.load(Ordering::SeqCst), 1);
    assert!(matches!(extra.join().await, Err(StoreError::Rejected(_))));

    gate.add_permits(pool_size);
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.join().await.unwrap());
    }
    results.sort();
    assert_eq!(results, vec![0, 1, 2, 3]);

    let stats = executor.stats();
    assert_eq!(stats.completed, pool_size as u64);
    assert_eq!(stats.rejected, 1);
}

#[tokio::test]
async fn test_freed_worker_admits_again() {
    let executor = TaskExecutor::new("single", 1, 0).unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let rejections = Arc::new(AtomicUsize::new(0));

    let first = executor.submit(held_task(1, gate.clone(), rejections.clone()));
    assert!(executor.submit(held_task(2, gate.clone(), rejections.clone())).is_rejected());

    gate.add_permits(1);
    assert_eq!(first.join().await.unwrap(), 1);

    let third = executor.submit(held_task(3, gate.clone(), rejections.clone()));
    assert!(!third.is_rejected());
    gate.add_permits(1);
    assert_eq!(third.join().await.unwrap(), 3);
    assert_eq!(rejections.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recursive_fork_join_sum() {
    let executor = TaskExecutor::new("sum", 8, 0).unwrap();
    let handle = executor.submit(SumTask {
        low: 0,
        high: 100_000,
        leaf: 1_000,
    });

    let expected: u64 = (0..100_000u64).sum();
    assert_eq!(handle.join().await.unwrap(), expected);
}

#[tokio::test]
async fn test_fork_runs_inline_when_workers_are_busy() {
    let executor = TaskExecutor::new("narrow", 2, 0).unwrap();
    let handle = executor.submit(SumTask {
        low: 0,
        high: 64,
        leaf: 4,
    });

    assert_eq!(handle.join().await.unwrap(), (0..64u64).sum::<u64>());

    let stats = executor.stats();
    assert!(stats.inlined > 0);
    assert_eq!(stats.rejected, 0);
    // Inline children count as submitted too
    assert_eq!(stats.completed, stats.submitted);
}

#[tokio::test]
async fn test_failed_child_fails_parent() {
    let executor = TaskExecutor::new("failing", 4, 0).unwrap();
    let failures = Arc::new(AtomicUsize::new(0));

    let parent_failures = failures.clone();
    let parent = ClosureTask::new("parent", move |ctx| {
        async move {
            let child = ctx.fork(ClosureTask::new("child", |_ctx| {
                async {
                    Err::<u64, _>(StoreError::BackendUnavailable("offline".to_string()))
                }
                .boxed()
            }));
            child.join().await
        }
        .boxed()
    })
    .on_failure(move |_err| {
        parent_failures.fetch_add(1, Ordering::SeqCst);
    });

    let err = executor.submit(parent).join().await.unwrap_err();
    assert!(matches!(err, StoreError::BackendUnavailable(_)));
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(executor.stats().failed, 2);
}

#[tokio::test]
async fn test_shrinking_pool_rejects_sooner() {
    let executor = TaskExecutor::new("shrink", 4, 0).unwrap();
    executor.set_max_workers(1).unwrap();
    assert_eq!(executor.max_workers(), 1);

    let gate = Arc::new(Semaphore::new(0));
    let rejections = Arc::new(AtomicUsize::new(0));
    let first = executor.submit(held_task(1, gate.clone(), rejections.clone()));
    assert!(!first.is_rejected());
    assert!(executor.submit(held_task(2, gate.clone(), rejections.clone())).is_rejected());

    gate.add_permits(1);
    first.join().await.unwrap();
    assert!(executor.set_max_workers(0).is_err());
}
