// ============================================================================
// Task Executor
// ============================================================================
//
// Bounded fork/join pool on top of the tokio runtime.
//
// Lifecycle:
//   submit  -> admitted (or rejected at once when pool and queue are full)
//   admitted -> waits for a worker slot -> compute -> completed | failed
//
// Running tasks fork children through their `TaskContext`. A child that finds
// no free worker runs in its parent at join time, so nested fork/join never
// waits on a slot held by its own ancestors.
//
// ============================================================================

pub mod handle;
pub mod pool;
pub mod task;

pub use handle::{ForkedTask, TaskHandle};
pub use pool::{ExecutorStats, TaskContext, TaskExecutor};
pub use task::{ClosureTask, Task, TaskState};
