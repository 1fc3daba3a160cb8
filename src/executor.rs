//! Execution contexts for user callbacks.
//!
//! Listener and connection callbacks are never invoked on the supervisor
//! task; each runs on an [`Executor`] chosen by the caller. When no executor
//! is supplied the client falls back to a shared pool-backed one.

use tokio::runtime::Handle;

/// A unit of callback work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Minimal capability to run a unit of work on some execution context.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Default executor: dispatches jobs to the tokio blocking pool.
///
/// User callbacks are ordinary synchronous closures and may block, so they
/// belong on the blocking pool rather than on runtime worker threads.
#[derive(Debug, Clone)]
pub struct BlockingExecutor {
    handle: Handle,
}

impl BlockingExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Executor for BlockingExecutor {
    fn execute(&self, job: Job) {
        self.handle.spawn_blocking(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn blocking_executor_runs_jobs() {
        let ran = Arc::new(AtomicBool::new(false));
        let executor = BlockingExecutor::new(Handle::current());

        let flag = Arc::clone(&ran);
        executor.execute(Box::new(move || flag.store(true, Ordering::SeqCst)));

        tokio::time::timeout(Duration::from_secs(1), async {
            while !ran.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
