//! Fixed-size worker pool with a batch barrier.
//!
//! A [`WorkerPool`] runs `N` long-lived workers on the tokio runtime. Tasks
//! are queued with [`submit`](WorkerPool::submit) and picked up by whichever
//! worker is free; [`join`](WorkerPool::join) waits until every task
//! submitted since the previous join has finished, after which the pool is
//! ready for the next batch.
//!
//! Each worker owns a context value handed to every task it runs. This is
//! how per-worker resources (an HTTP client with its own connections) are
//! partitioned without any locking on the resource itself.
//!
//! A task that returns an error or panics is logged and counted; the worker
//! keeps draining the queue.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default number of workers.
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Error type returned by pool tasks.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

type Task<C> = Box<dyn FnOnce(Arc<C>) -> BoxFuture<'static, Result<(), TaskError>> + Send>;

/// Outcome counts for the batch closed by [`WorkerPool::join`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinSummary {
    /// Tasks that returned `Ok`
    pub completed: usize,

    /// Tasks that returned an error or panicked
    pub failed: usize,
}

#[derive(Default)]
struct PoolState {
    pending: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    idle: Notify,
}

impl PoolState {
    fn finish_one(&self, ok: bool) {
        if ok {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

// =============================================================================
// Worker Pool
// =============================================================================

/// Bounded-concurrency executor with one context value per worker.
///
/// Must be created from within a tokio runtime.
///
/// # Example
///
/// ```
/// use dezoom_cache::pool::WorkerPool;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let pool = WorkerPool::new(4, |_| ());
///     let counter = Arc::new(AtomicUsize::new(0));
///
///     for _ in 0..20 {
///         let counter = Arc::clone(&counter);
///         pool.submit(move |_ctx| async move {
///             counter.fetch_add(1, Ordering::SeqCst);
///             Ok(())
///         });
///     }
///
///     let summary = pool.join().await;
///     assert_eq!(summary.completed, 20);
///     assert_eq!(counter.load(Ordering::SeqCst), 20);
/// }
/// ```
pub struct WorkerPool<C> {
    sender: mpsc::UnboundedSender<Task<C>>,
    state: Arc<PoolState>,
    workers: Vec<JoinHandle<()>>,
}

impl<C: Send + Sync + 'static> WorkerPool<C> {
    /// Spawn `worker_count` workers, building each context with `make_context`.
    ///
    /// A count of zero is raised to one.
    pub fn new(worker_count: usize, make_context: impl FnMut(usize) -> C) -> Self {
        let contexts = (0..worker_count.max(1)).map(make_context).collect();
        Self::from_contexts(contexts)
    }

    /// Spawn one worker per supplied context.
    pub fn from_contexts(contexts: Vec<C>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<Task<C>>();
        let receiver = Arc::new(Mutex::new(receiver));
        let state = Arc::new(PoolState::default());

        let workers = contexts
            .into_iter()
            .enumerate()
            .map(|(id, context)| {
                let receiver = Arc::clone(&receiver);
                let state = Arc::clone(&state);
                tokio::spawn(run_worker(id, Arc::new(context), receiver, state))
            })
            .collect();

        Self {
            sender,
            state,
            workers,
        }
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of submitted tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Queue a task. Never blocks.
    ///
    /// The task receives the context of the worker that runs it.
    pub fn submit<F, Fut>(&self, task: F)
    where
        F: FnOnce(Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.state.pending.fetch_add(1, Ordering::SeqCst);
        let task: Task<C> = Box::new(move |ctx| task(ctx).boxed());
        if self.sender.send(task).is_err() {
            error!("worker pool queue is closed; task dropped");
            self.state.finish_one(false);
        }
    }

    /// Wait until every task submitted since the last join has finished.
    ///
    /// Returns the completion counts of that batch and resets them.
    pub async fn join(&self) -> JoinSummary {
        loop {
            // Register interest before checking so a wakeup cannot be missed
            let idle = self.state.idle.notified();
            if self.state.pending.load(Ordering::SeqCst) == 0 {
                break;
            }
            idle.await;
        }

        JoinSummary {
            completed: self.state.completed.swap(0, Ordering::SeqCst),
            failed: self.state.failed.swap(0, Ordering::SeqCst),
        }
    }

    /// Close the queue, let workers drain it, and wait for them to exit.
    pub async fn shutdown(self) {
        let Self {
            sender, workers, ..
        } = self;
        drop(sender);
        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn run_worker<C: Send + Sync + 'static>(
    id: usize,
    context: Arc<C>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Task<C>>>>,
    state: Arc<PoolState>,
) {
    loop {
        let task = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(task) = task else {
            debug!(worker = id, "worker exiting");
            break;
        };

        let ctx = Arc::clone(&context);
        let outcome = AssertUnwindSafe(async move { task(ctx).await })
            .catch_unwind()
            .await;

        let ok = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(worker = id, error = %e, "task failed");
                false
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(worker = id, panic = %message, "task panicked");
                false
            }
        };
        state.finish_one(ok);
    }
}

// =============================================================================
// Tests
// =============================================================================
