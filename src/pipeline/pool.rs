use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::signal::Tripwire;
use crate::checks::{Check, CheckRegistry};
use crate::models::{SendRequest, TaskOutcome, TaskResult, UserTask};

type TaskQueue = Arc<Mutex<mpsc::Receiver<UserTask>>>;

/// Counters for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub submitted: usize,
    /// Tasks pulled from the queue and run to a result.
    pub executed: usize,
    /// Tasks left in the queue when the workers stopped.
    pub skipped: usize,
    /// Times the tripwire actually fired. Never more than one.
    pub cancellations: usize,
    /// Times a worker asked to fire it.
    pub trip_attempts: usize,
    /// Workers counted out by their exit guard. Equals `workers` once the
    /// batch is returned.
    pub exited: usize,
}

/// A finished batch: every worker has exited and the results channel is closed.
pub struct Batch {
    pub results: mpsc::Receiver<TaskResult>,
    pub stats: PoolStats,
}

/// Runs a finite batch of tasks with a fixed number of workers.
pub struct WorkerPool {
    size: NonZeroUsize,
    registry: Arc<CheckRegistry>,
    check_timeout: Option<Duration>,
}

impl WorkerPool {
    pub fn new(
        size: NonZeroUsize,
        registry: Arc<CheckRegistry>,
        check_timeout: Option<Duration>,
    ) -> Self {
        Self {
            size,
            registry,
            check_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size.get()
    }

    /// Execute `tasks` and wait for every worker to exit.
    ///
    /// A rejection or execution error trips the wire, after which idle
    /// workers stop pulling. Checks already in flight finish and still
    /// publish their result.
    pub async fn run(
        &self,
        request: Arc<SendRequest>,
        tasks: Vec<UserTask>,
        tripwire: Arc<Tripwire>,
    ) -> Batch {
        let submitted = tasks.len();
        let capacity = submitted.max(1);

        let (task_tx, task_rx) = mpsc::channel(capacity);
        let queue: TaskQueue = Arc::new(Mutex::new(task_rx));
        // Sized so a worker never blocks publishing, even before the drain starts.
        let (result_tx, result_rx) = mpsc::channel(capacity);

        let workers = self.size.get();
        let exited = Arc::new(AtomicUsize::new(0));
        let wins = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicUsize::new(0));

        let mut set = JoinSet::new();
        for id in 0..workers {
            let worker = Worker {
                id,
                queue: Arc::clone(&queue),
                results: result_tx.clone(),
                registry: Arc::clone(&self.registry),
                request: Arc::clone(&request),
                tripwire: Arc::clone(&tripwire),
                check_timeout: self.check_timeout,
                wins: Arc::clone(&wins),
                executed: Arc::clone(&executed),
                _exit: ExitGuard {
                    id,
                    workers,
                    exited: Arc::clone(&exited),
                },
            };
            set.spawn(worker.run());
        }
        drop(result_tx);

        let mut skipped = 0;
        for task in tasks {
            if let Err(e) = task_tx.send(task).await {
                debug!(task_type = %e.0.task_type(), "workers gone, task dropped");
                skipped += 1;
            }
        }
        drop(task_tx);

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "pipeline worker aborted");
            }
        }

        let mut queue = queue.lock().await;
        while let Ok(task) = queue.try_recv() {
            debug!(task_type = %task.task_type(), "cancelled before start, task dropped");
            skipped += 1;
        }

        let stats = PoolStats {
            workers,
            submitted,
            executed: executed.load(Ordering::SeqCst),
            skipped,
            cancellations: wins.load(Ordering::SeqCst),
            trip_attempts: tripwire.attempts(),
            exited: exited.load(Ordering::SeqCst),
        };
        if stats.exited != workers {
            error!(?stats, "workers unaccounted for after join");
        }
        debug!(?stats, "pool drained");

        Batch {
            results: result_rx,
            stats,
        }
    }
}

struct Worker {
    id: usize,
    queue: TaskQueue,
    results: mpsc::Sender<TaskResult>,
    registry: Arc<CheckRegistry>,
    request: Arc<SendRequest>,
    tripwire: Arc<Tripwire>,
    check_timeout: Option<Duration>,
    wins: Arc<AtomicUsize>,
    executed: Arc<AtomicUsize>,
    _exit: ExitGuard,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.tripwire.tripped() => {
                    debug!(worker = self.id, "cancelled, not pulling more work");
                    break;
                }
                task = next_task(&self.queue) => task,
            };
            let Some(task) = next else {
                break;
            };

            let task_type = task.task_type().to_string();
            let outcome = match self.registry.get(&task_type) {
                Some(check) => self.execute(check, &task_type).await,
                None => {
                    warn!(
                        worker = self.id,
                        user_id = %task.user_id,
                        task_type = %task_type,
                        "no check registered for task type"
                    );
                    TaskOutcome::Unregistered
                }
            };

            let conclusive = matches!(outcome, TaskOutcome::Rejected | TaskOutcome::Errored(_));
            self.executed.fetch_add(1, Ordering::SeqCst);
            if self
                .results
                .send(TaskResult::new(task_type, outcome))
                .await
                .is_err()
            {
                break;
            }

            if conclusive {
                if self.tripwire.trip() {
                    self.wins.fetch_add(1, Ordering::SeqCst);
                    debug!(worker = self.id, "tripped cancellation");
                }
                break;
            }
        }
    }

    async fn execute(&self, check: Arc<dyn Check>, task_type: &str) -> TaskOutcome {
        let user_id = self.request.user_id;
        let outcome = run_check(check, Arc::clone(&self.request), self.check_timeout).await;
        match &outcome {
            TaskOutcome::Passed => {
                debug!(worker = self.id, %user_id, task_type, "check passed")
            }
            TaskOutcome::Rejected => {
                info!(worker = self.id, %user_id, task_type, "check rejected prompt")
            }
            TaskOutcome::Errored(e) => {
                error!(worker = self.id, %user_id, task_type, error = %e, "check failed to run")
            }
            TaskOutcome::Unregistered => {}
        }
        outcome
    }
}

async fn next_task(queue: &TaskQueue) -> Option<UserTask> {
    queue.lock().await.recv().await
}

/// Runs one check on its own task so a panic or timeout becomes an error result.
///
/// The task is aborted as soon as nobody waits on it: on timeout, or when
/// the worker itself is dropped because the run was abandoned.
async fn run_check(
    check: Arc<dyn Check>,
    request: Arc<SendRequest>,
    limit: Option<Duration>,
) -> TaskOutcome {
    let mut handle = AbortOnDrop(tokio::spawn(async move { check.evaluate(&request).await }));

    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut handle.0).await {
            Ok(joined) => joined,
            Err(_) => return TaskOutcome::Errored(format!("timed out after {limit:?}")),
        },
        None => (&mut handle.0).await,
    };

    match joined {
        Ok(Ok(true)) => TaskOutcome::Passed,
        Ok(Ok(false)) => TaskOutcome::Rejected,
        Ok(Err(e)) => TaskOutcome::Errored(format!("{e:#}")),
        Err(e) => TaskOutcome::Errored(format!("check panicked: {e}")),
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Counts a worker out however it exits, abort included.
struct ExitGuard {
    id: usize,
    workers: usize,
    exited: Arc<AtomicUsize>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.exited.fetch_add(1, Ordering::SeqCst) + 1 == self.workers {
            debug!(worker = self.id, "last worker exited");
        }
    }
}
