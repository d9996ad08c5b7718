//! Turns one prompt into one verdict.
//!
//! The user's tasks are fetched from a [`TaskSource`], run on a
//! [`WorkerPool`], and the results are drained until the first failure.
//! A run moves through [`Stage`]s and never retries.

pub mod policy;
pub mod pool;
pub mod signal;

use async_trait::async_trait;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checks::CheckRegistry;
use crate::consts::{DEFAULT_CHECK_TIMEOUT_SECS, DEFAULT_WORKER_POOL_SIZE};
use crate::models::{SendRequest, TaskResult, Verdict};
use crate::tasks::TaskSource;

pub use policy::{Policy, UnknownCheckPolicy};
pub use pool::{PoolStats, WorkerPool};
pub use signal::Tripwire;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("empty prompt")]
    EmptyPrompt,
}

/// The boundary the ingress talks to.
#[async_trait]
pub trait PromptProcessor: Send + Sync {
    /// `Err` only for malformed requests. A rejected prompt is
    /// `Ok(Verdict::Malicious)`.
    async fn process_prompt(&self, request: SendRequest) -> Result<Verdict, PromptError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub worker_pool_size: NonZeroUsize,
    pub check_timeout: Option<Duration>,
    pub policy: Policy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: NonZeroUsize::new(DEFAULT_WORKER_POOL_SIZE).unwrap_or(NonZeroUsize::MIN),
            check_timeout: Some(Duration::from_secs(DEFAULT_CHECK_TIMEOUT_SECS)),
            policy: Policy::default(),
        }
    }
}

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Fetching,
    /// No tasks to run; the policy verdict is returned without a pool.
    ShortCircuit,
    Dispatching,
    Draining,
    Malicious,
    Benign,
}

/// Everything a run observed, for logs and tests.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub verdict: Verdict,
    pub stages: Vec<Stage>,
    pub task_count: usize,
    pub fetch_failed: bool,
    /// Results read before the verdict was decided, in drain order.
    pub results: Vec<TaskResult>,
    /// The result that decided a malicious verdict.
    pub decided_by: Option<TaskResult>,
    /// `None` when the pool never started.
    pub pool: Option<PoolStats>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            verdict: Verdict::Benign,
            stages: vec![Stage::Idle],
            task_count: 0,
            fetch_failed: false,
            results: Vec::new(),
            decided_by: None,
            pool: None,
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(from = ?self.stages.last(), to = ?stage, "pipeline stage");
        self.stages.push(stage);
    }

    fn finish(mut self, verdict: Verdict) -> Self {
        self.verdict = verdict;
        self.enter(match verdict {
            Verdict::Benign => Stage::Benign,
            Verdict::Malicious => Stage::Malicious,
        });
        self
    }
}

/// Fetches a user's tasks, runs them, and aggregates the verdict.
pub struct Pipeline {
    tasks: Arc<dyn TaskSource>,
    pool: WorkerPool,
    policy: Policy,
}

impl Pipeline {
    pub fn new(
        registry: Arc<CheckRegistry>,
        tasks: Arc<dyn TaskSource>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            tasks,
            pool: WorkerPool::new(config.worker_pool_size, registry, config.check_timeout),
            policy: config.policy,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Validate and run the pipeline for one request.
    pub async fn run(&self, request: &SendRequest) -> Result<RunReport, PromptError> {
        if request.prompt.trim().is_empty() {
            return Err(PromptError::EmptyPrompt);
        }

        let user_id = request.user_id;
        let mut report = RunReport::new();

        report.enter(Stage::Fetching);
        let tasks = match self.tasks.user_tasks(user_id).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(%user_id, error = %format!("{e:#}"), "could not fetch user tasks");
                report.fetch_failed = true;
                Vec::new()
            }
        };
        report.task_count = tasks.len();

        if tasks.is_empty() {
            report.enter(Stage::ShortCircuit);
            let verdict = self.policy.on_missing_checks;
            info!(%user_id, %verdict, "no checks to run");
            return Ok(report.finish(verdict));
        }

        report.enter(Stage::Dispatching);
        let tripwire = Arc::new(Tripwire::new());
        let mut batch = self
            .pool
            .run(Arc::new(request.clone()), tasks, tripwire)
            .await;
        report.pool = Some(batch.stats);

        report.enter(Stage::Draining);
        while let Some(result) = batch.results.recv().await {
            let failed = self.policy.is_failure(&result);
            if !result.success() && !failed {
                debug!(%user_id, task_type = %result.task_type, "ignoring unregistered check");
            }
            report.results.push(result.clone());
            if failed {
                info!(%user_id, task_type = %result.task_type, "prompt rejected");
                report.decided_by = Some(result);
                return Ok(report.finish(Verdict::Malicious));
            }
        }

        info!(%user_id, checks = report.results.len(), "prompt accepted");
        Ok(report.finish(Verdict::Benign))
    }
}

#[async_trait]
impl PromptProcessor for Pipeline {
    async fn process_prompt(&self, request: SendRequest) -> Result<Verdict, PromptError> {
        self.run(&request).await.map(|report| report.verdict)
    }
}
