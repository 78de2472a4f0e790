// Workflow Executor
// Schedules job instances over the DAG with bounded concurrency

use crate::error::{ServiceError, ServiceResult};
use crate::execution::context::EnvironmentContext;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::{ExecutionGraph, GraphError};
use crate::execution::result::{JobOutcome, RunResult, RunStatus};
use crate::execution::state::{InstanceStatus, RunState};
use crate::execution::step_runner::StepRunner;
use crate::runners::RunnerRegistry;
use crate::secrets::{RepositoryScope, SecretStore};
use crate::workflow::models::Workflow;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Configuration for workflow execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum job instances running at once (0 is treated as 1)
    pub max_concurrency: usize,
    /// Timeout for steps without `timeout-minutes`
    pub default_step_timeout: Option<Duration>,
    /// Workspace the steps run in
    pub working_dir: PathBuf,
    /// Repository scope for secret resolution
    pub scope: RepositoryScope,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            default_step_timeout: None,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            scope: RepositoryScope::default(),
        }
    }
}

/// Requests cancellation of a run. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another signal observing this handle
    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of a cancellation handle
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Every handle is gone; cancellation can no longer happen
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a linked cancellation handle and signal
pub fn cancellation() -> (CancellationHandle, CancellationSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancellationHandle { tx: Arc::new(tx) },
        CancellationSignal { rx },
    )
}

/// Workflow executor
pub struct WorkflowExecutor {
    /// Execution graph
    graph: Arc<ExecutionGraph>,
    /// Configuration
    config: ExecutorConfig,
    secrets: SecretStore,
    registry: Arc<RunnerRegistry>,
    /// Progress event sender
    event_tx: Option<ProgressSender>,
}

impl WorkflowExecutor {
    /// Create a new executor from a workflow
    pub fn from_workflow(workflow: &Workflow) -> Result<Self, GraphError> {
        Ok(Self::new(ExecutionGraph::build(workflow)?))
    }

    /// Create a new executor from an execution graph
    pub fn new(graph: ExecutionGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            config: ExecutorConfig::default(),
            secrets: SecretStore::new(),
            registry: Arc::new(RunnerRegistry::new()),
            event_tx: None,
        }
    }

    /// Set executor configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_secrets(mut self, secrets: SecretStore) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_registry(mut self, registry: RunnerRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    /// Run to completion without external cancellation
    pub async fn execute(&self) -> RunResult {
        self.run(CancellationSignal::never()).await
    }

    /// Run the workflow until every instance is terminal.
    ///
    /// Execution failures are aggregated into the result; only a
    /// scheduler error aborts the run early.
    pub async fn run(&self, mut cancel: CancellationSignal) -> RunResult {
        let start = Instant::now();
        let graph = self.graph.clone();
        let max_concurrency = self.config.max_concurrency.max(1);

        info!(
            workflow = %graph.name(),
            instances = graph.len(),
            max_concurrency,
            "starting workflow run"
        );
        self.event_tx
            .send_event(ExecutionEvent::run_started(graph.name(), graph.len()));

        let step_runner = Arc::new(
            StepRunner::new(self.registry.clone(), self.secrets.clone())
                .with_progress(self.event_tx.clone()),
        );
        let base_ctx = EnvironmentContext::new(&self.config.working_dir, self.config.scope.clone())
            .with_workflow_name(graph.name())
            .with_default_step_timeout(self.config.default_step_timeout);

        let mut tracker = RunTracker::new(&graph, self.event_tx.clone());
        let mut join_set: JoinSet<(usize, JobOutcome)> = JoinSet::new();

        let mut outcome = tracker.promote();
        while outcome.is_ok() {
            if !tracker.cancelled && cancel.is_cancelled() {
                outcome = tracker.cancel_remaining();
                continue;
            }

            if !tracker.cancelled {
                for index in tracker.dispatchable(max_concurrency.saturating_sub(join_set.len())) {
                    if let Err(e) = tracker.start(index) {
                        outcome = Err(e);
                        break;
                    }
                    let instance = graph.instances()[index].clone();
                    let ctx = base_ctx.for_instance(graph.env(), &instance);
                    let runner = step_runner.clone();
                    join_set.spawn(async move {
                        let outcome = runner.run_steps(&instance, &ctx).await;
                        (instance.index, outcome)
                    });
                }
                if outcome.is_err() {
                    break;
                }
            }

            if join_set.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !tracker.cancelled => {
                    outcome = tracker.cancel_remaining();
                }
                joined = join_set.join_next() => {
                    outcome = match joined {
                        Some(Ok((index, job_outcome))) => tracker.complete(index, job_outcome),
                        Some(Err(e)) => Err(ServiceError::SchedulerInternal(format!(
                            "job task failed: {}",
                            e
                        ))),
                        None => Ok(()),
                    };
                }
            }
        }

        if outcome.is_ok() && !tracker.state.all_terminal() {
            outcome = Err(ServiceError::SchedulerInternal(format!(
                "scheduler stalled with {} pending instances",
                tracker.state.count(InstanceStatus::Pending)
            )));
        }

        let internal_error = match outcome {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, "aborting workflow run");
                join_set.shutdown().await;
                tracker.abort(&e.to_string());
                Some(e.to_string())
            }
        };

        let status = if internal_error.is_some() || tracker.state.count(InstanceStatus::Failed) > 0
        {
            RunStatus::Failure
        } else if tracker.cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Success
        };

        let duration = start.elapsed();
        info!(workflow = %graph.name(), status = %status, ?duration, "workflow run finished");
        self.event_tx
            .send_event(ExecutionEvent::run_completed(graph.name(), status, duration));

        RunResult {
            workflow_name: graph.name().to_string(),
            status,
            jobs: tracker.into_outcomes(),
            duration,
            internal_error,
        }
    }
}

/// Scheduler-side bookkeeping. Only the scheduler loop touches it, so
/// every state transition is serialized.
struct RunTracker<'g> {
    graph: &'g ExecutionGraph,
    state: RunState,
    outcomes: Vec<Option<JobOutcome>>,
    running_per_job: HashMap<&'g str, usize>,
    cancelled: bool,
    event_tx: Option<ProgressSender>,
}

impl<'g> RunTracker<'g> {
    fn new(graph: &'g ExecutionGraph, event_tx: Option<ProgressSender>) -> Self {
        Self {
            graph,
            state: RunState::new(graph.len()),
            outcomes: vec![None; graph.len()],
            running_per_job: HashMap::new(),
            cancelled: false,
            event_tx,
        }
    }

    /// Ready instances that may start now, in declaration order
    fn dispatchable(&self, slots: usize) -> Vec<usize> {
        let mut planned: HashMap<&str, usize> = HashMap::new();
        let mut picked = Vec::new();

        for index in self.state.indices_with(InstanceStatus::Ready) {
            if picked.len() >= slots {
                break;
            }
            let instance = &self.graph.instances()[index];
            let job = instance.id.job.as_str();
            let running = self.running_per_job.get(job).copied().unwrap_or(0);
            let planned_for_job = planned.entry(job).or_insert(0);
            if let Some(limit) = instance.job.max_parallel() {
                if running + *planned_for_job >= limit {
                    continue;
                }
            }
            *planned_for_job += 1;
            picked.push(index);
        }
        picked
    }

    fn start(&mut self, index: usize) -> ServiceResult<()> {
        let graph = self.graph;
        self.state.transition(index, InstanceStatus::Running)?;
        let instance = &graph.instances()[index];
        *self
            .running_per_job
            .entry(instance.id.job.as_str())
            .or_insert(0) += 1;

        debug!(job = %instance.id, "dispatching job instance");
        self.event_tx.send_event(ExecutionEvent::job_started(
            instance.id.to_string(),
            instance.display_name(),
            instance.job.steps.len(),
        ));
        Ok(())
    }

    fn complete(&mut self, index: usize, outcome: JobOutcome) -> ServiceResult<()> {
        let graph = self.graph;
        let instance = &graph.instances()[index];
        self.state.transition(index, outcome.status)?;
        if let Some(running) = self.running_per_job.get_mut(instance.id.job.as_str()) {
            *running = running.saturating_sub(1);
        }

        match &outcome.error {
            Some(error) => warn!(job = %instance.id, error = %error, "job instance failed"),
            None => info!(job = %instance.id, status = %outcome.status, "job instance finished"),
        }
        self.event_tx.send_event(ExecutionEvent::job_completed(
            instance.id.to_string(),
            outcome.status,
            outcome.duration,
        ));

        let failed = outcome.status == InstanceStatus::Failed;
        self.outcomes[index] = Some(outcome);

        // After cancellation outcomes are recorded but unblock nothing
        if self.cancelled {
            return Ok(());
        }

        if failed && instance.job.fail_fast() {
            let reason = format!("fail-fast: '{}' failed", instance.id);
            let mut cancelled = 0;
            for &sibling in graph.instances_of(&instance.id.job) {
                if matches!(
                    self.state.status(sibling),
                    Some(InstanceStatus::Pending | InstanceStatus::Ready)
                ) {
                    self.mark_not_run(sibling, InstanceStatus::Cancelled, &reason)?;
                    cancelled += 1;
                }
            }
            if cancelled > 0 {
                self.event_tx.send_event(ExecutionEvent::warning(
                    format!(
                        "fail-fast: cancelled {} remaining instance(s) of '{}'",
                        cancelled, instance.id.job
                    ),
                    Some(instance.id.to_string()),
                ));
            }
        }

        self.promote()
    }

    /// Move pending instances forward until nothing changes: Ready when all
    /// dependencies succeeded, Skipped as soon as one did not.
    fn promote(&mut self) -> ServiceResult<()> {
        let graph = self.graph;
        loop {
            let mut changed = false;

            for index in self.state.indices_with(InstanceStatus::Pending) {
                let instance = &graph.instances()[index];
                let mut blocked_by = None;
                let mut all_succeeded = true;

                for &dep in &instance.dependencies {
                    match self.state.status(dep) {
                        Some(InstanceStatus::Succeeded) => {}
                        Some(
                            status @ (InstanceStatus::Failed
                            | InstanceStatus::Skipped
                            | InstanceStatus::Cancelled),
                        ) => {
                            blocked_by = Some((dep, status));
                            break;
                        }
                        _ => all_succeeded = false,
                    }
                }

                if let Some((dep, status)) = blocked_by {
                    let reason = format!(
                        "dependency '{}' {}",
                        graph.instances()[dep].id,
                        status
                    );
                    self.mark_not_run(index, InstanceStatus::Skipped, &reason)?;
                    changed = true;
                } else if all_succeeded {
                    self.state.transition(index, InstanceStatus::Ready)?;
                    changed = true;
                }
            }

            if !changed {
                return Ok(());
            }
        }
    }

    /// Stop dispatching and cancel everything not yet started
    fn cancel_remaining(&mut self) -> ServiceResult<()> {
        self.cancelled = true;
        info!("cancellation requested, cancelling instances that have not started");

        for status in [InstanceStatus::Ready, InstanceStatus::Pending] {
            for index in self.state.indices_with(status) {
                self.mark_not_run(index, InstanceStatus::Cancelled, "run cancelled")?;
            }
        }
        Ok(())
    }

    fn mark_not_run(
        &mut self,
        index: usize,
        status: InstanceStatus,
        reason: &str,
    ) -> ServiceResult<()> {
        self.state.transition(index, status)?;
        let id = self.graph.instances()[index].id.clone();
        let label = id.to_string();

        match status {
            InstanceStatus::Skipped => {
                debug!(job = %label, reason, "job instance skipped");
                self.event_tx
                    .send_event(ExecutionEvent::job_skipped(&label, reason));
            }
            _ => {
                debug!(job = %label, reason, "job instance cancelled");
                self.event_tx
                    .send_event(ExecutionEvent::job_cancelled(&label, reason));
            }
        }

        self.outcomes[index] = Some(JobOutcome::not_run(id, status, reason));
        Ok(())
    }

    /// Scheduler failure: every non-terminal instance becomes Cancelled
    fn abort(&mut self, message: &str) {
        let reason = format!("run aborted: {}", message);
        for index in self.state.force_cancel_remaining() {
            let id = self.graph.instances()[index].id.clone();
            self.event_tx
                .send_event(ExecutionEvent::job_cancelled(id.to_string(), &reason));
            self.outcomes[index] = Some(JobOutcome::not_run(id, InstanceStatus::Cancelled, &reason));
        }
    }

    fn into_outcomes(self) -> Vec<JobOutcome> {
        let graph = self.graph;
        let state = self.state;
        self.outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.unwrap_or_else(|| {
                    let instance = &graph.instances()[index];
                    JobOutcome::not_run(
                        instance.id.clone(),
                        state.status(index).unwrap_or(InstanceStatus::Cancelled),
                        "not run",
                    )
                })
            })
            .collect()
    }
}
