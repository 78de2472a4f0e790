// Step Runner
// Runs the steps of one job instance in order with per-step secret injection

use crate::execution::context::EnvironmentContext;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::JobInstance;
use crate::execution::result::{JobError, JobErrorKind, JobOutcome, StepOutcome, StepStatus};
use crate::execution::state::InstanceStatus;
use crate::runners::{OutputCallback, RunnerRegistry, StepAction, StepRequest};
use crate::secrets::SecretStore;
use crate::workflow::models::Step;

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Executes the step sequence of a job instance
pub struct StepRunner {
    registry: Arc<RunnerRegistry>,
    secrets: SecretStore,
    event_tx: Option<ProgressSender>,
}

impl StepRunner {
    pub fn new(registry: Arc<RunnerRegistry>, secrets: SecretStore) -> Self {
        Self {
            registry,
            secrets,
            event_tx: None,
        }
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: Option<ProgressSender>) -> Self {
        self.event_tx = tx;
        self
    }

    /// Run every step of `instance` in declaration order.
    ///
    /// The first failing step aborts the rest unless it sets
    /// `continue-on-error`. Secret resolution failures and job timeouts
    /// always fail the instance.
    pub async fn run_steps(&self, instance: &JobInstance, ctx: &EnvironmentContext) -> JobOutcome {
        let start = Instant::now();
        let label = instance.id.to_string();
        let deadline = ctx.job_timeout.map(|timeout| start + timeout);

        let mut steps = Vec::with_capacity(instance.job.steps.len());
        let mut failure: Option<JobError> = None;

        for (index, step) in instance.job.steps.iter().enumerate() {
            if failure.is_some() {
                self.event_tx.send_event(ExecutionEvent::step_skipped(
                    &label,
                    index,
                    "a previous step failed",
                ));
                steps.push(StepOutcome::skipped(index, step.display_name()));
                continue;
            }

            let outcome = match instance.actions.get(index) {
                Some(action) => {
                    self.run_step(index, step, action, ctx, deadline, &label)
                        .await
                }
                None => failed_step(
                    index,
                    step,
                    Duration::ZERO,
                    JobError::new(JobErrorKind::StepExecution, "step has no resolved action"),
                ),
            };

            if outcome.status == StepStatus::Failed && !outcome.continued_on_error {
                failure = outcome.error.clone();
            }
            steps.push(outcome);
        }

        let status = if failure.is_some() {
            InstanceStatus::Failed
        } else {
            InstanceStatus::Succeeded
        };

        JobOutcome {
            id: instance.id.clone(),
            status,
            steps,
            duration: start.elapsed(),
            error: failure,
            reason: None,
        }
    }

    async fn run_step(
        &self,
        index: usize,
        step: &Step,
        action: &StepAction,
        ctx: &EnvironmentContext,
        deadline: Option<Instant>,
        label: &str,
    ) -> StepOutcome {
        let start = Instant::now();
        let name = step.display_name();
        debug!(job = %label, step = index, action = %action.describe(), "starting step");
        self.event_tx
            .send_event(ExecutionEvent::step_started(label, index, &name));

        let remaining = deadline.map(|deadline| deadline.saturating_duration_since(start));
        if remaining == Some(Duration::ZERO) {
            let error = JobError::new(JobErrorKind::Timeout, "job exceeded its timeout");
            return self.finish(label, failed_step(index, step, start.elapsed(), error));
        }

        // Secrets are resolved per step and only for the names it references
        let mut secrets = HashMap::new();
        for secret in step.secret_refs() {
            match self.secrets.resolve(&secret, &ctx.scope) {
                Ok(value) => {
                    secrets.insert(secret, value.expose_lossy());
                }
                Err(e) => {
                    warn!(job = %label, step = index, secret = %secret, "secret resolution failed");
                    self.event_tx.send_event(ExecutionEvent::error(
                        format!("step {}: {}", index + 1, e),
                        Some(label.to_string()),
                    ));
                    let error = JobError::new(JobErrorKind::SecretResolution, e.to_string());
                    return self.finish(label, failed_step(index, step, start.elapsed(), error));
                }
            }
        }

        let mut env = ctx.env.clone();
        for (key, value) in &step.env {
            let value = ctx.interpolate(value, &env, &secrets);
            env.insert(key.clone(), value);
        }

        let action = match action
            .interpolated::<_, Infallible>(|reference| Ok(ctx.lookup(reference, &env, &secrets)))
        {
            Ok(action) => action,
            Err(never) => match never {},
        };

        let Some(runner) = self.registry.resolve(&action) else {
            let message = match &action {
                StepAction::InvokeAction { reference, .. } => {
                    format!("no handler registered for action '{}'", reference)
                }
                StepAction::RunCommand { .. } => "no runner available for command".to_string(),
            };
            let error = JobError::new(JobErrorKind::StepExecution, message);
            let mut outcome = failed_step(index, step, start.elapsed(), error);
            outcome.continued_on_error = step.continue_on_error;
            return self.finish(label, outcome);
        };

        let step_timeout = step
            .timeout_minutes
            .map(|minutes| Duration::from_secs(u64::from(minutes) * 60))
            .or(ctx.default_step_timeout);
        let timeout = match (step_timeout, remaining) {
            (Some(step), Some(job)) => Some(step.min(job)),
            (step, job) => step.or(job),
        };

        let env: HashMap<String, String> = env.into_iter().collect();
        let working_dir = ctx.step_dir(step.working_directory.as_deref());
        let output = runner
            .execute(StepRequest {
                action: &action,
                env: &env,
                working_dir: &working_dir,
                timeout,
                on_output: self.output_callback(label, index),
            })
            .await;

        let redactor = self.secrets.redactor();
        let stdout = redactor.redact(&output.stdout);
        let stderr = redactor.redact(&output.stderr);
        let duration = start.elapsed();

        if output.success() {
            return self.finish(
                label,
                StepOutcome {
                    index,
                    name,
                    status: StepStatus::Succeeded,
                    exit_code: output.exit_code,
                    stdout,
                    stderr,
                    duration,
                    continued_on_error: false,
                    error: None,
                },
            );
        }

        let error = if output.timed_out {
            let limit = timeout.unwrap_or_default();
            JobError::new(
                JobErrorKind::Timeout,
                format!("step '{}' timed out after {:?}", name, limit),
            )
        } else {
            let detail = match output.exit_code {
                Some(code) => format!("exit code {}", code),
                None => stderr
                    .lines()
                    .last()
                    .map(String::from)
                    .unwrap_or_else(|| "no exit code".to_string()),
            };
            JobError::new(
                JobErrorKind::StepExecution,
                format!("step '{}' failed: {}", name, detail),
            )
        };

        self.finish(
            label,
            StepOutcome {
                index,
                name,
                status: StepStatus::Failed,
                exit_code: output.exit_code,
                stdout,
                stderr,
                duration,
                continued_on_error: step.continue_on_error,
                error: Some(error),
            },
        )
    }

    /// Streams output lines as redacted progress events
    fn output_callback(&self, label: &str, index: usize) -> Option<OutputCallback> {
        let tx = self.event_tx.clone()?;
        let redactor = self.secrets.redactor().clone();
        let label = label.to_string();

        Some(Arc::new(move |line: &str, is_error: bool| {
            tx.send_event(ExecutionEvent::step_output(
                label.as_str(),
                index,
                redactor.redact(line),
                is_error,
            ));
        }))
    }

    fn finish(&self, label: &str, outcome: StepOutcome) -> StepOutcome {
        match (&outcome.status, &outcome.error) {
            (StepStatus::Failed, Some(error)) if outcome.continued_on_error => {
                warn!(job = %label, step = outcome.index, error = %error, "step failed, continuing");
            }
            (StepStatus::Failed, Some(error)) => {
                warn!(job = %label, step = outcome.index, error = %error, "step failed");
            }
            _ => debug!(job = %label, step = outcome.index, "step succeeded"),
        }

        self.event_tx.send_event(ExecutionEvent::step_completed(
            label,
            outcome.index,
            outcome.status,
            outcome.duration,
            outcome.exit_code,
        ));
        outcome
    }
}

fn failed_step(index: usize, step: &Step, duration: Duration, error: JobError) -> StepOutcome {
    StepOutcome {
        index,
        name: step.display_name(),
        status: StepStatus::Failed,
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        duration,
        continued_on_error: false,
        error: Some(error),
    }
}
