// Run Results
// Per-step, per-instance and per-run outcomes

use crate::execution::graph::InstanceId;
use crate::execution::state::InstanceStatus;

use serde::{Serialize, Serializer};

use std::fmt;
use std::time::Duration;

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Result of a single step. Output is already redacted.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(serialize_with = "duration_secs")]
    pub duration: Duration,
    /// Step failed but `continue-on-error` let the job proceed
    pub continued_on_error: bool,
    pub error: Option<JobError>,
}

impl StepOutcome {
    pub fn skipped(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            status: StepStatus::Skipped,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            continued_on_error: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// A referenced secret could not be resolved
    SecretResolution,
    /// A step's command or action failed
    StepExecution,
    /// A step or the job exceeded its time budget
    Timeout,
}

/// Why an instance failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of one job instance
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub id: InstanceId,
    pub status: InstanceStatus,
    pub steps: Vec<StepOutcome>,
    #[serde(serialize_with = "duration_secs")]
    pub duration: Duration,
    pub error: Option<JobError>,
    /// Why the instance was skipped or cancelled
    pub reason: Option<String>,
}

impl JobOutcome {
    /// Outcome of an instance that never ran
    pub fn not_run(id: InstanceId, status: InstanceStatus, reason: impl Into<String>) -> Self {
        Self {
            id,
            status,
            steps: Vec::new(),
            duration: Duration::ZERO,
            error: None,
            reason: Some(reason.into()),
        }
    }
}

/// Final report of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub workflow_name: String,
    pub status: RunStatus,
    /// One entry per instance, in declaration order
    pub jobs: Vec<JobOutcome>,
    #[serde(serialize_with = "duration_secs")]
    pub duration: Duration,
    /// Scheduler failure that aborted the run
    pub internal_error: Option<String>,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn outcome(&self, id: &InstanceId) -> Option<&JobOutcome> {
        self.jobs.iter().find(|outcome| outcome.id == *id)
    }

    /// Outcomes of every instance of `job`
    pub fn outcomes_for<'a>(&'a self, job: &'a str) -> impl Iterator<Item = &'a JobOutcome> + 'a {
        self.jobs.iter().filter(move |outcome| outcome.id.job == job)
    }

    pub fn count(&self, status: InstanceStatus) -> usize {
        self.jobs.iter().filter(|o| o.status == status).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn duration_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
