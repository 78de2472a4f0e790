// Execution Events
// Progress reporting and event types for workflow execution

use crate::execution::result::{RunStatus, StepStatus};
use crate::execution::state::InstanceStatus;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during workflow execution.
///
/// `instance` is the display form of an instance id, e.g. `test (linux, 18)`.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run started
    RunStarted {
        workflow_name: String,
        total_instances: usize,
    },

    /// Run completed
    RunCompleted {
        workflow_name: String,
        status: RunStatus,
        duration: Duration,
    },

    /// Instance execution started
    JobStarted {
        instance: String,
        display_name: String,
        total_steps: usize,
    },

    /// Instance execution completed
    JobCompleted {
        instance: String,
        status: InstanceStatus,
        duration: Duration,
    },

    /// Instance was skipped because a dependency did not succeed
    JobSkipped { instance: String, reason: String },

    /// Instance was cancelled before it started
    JobCancelled { instance: String, reason: String },

    /// Step execution started
    StepStarted {
        instance: String,
        step_index: usize,
        display_name: String,
    },

    /// Step output line (stdout/stderr), already redacted
    StepOutput {
        instance: String,
        step_index: usize,
        output: String,
        is_error: bool,
    },

    /// Step execution completed
    StepCompleted {
        instance: String,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    },

    /// Step was skipped after an earlier failure
    StepSkipped {
        instance: String,
        step_index: usize,
        reason: String,
    },

    /// Scheduler or step runner notice attached to an instance
    Log {
        level: LogLevel,
        message: String,
        instance: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn run_started(name: impl Into<String>, total_instances: usize) -> Self {
        Self::RunStarted {
            workflow_name: name.into(),
            total_instances,
        }
    }

    pub fn run_completed(name: impl Into<String>, status: RunStatus, duration: Duration) -> Self {
        Self::RunCompleted {
            workflow_name: name.into(),
            status,
            duration,
        }
    }

    pub fn job_started(
        instance: impl Into<String>,
        display_name: impl Into<String>,
        total_steps: usize,
    ) -> Self {
        Self::JobStarted {
            instance: instance.into(),
            display_name: display_name.into(),
            total_steps,
        }
    }

    pub fn job_completed(
        instance: impl Into<String>,
        status: InstanceStatus,
        duration: Duration,
    ) -> Self {
        Self::JobCompleted {
            instance: instance.into(),
            status,
            duration,
        }
    }

    pub fn job_skipped(instance: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::JobSkipped {
            instance: instance.into(),
            reason: reason.into(),
        }
    }

    pub fn job_cancelled(instance: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::JobCancelled {
            instance: instance.into(),
            reason: reason.into(),
        }
    }

    pub fn step_started(
        instance: impl Into<String>,
        step_index: usize,
        display_name: impl Into<String>,
    ) -> Self {
        Self::StepStarted {
            instance: instance.into(),
            step_index,
            display_name: display_name.into(),
        }
    }

    pub fn step_output(
        instance: impl Into<String>,
        step_index: usize,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::StepOutput {
            instance: instance.into(),
            step_index,
            output: output.into(),
            is_error,
        }
    }

    pub fn step_completed(
        instance: impl Into<String>,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    ) -> Self {
        Self::StepCompleted {
            instance: instance.into(),
            step_index,
            status,
            duration,
            exit_code,
        }
    }

    pub fn step_skipped(
        instance: impl Into<String>,
        step_index: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepSkipped {
            instance: instance.into(),
            step_index,
            reason: reason.into(),
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, instance: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            instance,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, instance: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            instance,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::run_started("CI", 2));
        tx.send_event(ExecutionEvent::job_started("build", "Build", 3));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::RunStarted { total_instances: 2, .. }));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(event2, ExecutionEvent::JobStarted { .. }));
    }

    #[test]
    fn test_event_construction() {
        let event = ExecutionEvent::job_completed(
            "test (linux)",
            InstanceStatus::Succeeded,
            Duration::from_secs(30),
        );

        if let ExecutionEvent::JobCompleted {
            instance,
            status,
            duration,
        } = event
        {
            assert_eq!(instance, "test (linux)");
            assert_eq!(status, InstanceStatus::Succeeded);
            assert_eq!(duration, Duration::from_secs(30));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::warning("test", None));
    }
}
