// Workflow Service Library
// Core engine for parsing and executing GitHub Actions style workflows

pub mod error;
pub mod execution;
pub mod expression;
pub mod runners;
pub mod secrets;
pub mod utils;
pub mod workflow;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

// Re-export workflow types
pub use workflow::{Workflow, WorkflowParser};

// Re-export execution types
pub use execution::{
    cancellation, progress_channel, CancellationHandle, CancellationSignal, ExecutionEvent,
    ExecutionGraph, ExecutorConfig, GraphError, GraphErrorKind, InstanceId, InstanceStatus,
    JobOutcome, MatrixBinding, MatrixExpander, ProgressReceiver, ProgressSender, RunResult,
    RunStatus, WorkflowExecutor,
};

// Re-export runner types
pub use runners::{Runner, RunnerRegistry, ShellRunner, StepAction};

// Re-export secret types
pub use secrets::{RepositoryScope, SecretError, SecretStore};
