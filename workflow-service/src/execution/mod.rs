// Execution Engine Module
// DAG construction, matrix expansion, scheduling and step execution

pub mod context;
pub mod events;
pub mod executor;
pub mod graph;
pub mod matrix;
pub mod result;
pub mod state;
pub mod step_runner;

// Re-export key types
pub use context::EnvironmentContext;
pub use events::{progress_channel, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use executor::{
    cancellation, CancellationHandle, CancellationSignal, ExecutorConfig, WorkflowExecutor,
};
pub use graph::{ExecutionGraph, GraphError, GraphErrorKind, InstanceId, JobInstance};
pub use matrix::{MatrixBinding, MatrixExpander};
pub use result::{
    JobError, JobErrorKind, JobOutcome, RunResult, RunStatus, StepOutcome, StepStatus,
};
pub use state::{InstanceStatus, RunState};
pub use step_runner::StepRunner;
