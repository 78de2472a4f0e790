pub mod models;
pub mod parser;

pub use models::{
    EventKind, Job, JobMap, JobNeeds, Matrix, MatrixCombination, MatrixValue, RunsOn, Step,
    Strategy, Trigger, Workflow,
};
pub use parser::WorkflowParser;
