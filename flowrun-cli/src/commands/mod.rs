pub mod plan;
pub mod run;
pub mod validate;

use crate::output;

use std::path::Path;

use color_eyre::Result;

use workflow_service::{ExecutionGraph, Workflow, WorkflowParser};

/// Load a workflow and build its execution graph, reporting failures the
/// same way for every command. Exits with status 1 on an invalid workflow.
pub(crate) fn load_workflow(path: &Path) -> Result<(Workflow, ExecutionGraph)> {
    if !path.exists() {
        color_eyre::eyre::bail!("Workflow file not found: {}", path.display());
    }

    let workflow = match WorkflowParser::from_file(path) {
        Ok(workflow) => workflow,
        Err(e) => {
            output::error(&format!("Parse error: {}", e));
            std::process::exit(1);
        }
    };

    match WorkflowParser::validate(&workflow) {
        Ok(graph) => Ok((workflow, graph)),
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    }
}
