use crate::commands::load_workflow;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

/// Validate a workflow YAML file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    output::status("Validating", &format!("{}", args.workflow.display()));

    let (workflow, graph) = load_workflow(&args.workflow)?;

    let steps_count: usize = workflow.jobs.iter().map(|(_, job)| job.steps.len()).sum();
    output::check(&format!(
        "Structure: {} jobs, {} steps",
        workflow.jobs.len(),
        steps_count
    ));
    output::check(&format!(
        "Matrices expanded: {} job instances",
        graph.len()
    ));

    let secrets: std::collections::BTreeSet<String> = workflow
        .jobs
        .iter()
        .flat_map(|(_, job)| job.steps.iter().flat_map(|step| step.secret_refs()))
        .collect();
    if !secrets.is_empty() {
        output::info(&format!(
            "Secrets referenced: {}",
            secrets.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    println!();
    output::success("Workflow is valid");

    Ok(())
}
