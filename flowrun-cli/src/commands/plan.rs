use crate::commands::load_workflow;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

/// Show the execution plan of a workflow
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,
}

pub fn execute(args: PlanArgs) -> Result<()> {
    let (_, graph) = load_workflow(&args.workflow)?;

    output::header(&format!(
        "Workflow '{}' ({} job instances)",
        graph.name(),
        graph.len()
    ));

    for (level, instances) in graph.parallel_levels().iter().enumerate() {
        output::level_header(level + 1, instances.len());
        for instance in instances {
            let needs = graph.needs_of(&instance.id.job);
            let suffix = if needs.is_empty() {
                String::new()
            } else {
                format!(" (needs: {})", needs.join(", "))
            };
            println!(
                "    {} [{} steps]{}",
                instance.id,
                instance.job.steps.len(),
                suffix
            );
        }
    }

    Ok(())
}
