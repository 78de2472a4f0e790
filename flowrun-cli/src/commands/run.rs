use crate::commands::load_workflow;
use crate::output;

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::eyre;
use color_eyre::Result;

use workflow_service::execution::events::LogLevel;
use workflow_service::execution::result::StepStatus;
use workflow_service::utils::{parse_key_value, read_key_value_file, resolve_working_dir};
use workflow_service::{
    cancellation, progress_channel, ExecutionEvent, ExecutorConfig, InstanceStatus,
    RepositoryScope, RunResult, RunStatus, SecretStore, WorkflowExecutor,
};

/// Run a workflow locally
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,

    /// Provide a secret (can be repeated, format: NAME=VALUE)
    #[arg(long = "secret", short = 's', value_name = "NAME=VALUE")]
    pub secrets: Vec<String>,

    /// YAML mapping of secret names to values
    #[arg(long, value_name = "FILE")]
    pub secrets_file: Option<PathBuf>,

    /// Repository scope the secrets belong to
    #[arg(long, value_name = "OWNER/NAME", default_value = "local")]
    pub repo: String,

    /// Working directory for execution (default: repository root)
    #[arg(long, short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Timeout for steps without timeout-minutes
    #[arg(long, value_name = "MINUTES")]
    pub step_timeout: Option<u64>,

    /// Maximum number of job instances running at once
    #[arg(long, short = 'j', env = "FLOWRUN_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Print the run result as JSON instead of progress output
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let (_, graph) = load_workflow(&args.workflow)?;

    let scope = RepositoryScope::new(args.repo.as_str());
    let secrets = load_secrets(&args, &scope)?;

    let mut config = ExecutorConfig {
        working_dir: resolve_working_dir(args.working_dir.as_deref()),
        scope,
        default_step_timeout: args.step_timeout.map(|m| Duration::from_secs(m * 60)),
        ..ExecutorConfig::default()
    };
    if let Some(max) = args.max_concurrency {
        config.max_concurrency = max;
    }

    if !args.json {
        output::status("Running", &format!("{}", args.workflow.display()));
        output::info(&format!(
            "{} job instances, up to {} at once, in {}",
            graph.len(),
            config.max_concurrency.max(1),
            config.working_dir.display()
        ));
    }

    let (tx, mut rx) = progress_channel();
    let executor = WorkflowExecutor::new(graph)
        .with_config(config)
        .with_secrets(secrets)
        .with_progress(tx);

    let (handle, signal) = cancellation();
    let exec_handle = tokio::spawn(async move { executor.run(signal).await });

    let show_progress = !args.json;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) if show_progress => render(&event),
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !handle.is_cancelled() => {
                if show_progress {
                    output::warning("Cancelling: running jobs will finish, nothing new starts");
                }
                handle.cancel();
            }
        }
    }

    let result = exec_handle.await?;

    if args.json {
        println!("{}", result.to_json()?);
    } else {
        summarize(&result);
    }

    if !result.success() {
        std::process::exit(1);
    }

    Ok(())
}

fn load_secrets(args: &RunArgs, scope: &RepositoryScope) -> Result<SecretStore> {
    let store = SecretStore::new();

    let mut entries = Vec::new();
    if let Some(path) = &args.secrets_file {
        entries.extend(read_key_value_file(path)?);
    }
    for raw in &args.secrets {
        entries.push(parse_key_value(raw)?);
    }

    let count = entries.len();
    for (name, value) in entries {
        store
            .put(&name, value, scope)
            .map_err(|e| eyre!("Invalid secret '{}': {}", name, e))?;
    }
    tracing::debug!(count, scope = %scope, "secrets loaded");
    Ok(store)
}

fn render(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted {
            workflow_name,
            total_instances,
        } => {
            println!();
            output::header(&format!(
                "Workflow '{}' ({} job instances)",
                workflow_name, total_instances
            ));
        }

        ExecutionEvent::RunCompleted {
            status, duration, ..
        } => {
            println!();
            match status {
                RunStatus::Success => output::success(&format!(
                    "Workflow completed successfully in {:.2}s",
                    duration.as_secs_f64()
                )),
                RunStatus::Cancelled => output::warning(&format!(
                    "Workflow cancelled after {:.2}s",
                    duration.as_secs_f64()
                )),
                RunStatus::Failure => output::failure(&format!(
                    "Workflow failed after {:.2}s",
                    duration.as_secs_f64()
                )),
            }
        }

        ExecutionEvent::JobStarted {
            display_name,
            total_steps,
            ..
        } => {
            println!("    Job '{}' ({} steps)", display_name, total_steps);
        }

        ExecutionEvent::JobCompleted {
            instance,
            status,
            duration,
        } => {
            let line = format!(
                "    Job '{}' {} ({:.2}s)",
                instance,
                if *status == InstanceStatus::Succeeded { "OK" } else { "FAIL" },
                duration.as_secs_f64()
            );
            if *status == InstanceStatus::Succeeded {
                output::dim_success(&line);
            } else {
                output::dim_failure(&line);
            }
        }

        ExecutionEvent::JobSkipped { instance, reason } => {
            output::warning(&format!("    Job '{}' skipped: {}", instance, reason));
        }

        ExecutionEvent::JobCancelled { instance, reason } => {
            output::warning(&format!("    Job '{}' cancelled: {}", instance, reason));
        }

        ExecutionEvent::StepStarted {
            step_index,
            display_name,
            ..
        } => {
            println!("      [Step {}] {}", step_index + 1, display_name);
        }

        ExecutionEvent::StepOutput {
            output, is_error, ..
        } => {
            for line in output.lines() {
                if *is_error {
                    output::step_error(line);
                } else {
                    output::step_output(line);
                }
            }
        }

        ExecutionEvent::StepCompleted {
            status,
            duration,
            exit_code,
            ..
        } => {
            let exit_info = match exit_code {
                Some(code) if *code != 0 => format!(" (exit code: {})", code),
                _ => String::new(),
            };
            match status {
                StepStatus::Succeeded => output::dim_success(&format!(
                    "        OK ({:.2}s){}",
                    duration.as_secs_f64(),
                    exit_info
                )),
                StepStatus::Failed => output::dim_failure(&format!(
                    "        FAIL ({:.2}s){}",
                    duration.as_secs_f64(),
                    exit_info
                )),
                StepStatus::Skipped => output::dim("        SKIP"),
            }
        }

        ExecutionEvent::StepSkipped {
            step_index, reason, ..
        } => {
            output::warning(&format!("        Step {} skipped: {}", step_index + 1, reason));
        }

        ExecutionEvent::Log {
            level,
            message,
            instance,
        } => {
            let message = match instance {
                Some(instance) => format!("    {}: {}", instance, message),
                None => message.clone(),
            };
            match level {
                LogLevel::Error => output::error(&message),
                LogLevel::Warning => output::warning(&message),
            }
        }
    }
}

fn summarize(result: &RunResult) {
    let counts = [
        (InstanceStatus::Succeeded, "succeeded"),
        (InstanceStatus::Failed, "failed"),
        (InstanceStatus::Skipped, "skipped"),
        (InstanceStatus::Cancelled, "cancelled"),
    ];
    let summary: Vec<String> = counts
        .iter()
        .map(|(status, label)| (result.count(*status), label))
        .filter(|(count, _)| *count > 0)
        .map(|(count, label)| format!("{} {}", count, label))
        .collect();
    output::info(&format!("Jobs: {}", summary.join(", ")));

    for outcome in result.jobs.iter().filter(|o| o.error.is_some()) {
        if let Some(error) = &outcome.error {
            output::error(&format!("{}: {}", outcome.id, error));
        }
    }
    if let Some(error) = &result.internal_error {
        output::error(error);
    }
}
