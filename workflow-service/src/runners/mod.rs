// Runners Module
// Step actions and the runners that execute them

pub mod action;
pub mod shell;

// Re-export key types
pub use action::{ActionRef, CheckoutAction};
pub use shell::{Shell, ShellRunner};

use crate::expression::{self, Reference};
use crate::workflow::models::Step;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// What a step does once its placeholders are resolved
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// `run:` command executed by a shell
    RunCommand { command: String, shell: Shell },
    /// `uses:` action dispatched to a registered handler
    InvokeAction {
        reference: ActionRef,
        with: BTreeMap<String, String>,
    },
}

impl StepAction {
    /// Classify a step. Exactly one of `run` and `uses` must be set.
    pub fn from_step(step: &Step) -> Result<Self, String> {
        match (&step.run, &step.uses) {
            (Some(_), Some(_)) => Err("step cannot define both 'run' and 'uses'".to_string()),
            (None, None) => Err("step must define either 'run' or 'uses'".to_string()),
            (Some(command), None) => {
                let shell = match &step.shell {
                    Some(name) => Shell::parse(name)
                        .ok_or_else(|| format!("unsupported shell '{}'", name))?,
                    None => Shell::Default,
                };
                Ok(StepAction::RunCommand {
                    command: command.clone(),
                    shell,
                })
            }
            (None, Some(uses)) => {
                if step.shell.is_some() {
                    return Err("'shell' is only valid on 'run' steps".to_string());
                }
                Ok(StepAction::InvokeAction {
                    reference: ActionRef::parse(uses)?,
                    with: step.with.clone(),
                })
            }
        }
    }

    /// A copy with every placeholder in the command or inputs resolved
    pub fn interpolated<F, E>(&self, mut resolve: F) -> Result<Self, E>
    where
        F: FnMut(&Reference) -> Result<Option<String>, E>,
    {
        match self {
            StepAction::RunCommand { command, shell } => Ok(StepAction::RunCommand {
                command: expression::interpolate(command, &mut resolve)?,
                shell: *shell,
            }),
            StepAction::InvokeAction { reference, with } => {
                let with = with
                    .iter()
                    .map(|(key, value)| {
                        Ok((key.clone(), expression::interpolate(value, &mut resolve)?))
                    })
                    .collect::<Result<BTreeMap<_, _>, E>>()?;
                Ok(StepAction::InvokeAction {
                    reference: reference.clone(),
                    with,
                })
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            StepAction::RunCommand { shell, .. } => format!("run ({})", shell),
            StepAction::InvokeAction { reference, .. } => format!("uses {}", reference),
        }
    }
}

/// Callback for handling output lines in real-time; the flag marks stderr
pub type OutputCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Everything a runner needs to execute one step
pub struct StepRequest<'a> {
    pub action: &'a StepAction,
    pub env: &'a HashMap<String, String>,
    pub working_dir: &'a Path,
    pub timeout: Option<Duration>,
    pub on_output: Option<OutputCallback>,
}

impl StepRequest<'_> {
    pub(crate) fn emit(&self, line: &str, is_error: bool) {
        if let Some(callback) = &self.on_output {
            callback(line, is_error);
        }
    }
}

/// Output collected while running a step
#[derive(Debug, Clone, Default)]
pub struct RunnerOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (if available)
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl RunnerOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// Failed output carrying an error message on stderr
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            stderr: message.into(),
            exit_code: None,
            ..Default::default()
        }
    }
}

/// Trait for step runners
#[async_trait::async_trait]
pub trait Runner: Send + Sync {
    /// Execute a step and report its output
    async fn execute(&self, request: StepRequest<'_>) -> RunnerOutput;
}

/// Runner registry mapping step actions to runners
pub struct RunnerRegistry {
    shell: Arc<ShellRunner>,
    actions: HashMap<String, Arc<dyn Runner>>,
}

impl RunnerRegistry {
    /// Create a registry with the shell runner and the built-in actions
    pub fn new() -> Self {
        Self::empty().with_action("actions/checkout", CheckoutAction)
    }

    /// Create a registry with the shell runner only
    pub fn empty() -> Self {
        Self {
            shell: Arc::new(ShellRunner::new()),
            actions: HashMap::new(),
        }
    }

    /// Register a handler for `uses:` references with the given key
    /// (`owner/name`, `./local/path` or `docker://image`)
    pub fn register(&mut self, key: impl Into<String>, runner: impl Runner + 'static) {
        self.actions.insert(key.into(), Arc::new(runner));
    }

    pub fn with_action(mut self, key: impl Into<String>, runner: impl Runner + 'static) -> Self {
        self.register(key, runner);
        self
    }

    /// Find the runner for an action
    pub fn resolve(&self, action: &StepAction) -> Option<Arc<dyn Runner>> {
        match action {
            StepAction::RunCommand { .. } => Some(self.shell.clone() as Arc<dyn Runner>),
            StepAction::InvokeAction { reference, .. } => self.actions.get(reference.key()).cloned(),
        }
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
