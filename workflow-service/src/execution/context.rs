// Environment Context
// Explicit per-instance execution context handed to the step runner

use crate::execution::graph::{InstanceId, JobInstance};
use crate::expression::{self, Reference};
use crate::secrets::RepositoryScope;

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything a job instance may read while running: no step consults
/// process-wide state beyond what is captured here.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    pub workflow_name: String,
    /// Workspace root; step `working-directory` is relative to it
    pub working_dir: PathBuf,
    /// Repository scope used for secret resolution
    pub scope: RepositoryScope,
    /// Instance being run
    pub instance: InstanceId,
    /// Environment shared by every step of the instance
    pub env: BTreeMap<String, String>,
    /// Timeout for steps that do not set `timeout-minutes`
    pub default_step_timeout: Option<Duration>,
    /// Budget for the whole step sequence
    pub job_timeout: Option<Duration>,
}

impl EnvironmentContext {
    pub fn new(working_dir: impl Into<PathBuf>, scope: RepositoryScope) -> Self {
        Self {
            workflow_name: String::new(),
            working_dir: working_dir.into(),
            scope,
            instance: InstanceId::new("", Default::default()),
            env: BTreeMap::new(),
            default_step_timeout: None,
            job_timeout: None,
        }
    }

    pub fn with_workflow_name(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = name.into();
        self
    }

    pub fn with_default_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_step_timeout = timeout;
        self
    }

    /// Derive the context of one instance.
    ///
    /// The environment is layered as built-ins, workflow `env`, then job
    /// `env`; later layers win and may reference `matrix` and `env` values.
    pub fn for_instance(
        &self,
        workflow_env: &BTreeMap<String, String>,
        instance: &JobInstance,
    ) -> Self {
        let mut ctx = Self {
            instance: instance.id.clone(),
            env: BTreeMap::new(),
            job_timeout: instance
                .job
                .timeout_minutes
                .map(|minutes| Duration::from_secs(u64::from(minutes) * 60)),
            ..self.clone()
        };

        ctx.env = ctx.base_env();
        for layer in [workflow_env, &instance.job.env] {
            for (key, value) in layer {
                let value = ctx.interpolate(value, &ctx.env, &HashMap::new());
                ctx.env.insert(key.clone(), value);
            }
        }
        ctx
    }

    /// Built-in variables every step receives
    fn base_env(&self) -> BTreeMap<String, String> {
        let matrix = serde_json::to_string(&self.instance.matrix).unwrap_or_else(|_| "{}".into());

        BTreeMap::from([
            ("CI".to_string(), "true".to_string()),
            ("FLOWRUN_WORKFLOW".to_string(), self.workflow_name.clone()),
            ("FLOWRUN_JOB".to_string(), self.instance.job.clone()),
            ("FLOWRUN_MATRIX".to_string(), matrix),
            ("FLOWRUN_REPOSITORY".to_string(), self.scope.to_string()),
            (
                "FLOWRUN_WORKSPACE".to_string(),
                self.working_dir.display().to_string(),
            ),
        ])
    }

    /// Value of a reference. Missing matrix keys and env names become empty
    /// strings; a secret missing from `secrets` stays unresolved.
    pub fn lookup(
        &self,
        reference: &Reference,
        env: &BTreeMap<String, String>,
        secrets: &HashMap<String, String>,
    ) -> Option<String> {
        match reference {
            Reference::Matrix(key) => Some(
                self.instance
                    .matrix
                    .get(key)
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            ),
            Reference::Env(key) => Some(env.get(key).cloned().unwrap_or_default()),
            Reference::Secret(name) => secrets.get(name).cloned(),
        }
    }

    /// Interpolate `text` against the instance matrix, `env` and the
    /// already-resolved `secrets`
    pub fn interpolate(
        &self,
        text: &str,
        env: &BTreeMap<String, String>,
        secrets: &HashMap<String, String>,
    ) -> String {
        match expression::interpolate::<_, Infallible>(text, |reference| {
            Ok(self.lookup(reference, env, secrets))
        }) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Directory a step runs in
    pub fn step_dir(&self, working_directory: Option<&str>) -> PathBuf {
        match working_directory {
            Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => self.working_dir.join(dir),
            None => self.working_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::graph::ExecutionGraph;
    use crate::workflow::models::Workflow;

    fn graph(yaml: &str) -> ExecutionGraph {
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        ExecutionGraph::build(&workflow).unwrap()
    }

    #[test]
    fn test_instance_env_layers() {
        let graph = graph(
            r#"
name: CI
on: push
env:
  LEVEL: workflow
  TARGET: default
jobs:
  test:
    env:
      LEVEL: job
      OS_NAME: "${{ matrix.os }}"
      LABEL: "${{ env.TARGET }}-${{ matrix.os }}"
    strategy:
      matrix:
        os: [linux]
    steps: [{ run: "true" }]
"#,
        );
        let base = EnvironmentContext::new("/work", RepositoryScope::new("acme/app"))
            .with_workflow_name(graph.name());
        let ctx = base.for_instance(graph.env(), &graph.instances()[0]);

        assert_eq!(ctx.env.get("LEVEL"), Some(&"job".to_string()));
        assert_eq!(ctx.env.get("OS_NAME"), Some(&"linux".to_string()));
        assert_eq!(ctx.env.get("LABEL"), Some(&"default-linux".to_string()));
        assert_eq!(ctx.env.get("CI"), Some(&"true".to_string()));
        assert_eq!(ctx.env.get("FLOWRUN_JOB"), Some(&"test".to_string()));
        assert_eq!(ctx.env.get("FLOWRUN_WORKFLOW"), Some(&"CI".to_string()));
        assert_eq!(
            ctx.env.get("FLOWRUN_MATRIX"),
            Some(&r#"{"os":"linux"}"#.to_string())
        );
    }

    #[test]
    fn test_job_timeout() {
        let graph = graph("on: push\njobs:\n  a:\n    timeout-minutes: 2\n    steps: [{ run: \"true\" }]\n");
        let ctx = EnvironmentContext::new("/work", RepositoryScope::default())
            .for_instance(graph.env(), &graph.instances()[0]);

        assert_eq!(ctx.job_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_interpolate_missing_values() {
        let graph = graph("on: push\njobs:\n  a:\n    steps: [{ run: \"true\" }]\n");
        let ctx = EnvironmentContext::new("/work", RepositoryScope::default())
            .for_instance(graph.env(), &graph.instances()[0]);

        let text = ctx.interpolate(
            "[${{ matrix.os }}][${{ env.NOPE }}][${{ secrets.TOKEN }}][${{ github.sha }}]",
            &ctx.env,
            &HashMap::new(),
        );
        assert_eq!(text, "[][][${{ secrets.TOKEN }}][${{ github.sha }}]");
    }

    #[test]
    fn test_step_dir() {
        let ctx = EnvironmentContext::new("/work", RepositoryScope::default());
        assert_eq!(ctx.step_dir(None), PathBuf::from("/work"));
        assert_eq!(ctx.step_dir(Some("crates/core")), PathBuf::from("/work/crates/core"));
        assert_eq!(ctx.step_dir(Some("/tmp")), PathBuf::from("/tmp"));
    }
}
