// Execution Graph (DAG) Builder
// Builds the job-instance DAG from a workflow definition

use crate::execution::matrix::{MatrixBinding, MatrixExpander};
use crate::expression;
use crate::runners::StepAction;
use crate::workflow::models::{Job, Workflow};

use serde::Serialize;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
    /// Job names of the offending cycle, first name repeated at the end
    pub cycle: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular dependency detected
    CyclicDependency,
    /// Reference to unknown job
    UnknownDependency,
    /// Matrix that cannot be expanded
    InvalidMatrix,
    /// Invalid workflow structure
    InvalidStructure,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn cyclic(cycle: Vec<String>) -> Self {
        Self {
            message: format!("circular dependency detected in jobs: {}", cycle.join(" -> ")),
            kind: GraphErrorKind::CyclicDependency,
            cycle,
        }
    }

    pub fn unknown_dependency(job: &str, dependency: &str) -> Self {
        Self {
            message: format!("job '{}' depends on unknown job '{}'", job, dependency),
            kind: GraphErrorKind::UnknownDependency,
            cycle: Vec::new(),
        }
    }

    pub fn invalid_matrix(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::InvalidMatrix,
            cycle: Vec::new(),
        }
    }

    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::InvalidStructure,
            cycle: Vec::new(),
        }
    }
}

/// Identity of a job instance: job id plus matrix binding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceId {
    pub job: String,
    pub matrix: MatrixBinding,
}

impl InstanceId {
    pub fn new(job: impl Into<String>, matrix: MatrixBinding) -> Self {
        Self {
            job: job.into(),
            matrix,
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.matrix.is_empty() {
            f.write_str(&self.job)
        } else {
            write!(f, "{} ({})", self.job, self.matrix)
        }
    }
}

/// A node representing one matrix-bound job in the execution graph
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub id: InstanceId,
    /// Position in declaration order; used to break scheduling ties
    pub index: usize,
    /// Job definition shared by all instances of the job
    pub job: Arc<Job>,
    /// Actions of the job's steps, aligned with `job.steps`
    pub actions: Arc<Vec<StepAction>>,
    /// Instances this instance waits for
    pub dependencies: Vec<usize>,
    /// Instances waiting for this instance
    pub dependents: Vec<usize>,
}

impl JobInstance {
    pub fn display_name(&self) -> String {
        let name = self.job.name.as_deref().unwrap_or(&self.id.job);
        if self.id.matrix.is_empty() {
            name.to_string()
        } else {
            format!("{} ({})", name, self.id.matrix)
        }
    }
}

/// Execution graph representing the DAG of job instances
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    name: String,
    /// Workflow-level environment
    env: BTreeMap<String, String>,
    instances: Vec<JobInstance>,
    /// Instance indices per job id
    job_instances: HashMap<String, Vec<usize>>,
    /// Job ids in topological order, declaration order among peers
    job_order: Vec<String>,
    /// Needs per job id
    job_needs: HashMap<String, Vec<String>>,
}

impl ExecutionGraph {
    /// Build an execution graph from a workflow.
    ///
    /// Purely static: validates structure and dependencies, expands
    /// matrices and wires fan-in edges without running anything.
    pub fn build(workflow: &Workflow) -> Result<Self, GraphError> {
        Self::validate_structure(workflow)?;

        let mut job_needs = HashMap::new();
        for (id, job) in workflow.jobs.iter() {
            let needs = job.needs.to_vec();
            for dep in &needs {
                if !workflow.jobs.contains_key(dep) {
                    return Err(GraphError::unknown_dependency(id, dep));
                }
            }
            job_needs.insert(id.to_string(), needs);
        }

        let declared: Vec<&str> = workflow.jobs.keys().collect();
        let job_order = Self::topological_jobs(&declared, &job_needs)?;

        // Expand matrices in declaration order
        let mut instances: Vec<JobInstance> = Vec::new();
        let mut job_instances: HashMap<String, Vec<usize>> = HashMap::new();
        for (id, job) in workflow.jobs.iter() {
            let matrix = job.strategy.as_ref().and_then(|s| s.matrix.as_ref());
            let bindings = MatrixExpander::expand(matrix)
                .map_err(|e| GraphError::invalid_matrix(format!("job '{}': {}", id, e.message)))?;

            let job = Arc::new(job.clone());
            let actions = Arc::new(Self::step_actions(id, &job)?);
            let indices = job_instances.entry(id.to_string()).or_default();
            for binding in bindings {
                let index = instances.len();
                indices.push(index);
                instances.push(JobInstance {
                    id: InstanceId::new(id, binding),
                    index,
                    job: job.clone(),
                    actions: actions.clone(),
                    dependencies: Vec::new(),
                    dependents: Vec::new(),
                });
            }
        }

        // Fan-in: every instance of a job depends on every instance of each need
        for (id, needs) in &job_needs {
            let Some(own) = job_instances.get(id) else {
                continue;
            };
            for dep in needs {
                let Some(upstream) = job_instances.get(dep) else {
                    continue;
                };
                for &target in own {
                    instances[target].dependencies.extend(upstream.iter().copied());
                }
                for &source in upstream {
                    instances[source].dependents.extend(own.iter().copied());
                }
            }
        }
        for instance in &mut instances {
            instance.dependencies.sort_unstable();
            instance.dependents.sort_unstable();
        }

        Ok(Self {
            name: workflow.display_name().to_string(),
            env: workflow.env.clone(),
            instances,
            job_instances,
            job_order,
            job_needs,
        })
    }

    fn validate_structure(workflow: &Workflow) -> Result<(), GraphError> {
        for (key, value) in &workflow.env {
            if expression::references_secrets(value) {
                return Err(GraphError::invalid_structure(format!(
                    "workflow env '{}' references a secret; secrets may only be used in step 'run', 'with' or 'env'",
                    key
                )));
            }
        }

        for (id, job) in workflow.jobs.iter() {
            if job.steps.is_empty() {
                return Err(GraphError::invalid_structure(format!(
                    "job '{}' has no steps",
                    id
                )));
            }
            for (key, value) in &job.env {
                if expression::references_secrets(value) {
                    return Err(GraphError::invalid_structure(format!(
                        "job '{}' env '{}' references a secret; secrets may only be used in step 'run', 'with' or 'env'",
                        id, key
                    )));
                }
            }
        }

        Ok(())
    }

    fn step_actions(id: &str, job: &Job) -> Result<Vec<StepAction>, GraphError> {
        job.steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                StepAction::from_step(step).map_err(|e| {
                    GraphError::invalid_structure(format!("job '{}' step {}: {}", id, i + 1, e))
                })
            })
            .collect()
    }

    /// Kahn's algorithm over job ids; peers keep declaration order
    fn topological_jobs(
        declared: &[&str],
        needs: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<String>, GraphError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut adj_list: HashMap<&str, Vec<&str>> = HashMap::new();

        for &job in declared {
            let deps = needs.get(job).map(Vec::as_slice).unwrap_or_default();
            in_degree.insert(job, deps.len());
            for dep in deps {
                adj_list.entry(dep.as_str()).or_default().push(job);
            }
        }

        let mut queue: VecDeque<&str> = declared
            .iter()
            .copied()
            .filter(|job| in_degree.get(job) == Some(&0))
            .collect();

        let mut order = Vec::with_capacity(declared.len());
        while let Some(job) = queue.pop_front() {
            order.push(job.to_string());
            // Dependents in declaration order
            let mut ready = Vec::new();
            for &dependent in adj_list.get(job).map(Vec::as_slice).unwrap_or_default() {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(dependent);
                    }
                }
            }
            ready.sort_by_key(|job| declared.iter().position(|d| d == job));
            queue.extend(ready);
        }

        if order.len() < declared.len() {
            return Err(GraphError::cyclic(Self::find_cycle(declared, needs, &in_degree)));
        }

        Ok(order)
    }

    /// Walk unprocessed jobs along their unprocessed needs until a job repeats
    fn find_cycle(
        declared: &[&str],
        needs: &HashMap<String, Vec<String>>,
        in_degree: &HashMap<&str, usize>,
    ) -> Vec<String> {
        let remaining = |job: &str| in_degree.get(job).copied().unwrap_or(0) > 0;

        let Some(start) = declared.iter().copied().find(|job| remaining(*job)) else {
            return Vec::new();
        };

        let mut path: Vec<&str> = Vec::new();
        let mut current = start;
        loop {
            if let Some(pos) = path.iter().position(|job| *job == current) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|job| job.to_string()).collect();
                cycle.push(current.to_string());
                return cycle;
            }
            path.push(current);

            let next = needs
                .get(current)
                .and_then(|deps| deps.iter().find(|dep| remaining(dep.as_str())));
            match next {
                Some(dep) => current = dep.as_str(),
                None => return path.iter().map(|job| job.to_string()).collect(),
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// All instances in declaration order
    pub fn instances(&self) -> &[JobInstance] {
        &self.instances
    }

    pub fn find(&self, id: &InstanceId) -> Option<&JobInstance> {
        self.instances_of(&id.job)
            .iter()
            .map(|&i| &self.instances[i])
            .find(|instance| instance.id == *id)
    }

    /// Instance indices of a job, in matrix expansion order
    pub fn instances_of(&self, job: &str) -> &[usize] {
        self.job_instances
            .get(job)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Direct needs of a job
    pub fn needs_of(&self, job: &str) -> &[String] {
        self.job_needs
            .get(job)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Job ids in dependency order
    pub fn job_order(&self) -> &[String] {
        &self.job_order
    }

    /// Instances in topological order
    pub fn topological_order(&self) -> Vec<&JobInstance> {
        self.job_order
            .iter()
            .flat_map(|job| self.instances_of(job).iter().map(|&i| &self.instances[i]))
            .collect()
    }

    /// Group instances into levels that could run in parallel
    pub fn parallel_levels(&self) -> Vec<Vec<&JobInstance>> {
        let mut job_level: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<&JobInstance>> = Vec::new();

        for job in &self.job_order {
            let level = self
                .needs_of(job)
                .iter()
                .filter_map(|dep| job_level.get(dep.as_str()))
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);
            job_level.insert(job.as_str(), level);

            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].extend(self.instances_of(job).iter().map(|&i| &self.instances[i]));
        }

        for level in &mut levels {
            level.sort_by_key(|instance| instance.index);
        }
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(yaml: &str) -> Result<ExecutionGraph, GraphError> {
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        ExecutionGraph::build(&workflow)
    }

    fn job_ids(instances: &[&JobInstance]) -> Vec<String> {
        instances.iter().map(|i| i.id.to_string()).collect()
    }

    #[test]
    fn test_simple_chain() {
        let graph = build(
            r#"
on: push
jobs:
  build:
    steps: [{ run: cargo build }]
  test:
    needs: build
    steps: [{ run: cargo test }]
  deploy:
    needs: [test]
    steps: [{ run: echo deploy }]
"#,
        )
        .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(job_ids(&graph.topological_order()), vec!["build", "test", "deploy"]);
        assert_eq!(graph.instances()[1].dependencies, vec![0]);
        assert_eq!(graph.instances()[0].dependents, vec![1]);
    }

    #[test]
    fn test_needs_declared_later() {
        let graph = build(
            r#"
on: push
jobs:
  deploy:
    needs: build
    steps: [{ run: echo deploy }]
  build:
    steps: [{ run: cargo build }]
"#,
        )
        .unwrap();

        assert_eq!(graph.job_order(), &["build".to_string(), "deploy".to_string()]);
        assert_eq!(graph.instances()[0].dependencies, vec![1]);
    }

    #[test]
    fn test_mutual_cycle_detected() {
        let err = build(
            r#"
on: push
jobs:
  a:
    needs: b
    steps: [{ run: "true" }]
  b:
    needs: a
    steps: [{ run: "true" }]
"#,
        )
        .unwrap_err();

        assert_eq!(err.kind, GraphErrorKind::CyclicDependency);
        assert_eq!(err.cycle, vec!["a", "b", "a"]);
        assert!(err.message.contains("a -> b -> a"));
    }

    #[test]
    fn test_self_loop_detected() {
        let err = build(
            r#"
on: push
jobs:
  lint:
    steps: [{ run: "true" }]
  a:
    needs: [lint, a]
    steps: [{ run: "true" }]
"#,
        )
        .unwrap_err();

        assert_eq!(err.kind, GraphErrorKind::CyclicDependency);
        assert_eq!(err.cycle, vec!["a", "a"]);
    }

    #[test]
    fn test_cycle_behind_entry_job() {
        let err = build(
            r#"
on: push
jobs:
  entry:
    needs: x
    steps: [{ run: "true" }]
  x:
    needs: y
    steps: [{ run: "true" }]
  y:
    needs: x
    steps: [{ run: "true" }]
"#,
        )
        .unwrap_err();

        assert_eq!(err.cycle, vec!["x", "y", "x"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let err = build(
            r#"
on: push
jobs:
  deploy:
    needs: build
    steps: [{ run: echo deploy }]
"#,
        )
        .unwrap_err();

        assert_eq!(err.kind, GraphErrorKind::UnknownDependency);
        assert!(err.message.contains("'deploy'"));
        assert!(err.message.contains("'build'"));
    }

    #[test]
    fn test_matrix_fan_in() {
        let graph = build(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: [linux, macos]
    steps: [{ run: "true" }]
  publish:
    needs: test
    strategy:
      matrix:
        target: [crates, docs]
    steps: [{ run: "true" }]
"#,
        )
        .unwrap();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.instances_of("test"), &[0, 1]);
        for &i in graph.instances_of("publish") {
            assert_eq!(graph.instances()[i].dependencies, vec![0, 1]);
        }
        assert_eq!(graph.instances()[0].dependents, vec![2, 3]);
        assert_eq!(graph.instances()[2].id.to_string(), "publish (crates)");
    }

    #[test]
    fn test_invalid_matrix_names_job() {
        let err = build(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: []
    steps: [{ run: "true" }]
"#,
        )
        .unwrap_err();

        assert_eq!(err.kind, GraphErrorKind::InvalidMatrix);
        assert!(err.message.starts_with("job 'test'"));
    }

    #[test]
    fn test_structural_errors() {
        let no_steps = build("on: push\njobs:\n  empty:\n    runs-on: linux\n").unwrap_err();
        assert_eq!(no_steps.kind, GraphErrorKind::InvalidStructure);

        let both = build(
            "on: push\njobs:\n  a:\n    steps:\n      - run: echo\n        uses: actions/checkout@v4\n",
        )
        .unwrap_err();
        assert_eq!(both.kind, GraphErrorKind::InvalidStructure);
        assert!(both.message.contains("step 1"));

        let secret_in_job_env = build(
            "on: push\njobs:\n  a:\n    env:\n      TOKEN: ${{ secrets.TOKEN }}\n    steps: [{ run: echo }]\n",
        )
        .unwrap_err();
        assert_eq!(secret_in_job_env.kind, GraphErrorKind::InvalidStructure);
    }

    #[test]
    fn test_parallel_levels() {
        let graph = build(
            r#"
on: push
jobs:
  lint:
    steps: [{ run: "true" }]
  build:
    steps: [{ run: "true" }]
  test:
    needs: build
    steps: [{ run: "true" }]
  deploy:
    needs: [lint, test]
    steps: [{ run: "true" }]
"#,
        )
        .unwrap();

        let levels: Vec<Vec<String>> = graph
            .parallel_levels()
            .iter()
            .map(|level| job_ids(level))
            .collect();
        assert_eq!(
            levels,
            vec![
                vec!["lint".to_string(), "build".to_string()],
                vec!["test".to_string()],
                vec!["deploy".to_string()],
            ]
        );
    }

    #[test]
    fn test_find_instance() {
        let graph = build(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        node: [18, 20]
    steps: [{ run: "true" }]
"#,
        )
        .unwrap();

        let id = graph.instances()[1].id.clone();
        assert_eq!(graph.find(&id).map(|i| i.index), Some(1));
        assert!(graph
            .find(&InstanceId::new("missing", MatrixBinding::new()))
            .is_none());
    }
}
