use crate::execution::graph::{ExecutionGraph, GraphError};
use crate::workflow::models::{Workflow, INVALID_MATRIX};
use crate::{ServiceError, ServiceResult};

use std::fs;
use std::path::Path;

/// Parser for workflow YAML files.
pub struct WorkflowParser;

impl WorkflowParser {
    /// Parse a workflow from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServiceResult<Workflow> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a workflow from a YAML string.
    ///
    /// Matrix values that are not scalars are reported as an invalid
    /// matrix rather than a plain YAML error.
    pub fn parse(content: &str) -> ServiceResult<Workflow> {
        serde_yaml::from_str(content).map_err(|e| {
            let message = e.to_string();
            if message.contains(INVALID_MATRIX) {
                ServiceError::Validation(GraphError::invalid_matrix(message))
            } else {
                ServiceError::Yaml(e)
            }
        })
    }

    /// Parse and validate a workflow from a YAML string.
    ///
    /// Validation builds the full execution graph, so everything that would
    /// stop a run before its first step is reported here.
    pub fn parse_and_validate(content: &str) -> ServiceResult<Workflow> {
        let workflow = Self::parse(content)?;
        Self::validate(&workflow)?;
        Ok(workflow)
    }

    /// Validate a parsed workflow and return its execution graph.
    pub fn validate(workflow: &Workflow) -> ServiceResult<ExecutionGraph> {
        Ok(ExecutionGraph::build(workflow)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::graph::GraphErrorKind;

    fn validation_kind(result: ServiceResult<Workflow>) -> GraphErrorKind {
        match result {
            Err(ServiceError::Validation(e)) => e.kind,
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_parse_minimal_workflow() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: echo "Hello"
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        assert!(workflow.name.is_none());
        assert!(workflow.jobs.contains_key("build"));
        assert_eq!(workflow.display_name(), "workflow");
    }

    #[test]
    fn test_validate_missing_dependency() {
        let yaml = r#"
on: push
jobs:
  deploy:
    needs: build
    steps:
      - run: echo "Deploying"
"#;
        let err = WorkflowParser::parse_and_validate(yaml).unwrap_err();
        assert_eq!(
            err.to_string(),
            "graph error: job 'deploy' depends on unknown job 'build'"
        );
    }

    #[test]
    fn test_validate_circular_dependency() {
        let yaml = r#"
on: push
jobs:
  a:
    needs: c
    steps: [{ run: echo a }]
  b:
    needs: a
    steps: [{ run: echo b }]
  c:
    needs: b
    steps: [{ run: echo c }]
"#;
        let result = WorkflowParser::parse_and_validate(yaml);
        assert_eq!(validation_kind(result), GraphErrorKind::CyclicDependency);
    }

    #[test]
    fn test_validate_empty_job() {
        let yaml = "on: push\njobs:\n  empty:\n    steps: []\n";
        let err = WorkflowParser::parse_and_validate(yaml).unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_validate_step_without_run_or_uses() {
        let yaml = r#"
on: push
jobs:
  build:
    steps:
      - name: Invalid step
        env:
          FOO: bar
"#;
        let result = WorkflowParser::parse_and_validate(yaml);
        assert_eq!(validation_kind(result), GraphErrorKind::InvalidStructure);
    }

    #[test]
    fn test_validate_step_with_both_run_and_uses() {
        let yaml = r#"
on: push
jobs:
  build:
    steps:
      - run: echo "Hello"
        uses: actions/checkout@v4
"#;
        let result = WorkflowParser::parse_and_validate(yaml);
        assert_eq!(validation_kind(result), GraphErrorKind::InvalidStructure);
    }

    #[test]
    fn test_non_scalar_matrix_value_is_invalid_matrix() {
        let yaml = r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: [linux, ~]
    steps: [{ run: echo test }]
"#;
        let result = WorkflowParser::parse(yaml);
        assert_eq!(validation_kind(result), GraphErrorKind::InvalidMatrix);
    }

    #[test]
    fn test_matrix_shape_errors_are_invalid_matrix() {
        for matrix in ["os: linux", "include: linux", "include: [linux]"] {
            let yaml = format!(
                "on: push\njobs:\n  test:\n    strategy:\n      matrix:\n        {}\n    steps: [{{ run: echo test }}]\n",
                matrix
            );
            let result = WorkflowParser::parse(&yaml);
            assert_eq!(validation_kind(result), GraphErrorKind::InvalidMatrix, "{}", matrix);
        }

        let bad_yaml = WorkflowParser::parse("on: push\njobs: [unclosed");
        assert!(matches!(bad_yaml, Err(ServiceError::Yaml(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ci.yml");
        fs::write(&path, "name: CI\non: [push]\njobs:\n  a:\n    steps: [{ run: echo a }]\n").unwrap();

        let workflow = WorkflowParser::from_file(&path).unwrap();
        assert_eq!(workflow.display_name(), "CI");

        let missing = WorkflowParser::from_file(dir.path().join("missing.yml"));
        assert!(matches!(missing, Err(ServiceError::Io(_))));
    }

    #[test]
    fn test_parse_complex_workflow() {
        let yaml = r#"
name: Rust CI

on:
  push:
    branches: [main, develop]
  pull_request:
    branches: [main]

env:
  CARGO_TERM_COLOR: always

jobs:
  check:
    name: Check
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: Run check
        run: cargo check --all-features

  test:
    name: Test Suite
    needs: check
    runs-on: ubuntu-latest
    strategy:
      matrix:
        rust: [stable, beta, nightly]
        os: [ubuntu-latest, macos-latest]
        exclude:
          - rust: nightly
            os: macos-latest
    steps:
      - uses: actions/checkout@v4
      - name: Run tests
        run: cargo +${{ matrix.rust }} test --all-features
        env:
          RUST_BACKTRACE: 1

  fmt:
    runs-on: ubuntu-latest
    steps:
      - run: cargo fmt --all -- --check

  deploy:
    name: Deploy
    needs: [test, fmt]
    runs-on: ubuntu-latest
    steps:
      - name: Deploy
        run: echo "Deploying..."
        env:
          DEPLOY_TOKEN: ${{ secrets.DEPLOY_TOKEN }}
"#;
        let workflow = WorkflowParser::parse_and_validate(yaml).unwrap();
        assert_eq!(workflow.name, Some("Rust CI".to_string()));
        assert_eq!(workflow.jobs.len(), 4);
        assert_eq!(
            workflow.jobs.keys().collect::<Vec<_>>(),
            vec!["check", "test", "fmt", "deploy"]
        );

        let deploy = workflow.jobs.get("deploy").unwrap();
        assert_eq!(deploy.needs.to_vec(), vec!["test", "fmt"]);
        assert!(deploy.steps[0].secret_refs().contains("DEPLOY_TOKEN"));

        let graph = WorkflowParser::validate(&workflow).unwrap();
        assert_eq!(graph.instances_of("test").len(), 5);
        assert_eq!(graph.instances_of("deploy").len(), 1);
    }
}
