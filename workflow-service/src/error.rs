// Service Errors
// Crate-level error type shared by the parser, graph builder and executor

use crate::execution::graph::GraphError;
use crate::secrets::SecretError;

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Static validation failure; raised before anything executes
    #[error(transparent)]
    Validation(#[from] GraphError),

    #[error("Secret resolution failed: {0}")]
    Secret(#[from] SecretError),

    #[error("Step execution failed: {0}")]
    StepExecution(String),

    /// Coordination failure inside the scheduler; always fatal for the run
    #[error("Scheduler internal error: {0}")]
    SchedulerInternal(String),
}

impl ServiceError {
    /// Whether this error was raised by static validation
    pub fn is_validation(&self) -> bool {
        matches!(self, ServiceError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::graph::GraphErrorKind;

    #[test]
    fn test_validation_error_is_transparent() {
        let err: ServiceError = GraphError::cyclic(vec!["a".into(), "b".into(), "a".into()]).into();
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "graph error: circular dependency detected in jobs: a -> b -> a"
        );
        if let ServiceError::Validation(inner) = err {
            assert_eq!(inner.kind, GraphErrorKind::CyclicDependency);
        }
    }

    #[test]
    fn test_secret_error_wraps() {
        let err: ServiceError = SecretError::SecretNotFound {
            name: "API_TOKEN".into(),
            scope: "acme/app".into(),
        }
        .into();
        assert!(!err.is_validation());
        assert!(err.to_string().contains("API_TOKEN"));
    }
}
