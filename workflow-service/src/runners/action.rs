// Action References
// Parsing of `uses:` references and the built-in action handlers

use super::{Runner, RunnerOutput, StepAction, StepRequest};

use std::fmt;

/// A parsed `uses:` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRef {
    /// `owner/name[/path]@version`
    Repository { name: String, version: String },
    /// `./path/to/action` relative to the workspace
    Local(String),
    /// `docker://image:tag`
    Docker(String),
}

impl ActionRef {
    pub fn parse(reference: &str) -> Result<Self, String> {
        let reference = reference.trim();

        if reference.starts_with("./") {
            return Ok(ActionRef::Local(reference.to_string()));
        }

        if let Some(image) = reference.strip_prefix("docker://") {
            if image.is_empty() {
                return Err("docker action reference is missing an image".to_string());
            }
            return Ok(ActionRef::Docker(reference.to_string()));
        }

        let (name, version) = reference.split_once('@').ok_or_else(|| {
            format!(
                "action reference '{}' must pin a version (e.g. '{}@v1')",
                reference, reference
            )
        })?;

        let mut parts = name.split('/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();
        if owner.is_empty() || repo.is_empty() || version.is_empty() {
            return Err(format!(
                "invalid action reference '{}', expected 'owner/name@version'",
                reference
            ));
        }

        Ok(ActionRef::Repository {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// Registry key: the repository name without version, or the full
    /// reference for local and docker actions
    pub fn key(&self) -> &str {
        match self {
            ActionRef::Repository { name, .. } => name,
            ActionRef::Local(path) => path,
            ActionRef::Docker(image) => image,
        }
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRef::Repository { name, version } => write!(f, "{}@{}", name, version),
            ActionRef::Local(path) => f.write_str(path),
            ActionRef::Docker(image) => f.write_str(image),
        }
    }
}

/// `actions/checkout`: the workspace is the local checkout, so this only
/// confirms it exists
pub struct CheckoutAction;

#[async_trait::async_trait]
impl Runner for CheckoutAction {
    async fn execute(&self, request: StepRequest<'_>) -> RunnerOutput {
        if !matches!(request.action, StepAction::InvokeAction { .. }) {
            return RunnerOutput::failure("checkout can only run 'uses' steps");
        }

        if !request.working_dir.is_dir() {
            return RunnerOutput::failure(format!(
                "workspace '{}' does not exist",
                request.working_dir.display()
            ));
        }

        let line = format!("Using local workspace {}", request.working_dir.display());
        request.emit(&line, false);

        RunnerOutput {
            stdout: line,
            exit_code: Some(0),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{BTreeMap, HashMap};

    #[test]
    fn test_parse_repository_reference() {
        let reference = ActionRef::parse("actions/checkout@v4").unwrap();
        assert_eq!(
            reference,
            ActionRef::Repository {
                name: "actions/checkout".to_string(),
                version: "v4".to_string(),
            }
        );
        assert_eq!(reference.key(), "actions/checkout");
        assert_eq!(reference.to_string(), "actions/checkout@v4");

        let nested = ActionRef::parse("github/codeql-action/init@v3").unwrap();
        assert_eq!(nested.key(), "github/codeql-action/init");
    }

    #[test]
    fn test_parse_local_and_docker() {
        assert_eq!(
            ActionRef::parse("./.github/actions/setup").unwrap(),
            ActionRef::Local("./.github/actions/setup".to_string())
        );
        assert_eq!(
            ActionRef::parse("docker://alpine:3.19").unwrap().key(),
            "docker://alpine:3.19"
        );
    }

    #[test]
    fn test_parse_rejects_unpinned_or_malformed() {
        assert!(ActionRef::parse("actions/checkout").is_err());
        assert!(ActionRef::parse("checkout@v4").is_err());
        assert!(ActionRef::parse("actions/checkout@").is_err());
        assert!(ActionRef::parse("docker://").is_err());
    }

    #[tokio::test]
    async fn test_checkout_uses_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let action = StepAction::InvokeAction {
            reference: ActionRef::parse("actions/checkout@v4").unwrap(),
            with: BTreeMap::new(),
        };
        let env = HashMap::new();

        let output = CheckoutAction
            .execute(StepRequest {
                action: &action,
                env: &env,
                working_dir: dir.path(),
                timeout: None,
                on_output: None,
            })
            .await;

        assert!(output.success());
        assert!(output.stdout.contains("Using local workspace"));
    }
}
