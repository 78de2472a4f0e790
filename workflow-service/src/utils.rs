// Utility Functions
// Path resolution, repository root detection and key/value input parsing

use crate::{ServiceError, ServiceResult};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Find the root of a git repository by walking up from the given starting path.
///
/// Returns `None` if no ancestor contains a `.git` directory or the path
/// does not exist.
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    // Canonicalize to resolve symlinks and get an absolute path
    let start = start.canonicalize().ok()?;
    for ancestor in start.ancestors() {
        if ancestor.join(".git").exists() {
            return Some(ancestor.to_path_buf());
        }
    }
    None
}

/// Resolve the workspace a run executes in.
///
/// An explicit directory wins; otherwise the repository root containing the
/// current directory, falling back to the current directory itself.
pub fn resolve_working_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_repo_root(&cwd).unwrap_or(cwd)
}

/// Split `NAME=VALUE`. The value may itself contain `=`.
///
/// Errors never echo the input, which is usually a secret.
pub fn parse_key_value(input: &str) -> ServiceResult<(String, String)> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        Some(_) => Err(ServiceError::InvalidInput(
            "expected NAME=VALUE, the name is empty".to_string(),
        )),
        None => Err(ServiceError::InvalidInput(
            "expected NAME=VALUE, no '=' found".to_string(),
        )),
    }
}

/// Read a flat YAML mapping of names to scalar values
pub fn read_key_value_file(path: &Path) -> ServiceResult<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path)?;
    let raw: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&content)?;

    raw.into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(ServiceError::InvalidInput(format!(
                        "{}: value of '{}' must be a scalar",
                        path.display(),
                        key
                    )))
                }
            };
            Ok((key, text))
        })
        .collect()
}
