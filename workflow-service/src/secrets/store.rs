// Secret Store
// Holds named secret values scoped to a repository and resolves them at execution time

use super::redact::Redactor;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

/// Repository identifier a secret belongs to (e.g. `owner/name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryScope(String);

impl RepositoryScope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RepositoryScope {
    fn default() -> Self {
        Self("local".to_string())
    }
}

impl fmt::Display for RepositoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RepositoryScope {
    fn from(scope: &str) -> Self {
        Self::new(scope)
    }
}

/// Opaque secret bytes. Formatting never reveals the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Vec<u8>);

impl SecretValue {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes of the secret
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// The secret as text, replacing invalid UTF-8 sequences
    pub fn expose_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(super::REDACTION_MASK)
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

/// A named secret within a repository scope
#[derive(Debug, Clone)]
pub struct Secret {
    pub name: String,
    pub value: SecretValue,
    pub scope: RepositoryScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    #[error("secret '{name}' already exists in scope '{scope}'")]
    DuplicateSecret { name: String, scope: String },

    #[error("secret '{name}' not found in scope '{scope}'")]
    SecretNotFound { name: String, scope: String },

    #[error("invalid secret name '{name}': {reason}")]
    InvalidSecretName { name: String, reason: String },

    #[error("secret backend failure: {0}")]
    Backend(String),
}

/// Backing storage for secrets.
///
/// The store only relies on this contract; persistence at rest is the
/// implementor's concern.
pub trait SecretBackend: Send + Sync {
    /// Insert a secret, failing with `DuplicateSecret` if the name is taken
    fn insert(&self, secret: Secret) -> Result<(), SecretError>;

    /// Fetch a secret value
    fn get(&self, scope: &RepositoryScope, name: &str) -> Result<Option<SecretValue>, SecretError>;

    /// Remove a secret, returning whether it existed
    fn remove(&self, scope: &RepositoryScope, name: &str) -> Result<bool, SecretError>;

    /// Names of all secrets in a scope, sorted
    fn names(&self, scope: &RepositoryScope) -> Result<Vec<String>, SecretError>;
}

/// In-memory secret backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    secrets: RwLock<HashMap<(RepositoryScope, String), SecretValue>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> SecretError {
    SecretError::Backend("secret map lock poisoned".to_string())
}

impl SecretBackend for MemoryBackend {
    fn insert(&self, secret: Secret) -> Result<(), SecretError> {
        let mut secrets = self.secrets.write().map_err(|_| poisoned())?;
        let key = (secret.scope.clone(), secret.name.clone());
        if secrets.contains_key(&key) {
            return Err(SecretError::DuplicateSecret {
                name: secret.name,
                scope: secret.scope.to_string(),
            });
        }
        secrets.insert(key, secret.value);
        Ok(())
    }

    fn get(&self, scope: &RepositoryScope, name: &str) -> Result<Option<SecretValue>, SecretError> {
        let secrets = self.secrets.read().map_err(|_| poisoned())?;
        Ok(secrets.get(&(scope.clone(), name.to_string())).cloned())
    }

    fn remove(&self, scope: &RepositoryScope, name: &str) -> Result<bool, SecretError> {
        let mut secrets = self.secrets.write().map_err(|_| poisoned())?;
        Ok(secrets.remove(&(scope.clone(), name.to_string())).is_some())
    }

    fn names(&self, scope: &RepositoryScope) -> Result<Vec<String>, SecretError> {
        let secrets = self.secrets.read().map_err(|_| poisoned())?;
        let mut names: Vec<String> = secrets
            .keys()
            .filter(|(s, _)| s == scope)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Scoped secret store.
///
/// Cloning is cheap; clones share the backend and the redactor.
#[derive(Clone)]
pub struct SecretStore {
    backend: Arc<dyn SecretBackend>,
    redactor: Redactor,
}

impl fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretStore")
            .field("redactor", &self.redactor)
            .finish_non_exhaustive()
    }
}

impl SecretStore {
    /// Create a store over an in-memory backend
    pub fn new() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// Create a store over an injected backend
    pub fn with_backend(backend: Arc<dyn SecretBackend>) -> Self {
        Self {
            backend,
            redactor: Redactor::new(),
        }
    }

    /// Register a secret
    pub fn put(
        &self,
        name: &str,
        value: impl Into<SecretValue>,
        scope: &RepositoryScope,
    ) -> Result<(), SecretError> {
        let name = normalize_name(name)?;
        self.backend.insert(Secret {
            name: name.clone(),
            value: value.into(),
            scope: scope.clone(),
        })?;
        debug!(secret = %name, scope = %scope, "secret registered");
        Ok(())
    }

    /// Resolve a secret for use in a step.
    ///
    /// The resolved value is registered with the redactor before it is
    /// returned, so output captured afterwards is masked.
    pub fn resolve(&self, name: &str, scope: &RepositoryScope) -> Result<SecretValue, SecretError> {
        let name = normalize_name(name)?;
        match self.backend.get(scope, &name)? {
            Some(value) => {
                self.redactor.register(&value.expose_lossy());
                debug!(secret = %name, scope = %scope, "secret resolved");
                Ok(value)
            }
            None => Err(SecretError::SecretNotFound {
                name,
                scope: scope.to_string(),
            }),
        }
    }

    /// Revoke a secret. Later resolves fail immediately.
    pub fn revoke(&self, name: &str, scope: &RepositoryScope) -> Result<bool, SecretError> {
        let name = normalize_name(name)?;
        let removed = self.backend.remove(scope, &name)?;
        if removed {
            debug!(secret = %name, scope = %scope, "secret revoked");
        }
        Ok(removed)
    }

    pub fn contains(&self, name: &str, scope: &RepositoryScope) -> bool {
        normalize_name(name)
            .ok()
            .and_then(|name| self.backend.get(scope, &name).ok().flatten())
            .is_some()
    }

    /// Names of the secrets registered in a scope
    pub fn names(&self, scope: &RepositoryScope) -> Result<Vec<String>, SecretError> {
        self.backend.names(scope)
    }

    /// Redactor fed by every successful resolve
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Secret names are case-insensitive; they are stored upper-cased
fn normalize_name(name: &str) -> Result<String, SecretError> {
    let trimmed = name.trim();
    let invalid = |reason: &str| SecretError::InvalidSecretName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("name is empty"));
    }
    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("only alphanumeric characters and underscores are allowed"));
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid("name must not start with a number"));
    }

    let upper = trimmed.to_ascii_uppercase();
    if upper.starts_with("GITHUB_") {
        return Err(invalid("the GITHUB_ prefix is reserved"));
    }
    Ok(upper)
}
