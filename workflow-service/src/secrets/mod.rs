// Secrets Module
// Scoped secret storage and output redaction

pub mod redact;
pub mod store;

// Re-export key types
pub use redact::{Redactor, REDACTION_MASK};
pub use store::{
    MemoryBackend, RepositoryScope, Secret, SecretBackend, SecretError, SecretStore, SecretValue,
};
