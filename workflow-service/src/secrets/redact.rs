// Output Redaction
// Masks resolved secret values in captured output and log text

use std::sync::{Arc, RwLock};

/// Fixed mask substituted for every secret occurrence
pub const REDACTION_MASK: &str = "***";

/// Shared set of sensitive strings that must never appear in captured output.
///
/// Values are registered by [`SecretStore::resolve`](super::SecretStore::resolve);
/// clones share the same set, so a redactor handed to a runner keeps masking
/// secrets resolved later in the run.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    patterns: Arc<RwLock<Vec<String>>>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensitive value.
    ///
    /// Multi-line values are also registered line by line so that a
    /// partial echo is still masked.
    pub fn register(&self, value: &str) {
        let mut candidates = vec![value.to_string()];
        if value.contains('\n') {
            candidates.extend(
                value
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(String::from),
            );
        }

        let mut patterns = self
            .patterns
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for candidate in candidates {
            if candidate.is_empty() || patterns.contains(&candidate) {
                continue;
            }
            patterns.push(candidate);
        }

        // Longest first so a secret containing another secret is masked whole
        patterns.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    /// Replace every registered value in `text` with [`REDACTION_MASK`]
    pub fn redact(&self, text: &str) -> String {
        let patterns = self
            .patterns
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut redacted = text.to_string();
        for pattern in patterns.iter() {
            if redacted.contains(pattern.as_str()) {
                redacted = redacted.replace(pattern.as_str(), REDACTION_MASK);
            }
        }
        redacted
    }

    /// Number of registered patterns
    pub fn len(&self) -> usize {
        self.patterns
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_registered_value() {
        let redactor = Redactor::new();
        redactor.register("hunter2");

        assert_eq!(redactor.redact("password is hunter2!"), "password is ***!");
        assert_eq!(redactor.redact("nothing here"), "nothing here");
    }

    #[test]
    fn test_clones_share_patterns() {
        let redactor = Redactor::new();
        let handle = redactor.clone();
        redactor.register("s3cr3t");

        assert_eq!(handle.redact("token=s3cr3t"), "token=***");
    }

    #[test]
    fn test_longest_pattern_wins() {
        let redactor = Redactor::new();
        redactor.register("abc");
        redactor.register("abcdef");

        assert_eq!(redactor.redact("xabcdefx"), "x***x");
    }

    #[test]
    fn test_multiline_secret_masks_each_line() {
        let redactor = Redactor::new();
        redactor.register("-----BEGIN KEY-----\nMIIBOgIBAAJBAK\n-----END KEY-----");

        assert_eq!(redactor.redact("line: MIIBOgIBAAJBAK"), "line: ***");
    }

    #[test]
    fn test_empty_value_ignored() {
        let redactor = Redactor::new();
        redactor.register("");

        assert!(redactor.is_empty());
        assert_eq!(redactor.redact("unchanged"), "unchanged");
    }
}
