// Matrix Strategy Expansion
// Expands matrix strategies into concrete job variants

use crate::execution::graph::GraphError;
use crate::workflow::models::{Matrix, MatrixCombination, MatrixValue};

use serde::ser::{Serialize, SerializeMap, Serializer};

use std::fmt;

/// One concrete assignment of values to matrix axes.
///
/// Keys keep axis declaration order, followed by keys added through
/// `include`. Equality ignores key order.
#[derive(Debug, Clone, Default)]
pub struct MatrixBinding {
    values: Vec<(String, MatrixValue)>,
}

impl MatrixBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&MatrixValue> {
        self.values
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Set `key`, replacing an existing value in place
    pub fn insert(&mut self, key: impl Into<String>, value: MatrixValue) {
        let key = key.into();
        match self.values.iter_mut().find(|(name, _)| *name == key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MatrixValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether every key/value pair of `partial` is present in this binding
    pub fn matches(&self, partial: &[(String, MatrixValue)]) -> bool {
        partial
            .iter()
            .all(|(key, value)| self.get(key) == Some(value))
    }

    /// Human-readable label, e.g. `ubuntu-latest, 18`
    pub fn label(&self) -> String {
        self.values
            .iter()
            .map(|(_, value)| value.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl PartialEq for MatrixBinding {
    fn eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len() && self.matches(&other.values)
    }
}

impl fmt::Display for MatrixBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for MatrixBinding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (key, value) in &self.values {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl FromIterator<(String, MatrixValue)> for MatrixBinding {
    fn from_iter<I: IntoIterator<Item = (String, MatrixValue)>>(iter: I) -> Self {
        let mut binding = MatrixBinding::new();
        for (key, value) in iter {
            binding.insert(key, value);
        }
        binding
    }
}

/// Matrix expander for job strategies
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a matrix into its concrete bindings.
    ///
    /// An absent or empty matrix yields a single empty binding. Axes are
    /// enumerated like nested loops with the first declared axis varying
    /// slowest; `exclude` is applied to the product, then `include`.
    pub fn expand(matrix: Option<&Matrix>) -> Result<Vec<MatrixBinding>, GraphError> {
        let matrix = match matrix {
            Some(matrix) if !matrix.is_empty() => matrix,
            _ => return Ok(vec![MatrixBinding::new()]),
        };

        for (axis, values) in &matrix.axes {
            if values.is_empty() {
                return Err(GraphError::invalid_matrix(format!(
                    "matrix axis '{}' has no values",
                    axis
                )));
            }
        }

        for entry in &matrix.exclude {
            if let Some((key, _)) = entry.iter().find(|(key, _)| !matrix.is_axis(key)) {
                return Err(GraphError::invalid_matrix(format!(
                    "exclude entry references unknown matrix axis '{}'",
                    key
                )));
            }
        }

        let mut bindings = Self::cartesian_product(matrix);

        bindings.retain(|binding| {
            !matrix
                .exclude
                .iter()
                .filter(|entry| !entry.is_empty())
                .any(|entry| binding.matches(entry))
        });

        Self::apply_includes(matrix, &mut bindings);

        if bindings.is_empty() {
            return Err(GraphError::invalid_matrix(
                "matrix produces no combinations after exclusions",
            ));
        }

        let mut unique: Vec<MatrixBinding> = Vec::with_capacity(bindings.len());
        for binding in bindings {
            if !unique.contains(&binding) {
                unique.push(binding);
            }
        }

        Ok(unique)
    }

    fn cartesian_product(matrix: &Matrix) -> Vec<MatrixBinding> {
        if matrix.axes.is_empty() {
            return Vec::new();
        }

        let mut bindings = vec![MatrixBinding::new()];
        for (axis, values) in &matrix.axes {
            let mut next = Vec::with_capacity(bindings.len() * values.len());
            for binding in &bindings {
                for value in values {
                    let mut extended = binding.clone();
                    extended.insert(axis.clone(), value.clone());
                    next.push(extended);
                }
            }
            bindings = next;
        }
        bindings
    }

    /// GitHub `include` semantics: an entry extends every original binding
    /// whose axis values it matches, otherwise it becomes a new binding.
    fn apply_includes(matrix: &Matrix, bindings: &mut Vec<MatrixBinding>) {
        let original = bindings.len();

        for entry in &matrix.include {
            let (axis_pairs, extra_pairs): (MatrixCombination, MatrixCombination) = entry
                .iter()
                .cloned()
                .partition(|(key, _)| matrix.is_axis(key));

            let mut matched = false;
            for binding in bindings.iter_mut().take(original) {
                if binding.matches(&axis_pairs) {
                    for (key, value) in &extra_pairs {
                        binding.insert(key.clone(), value.clone());
                    }
                    matched = true;
                }
            }

            if !matched {
                bindings.push(entry.iter().cloned().collect());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::graph::GraphErrorKind;

    fn matrix(yaml: &str) -> Matrix {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn pair(key: &str, value: impl Into<MatrixValue>) -> (String, MatrixValue) {
        (key.to_string(), value.into())
    }

    #[test]
    fn test_absent_matrix_yields_single_empty_binding() {
        let bindings = MatrixExpander::expand(None).unwrap();
        assert_eq!(bindings.len(), 1);
        assert!(bindings[0].is_empty());

        let bindings = MatrixExpander::expand(Some(&Matrix::default())).unwrap();
        assert_eq!(bindings.len(), 1);
        assert!(bindings[0].is_empty());
    }

    #[test]
    fn test_product_size_and_uniqueness() {
        let m = matrix("os: [linux, macos, windows]\nnode: [16, 18]\nexperimental: [true, false]");
        let bindings = MatrixExpander::expand(Some(&m)).unwrap();

        assert_eq!(bindings.len(), 3 * 2 * 2);
        for (i, a) in bindings.iter().enumerate() {
            assert_eq!(a.len(), 3);
            for b in bindings.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_first_axis_varies_slowest() {
        let m = matrix("os: [linux, macos]\nnode: [16, 18]");
        let labels: Vec<_> = MatrixExpander::expand(Some(&m))
            .unwrap()
            .iter()
            .map(MatrixBinding::label)
            .collect();

        assert_eq!(
            labels,
            vec!["linux, 16", "linux, 18", "macos, 16", "macos, 18"]
        );
    }

    #[test]
    fn test_empty_axis_is_invalid() {
        let m = matrix("os: [linux]\nnode: []");
        let err = MatrixExpander::expand(Some(&m)).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::InvalidMatrix);
        assert!(err.message.contains("'node'"));
    }

    #[test]
    fn test_exclude_drops_matching_bindings() {
        let m = matrix(
            r#"
os: [linux, macos]
node: [16, 18]
exclude:
  - os: macos
    node: 16
"#,
        );
        let bindings = MatrixExpander::expand(Some(&m)).unwrap();

        assert_eq!(bindings.len(), 3);
        assert!(!bindings
            .iter()
            .any(|b| b.matches(&[pair("os", "macos"), pair("node", MatrixValue::Integer(16))])));
    }

    #[test]
    fn test_partial_exclude_drops_every_match() {
        let m = matrix("os: [linux, macos]\nnode: [16, 18]\nexclude:\n  - os: macos");
        let bindings = MatrixExpander::expand(Some(&m)).unwrap();

        assert_eq!(bindings.len(), 2);
        assert!(bindings.iter().all(|b| b.get("os") == Some(&MatrixValue::from("linux"))));
    }

    #[test]
    fn test_excluding_everything_is_invalid() {
        let m = matrix("os: [linux]\nexclude:\n  - os: linux");
        let err = MatrixExpander::expand(Some(&m)).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::InvalidMatrix);
    }

    #[test]
    fn test_exclude_unknown_axis_is_invalid() {
        let m = matrix("os: [linux]\nexclude:\n  - arch: arm64");
        let err = MatrixExpander::expand(Some(&m)).unwrap_err();
        assert!(err.message.contains("'arch'"));
    }

    #[test]
    fn test_include_extends_matching_bindings() {
        let m = matrix(
            r#"
os: [linux, macos]
node: [16, 18]
include:
  - os: linux
    coverage: true
"#,
        );
        let bindings = MatrixExpander::expand(Some(&m)).unwrap();

        assert_eq!(bindings.len(), 4);
        let with_coverage: Vec<_> = bindings
            .iter()
            .filter(|b| b.get("coverage") == Some(&MatrixValue::Bool(true)))
            .collect();
        assert_eq!(with_coverage.len(), 2);
        assert!(with_coverage
            .iter()
            .all(|b| b.get("os") == Some(&MatrixValue::from("linux"))));
    }

    #[test]
    fn test_unmatched_include_is_appended() {
        let m = matrix(
            r#"
os: [linux]
node: [16]
include:
  - os: windows
    node: 20
"#,
        );
        let bindings = MatrixExpander::expand(Some(&m)).unwrap();

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].label(), "windows, 20");
    }

    #[test]
    fn test_include_only_matrix() {
        let m = matrix("include:\n  - target: wasm\n  - target: native");
        let bindings = MatrixExpander::expand(Some(&m)).unwrap();

        let labels: Vec<_> = bindings.iter().map(MatrixBinding::label).collect();
        assert_eq!(labels, vec!["wasm", "native"]);
    }

    #[test]
    fn test_binding_equality_ignores_order() {
        let a: MatrixBinding = vec![pair("os", "linux"), pair("node", MatrixValue::Integer(18))]
            .into_iter()
            .collect();
        let b: MatrixBinding = vec![pair("node", MatrixValue::Integer(18)), pair("os", "linux")]
            .into_iter()
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_binding_serializes_as_map() {
        let binding: MatrixBinding = vec![pair("os", "linux"), pair("node", MatrixValue::Integer(18))]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&binding).unwrap();
        assert_eq!(json, r#"{"os":"linux","node":18}"#);
    }
}
