use crate::expression;

use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A GitHub Actions-compatible workflow definition.
///
/// This represents the top-level structure of a workflow YAML file. Job
/// declaration order is preserved; the scheduler uses it to break ties.
#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    /// The name of the workflow
    #[serde(default)]
    pub name: Option<String>,

    /// The trigger configuration for the workflow
    #[serde(rename = "on")]
    pub on: Trigger,

    /// Workflow-level environment variables
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    /// The jobs that make up this workflow
    pub jobs: JobMap,
}

impl Workflow {
    /// Display name, falling back to `"workflow"`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }
}

/// Trigger configuration for when the workflow should run.
///
/// Supports multiple trigger formats:
/// - Simple: `on: push`
/// - List: `on: [push, pull_request]`
/// - Detailed: `on: { push: { branches: [main] } }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    Single(String),
    Multiple(Vec<String>),
    Detailed(BTreeMap<String, Option<serde_yaml::Value>>),
}

impl Trigger {
    /// The set of events this workflow reacts to
    pub fn events(&self) -> BTreeSet<EventKind> {
        match self {
            Trigger::Single(event) => BTreeSet::from([EventKind::from(event.as_str())]),
            Trigger::Multiple(events) => events.iter().map(|e| EventKind::from(e.as_str())).collect(),
            Trigger::Detailed(events) => events.keys().map(|e| EventKind::from(e.as_str())).collect(),
        }
    }
}

/// Kind of event that can trigger a workflow
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Push,
    PullRequest,
    WorkflowDispatch,
    WorkflowCall,
    Schedule,
    Release,
    Other(String),
}

impl From<&str> for EventKind {
    fn from(event: &str) -> Self {
        match event {
            "push" => EventKind::Push,
            "pull_request" => EventKind::PullRequest,
            "workflow_dispatch" => EventKind::WorkflowDispatch,
            "workflow_call" => EventKind::WorkflowCall,
            "schedule" => EventKind::Schedule,
            "release" => EventKind::Release,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::WorkflowDispatch => "workflow_dispatch",
            EventKind::WorkflowCall => "workflow_call",
            EventKind::Schedule => "schedule",
            EventKind::Release => "release",
            EventKind::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// Jobs keyed by id, in declaration order
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "serde_yaml::Mapping")]
pub struct JobMap {
    entries: Vec<(String, Job)>,
}

impl JobMap {
    pub fn get(&self, id: &str) -> Option<&Job> {
        self.entries
            .iter()
            .find(|(name, _)| name == id)
            .map(|(_, job)| job)
    }

    pub fn contains_key(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Job)> {
        self.entries.iter().map(|(name, job)| (name.as_str(), job))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Job)> for JobMap {
    fn from_iter<I: IntoIterator<Item = (String, Job)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl TryFrom<serde_yaml::Mapping> for JobMap {
    type Error = String;

    fn try_from(mapping: serde_yaml::Mapping) -> Result<Self, Self::Error> {
        let mut entries = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let id = key
                .as_str()
                .map(String::from)
                .ok_or_else(|| format!("job ids must be strings, found {:?}", key))?;
            let job: Job =
                serde_yaml::from_value(value).map_err(|e| format!("job '{}': {}", id, e))?;
            entries.push((id, job));
        }
        Ok(Self { entries })
    }
}

/// A job within a workflow.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Job {
    /// Display name for the job
    #[serde(default)]
    pub name: Option<String>,

    /// Jobs that must complete before this job runs
    #[serde(default)]
    pub needs: JobNeeds,

    /// Runner label (recorded, all jobs run on the local host)
    #[serde(default, rename = "runs-on")]
    pub runs_on: Option<RunsOn>,

    /// Job-level environment variables
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    /// Matrix strategy for running multiple job instances
    #[serde(default)]
    pub strategy: Option<Strategy>,

    /// Job timeout in minutes
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u32>,

    /// The steps that make up this job
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Job {
    pub fn fail_fast(&self) -> bool {
        self.strategy.as_ref().map(|s| s.fail_fast).unwrap_or(true)
    }

    pub fn max_parallel(&self) -> Option<usize> {
        self.strategy
            .as_ref()
            .and_then(|s| s.max_parallel)
            .map(|n| n.max(1) as usize)
    }
}

/// Job dependencies - can be a single string or a list.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(untagged)]
pub enum JobNeeds {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl JobNeeds {
    /// Convert to a vector of job IDs, dropping repeats.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            JobNeeds::None => vec![],
            JobNeeds::Single(s) => vec![s.clone()],
            JobNeeds::Multiple(v) => {
                let mut seen = BTreeSet::new();
                v.iter().filter(|id| seen.insert(id.as_str())).cloned().collect()
            }
        }
    }

    /// Check if there are any dependencies.
    pub fn is_empty(&self) -> bool {
        match self {
            JobNeeds::None => true,
            JobNeeds::Single(_) => false,
            JobNeeds::Multiple(v) => v.is_empty(),
        }
    }
}

/// Runner specification - can be a string or a list of labels.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RunsOn {
    Label(String),
    Labels(Vec<String>),
}

impl RunsOn {
    pub fn labels(&self) -> Vec<String> {
        match self {
            RunsOn::Label(label) => vec![label.clone()],
            RunsOn::Labels(labels) => labels.clone(),
        }
    }
}

/// Strategy configuration for matrix builds.
#[derive(Debug, Clone, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub matrix: Option<Matrix>,

    /// Whether to cancel not-yet-started sibling instances if one fails
    #[serde(default = "default_fail_fast", rename = "fail-fast")]
    pub fail_fast: bool,

    /// Maximum number of instances of this job to run in parallel
    #[serde(default, rename = "max-parallel")]
    pub max_parallel: Option<u32>,
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            matrix: None,
            fail_fast: true,
            max_parallel: None,
        }
    }
}

fn default_fail_fast() -> bool {
    true
}

/// A concrete, explicitly typed matrix value.
///
/// YAML scalars are tagged when the workflow is parsed; nulls, lists and
/// mappings are rejected instead of being coerced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MatrixValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for MatrixValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixValue::String(s) => f.write_str(s),
            MatrixValue::Integer(n) => write!(f, "{}", n),
            MatrixValue::Float(n) => write!(f, "{}", n),
            MatrixValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for MatrixValue {
    fn from(value: &str) -> Self {
        MatrixValue::String(value.to_string())
    }
}

impl From<i64> for MatrixValue {
    fn from(value: i64) -> Self {
        MatrixValue::Integer(value)
    }
}

impl From<bool> for MatrixValue {
    fn from(value: bool) -> Self {
        MatrixValue::Bool(value)
    }
}

impl TryFrom<&serde_yaml::Value> for MatrixValue {
    type Error = String;

    fn try_from(value: &serde_yaml::Value) -> Result<Self, Self::Error> {
        match value {
            serde_yaml::Value::String(s) => Ok(MatrixValue::String(s.clone())),
            serde_yaml::Value::Bool(b) => Ok(MatrixValue::Bool(*b)),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(MatrixValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(MatrixValue::Float(f))
                } else {
                    Err(format!("unsupported matrix number {}", n))
                }
            }
            serde_yaml::Value::Null => Err("null is not a valid matrix value".to_string()),
            serde_yaml::Value::Sequence(_) => Err("lists are not valid matrix values".to_string()),
            serde_yaml::Value::Mapping(_) => {
                Err("mappings are not valid matrix values".to_string())
            }
            serde_yaml::Value::Tagged(_) => Err("tagged YAML values are not supported".to_string()),
        }
    }
}

/// A partial or complete assignment of values to matrix axes
pub type MatrixCombination = Vec<(String, MatrixValue)>;

/// Matrix configuration: ordered axes plus `include` / `exclude` adjustments
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "serde_yaml::Mapping")]
pub struct Matrix {
    /// Axes in declaration order
    pub axes: Vec<(String, Vec<MatrixValue>)>,

    /// Additional matrix combinations to include
    pub include: Vec<MatrixCombination>,

    /// Matrix combinations to exclude
    pub exclude: Vec<MatrixCombination>,
}

impl Matrix {
    pub fn axis(&self, name: &str) -> Option<&[MatrixValue]> {
        self.axes
            .iter()
            .find(|(axis, _)| axis == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn is_axis(&self, name: &str) -> bool {
        self.axis(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty() && self.include.is_empty()
    }
}

/// Prefix of every matrix shape error raised while deserializing
pub(crate) const INVALID_MATRIX: &str = "invalid matrix";

fn invalid_matrix(detail: String) -> String {
    format!("{}: {}", INVALID_MATRIX, detail)
}

impl TryFrom<serde_yaml::Mapping> for Matrix {
    type Error = String;

    fn try_from(mapping: serde_yaml::Mapping) -> Result<Self, Self::Error> {
        let mut matrix = Matrix::default();

        for (key, value) in &mapping {
            let key = key.as_str().ok_or_else(|| {
                invalid_matrix(format!("axis names must be strings, found {:?}", key))
            })?;

            match key {
                "include" => matrix.include = combinations(key, value)?,
                "exclude" => matrix.exclude = combinations(key, value)?,
                axis => {
                    let values = value.as_sequence().ok_or_else(|| {
                        invalid_matrix(format!("axis '{}' must be a list of values", axis))
                    })?;
                    let values = values
                        .iter()
                        .map(|v| {
                            MatrixValue::try_from(v).map_err(|e| {
                                invalid_matrix(format!("value in axis '{}': {}", axis, e))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    matrix.axes.push((axis.to_string(), values));
                }
            }
        }

        Ok(matrix)
    }
}

fn combinations(key: &str, value: &serde_yaml::Value) -> Result<Vec<MatrixCombination>, String> {
    let entries = value
        .as_sequence()
        .ok_or_else(|| invalid_matrix(format!("'{}' must be a list of mappings", key)))?;

    entries
        .iter()
        .map(|entry| {
            let entry = entry
                .as_mapping()
                .ok_or_else(|| invalid_matrix(format!("'{}' entries must be mappings", key)))?;
            entry
                .iter()
                .map(|(k, v)| {
                    let name = k
                        .as_str()
                        .ok_or_else(|| invalid_matrix(format!("'{}' keys must be strings", key)))?;
                    let value = MatrixValue::try_from(v)
                        .map_err(|e| invalid_matrix(format!("value in '{}': {}", key, e)))?;
                    Ok((name.to_string(), value))
                })
                .collect::<Result<MatrixCombination, String>>()
        })
        .collect()
}

/// Deserialize a mapping of scalars (`FOO: 1`, `BAR: true`) into strings
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                _ => {
                    return Err(D::Error::custom(format!(
                        "value of '{}' must be a string, number or boolean",
                        key
                    )))
                }
            };
            Ok((key, text))
        })
        .collect()
}

/// A step within a job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Step {
    /// Unique identifier for the step
    #[serde(default)]
    pub id: Option<String>,

    /// Display name for the step
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command to run
    #[serde(default)]
    pub run: Option<String>,

    /// Shell to use for the run command
    #[serde(default)]
    pub shell: Option<String>,

    /// Working directory for the step, relative to the workspace
    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,

    /// Action to use (e.g., "actions/checkout@v4")
    #[serde(default)]
    pub uses: Option<String>,

    /// Inputs to pass to the action
    #[serde(default, deserialize_with = "scalar_map")]
    pub with: BTreeMap<String, String>,

    /// Step-level environment variables
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    /// Whether to continue job if this step fails
    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,

    /// Step timeout in minutes
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u32>,
}

impl Step {
    /// Get a display name for the step.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            name.clone()
        } else if let Some(uses) = &self.uses {
            format!("Run {}", uses)
        } else if let Some(run) = &self.run {
            let first_line = run.lines().next().unwrap_or(run);
            if first_line.chars().count() > 50 {
                let truncated: String = first_line.chars().take(47).collect();
                format!("Run {}...", truncated)
            } else {
                format!("Run {}", first_line)
            }
        } else {
            "Unnamed step".to_string()
        }
    }

    pub fn is_run(&self) -> bool {
        self.run.is_some()
    }

    pub fn is_uses(&self) -> bool {
        self.uses.is_some()
    }

    /// Secret names referenced through `${{ secrets.NAME }}` in `run`, `with` or `env`
    pub fn secret_refs(&self) -> BTreeSet<String> {
        self.run
            .iter()
            .chain(self.with.values())
            .chain(self.env.values())
            .flat_map(|text| expression::secret_names(text))
            .collect()
    }
}
