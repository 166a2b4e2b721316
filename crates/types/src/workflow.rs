//! Workflow schema definitions.
//!
//! These structures deserialize directly from workflow YAML documents. They
//! intentionally stay free of execution state: the engine wraps them in its
//! own runtime types and never mutates the model after loading, with the one
//! exception of [`validation::assign_job_ids`] which fills in generated job
//! identifiers before scheduling.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod validation;

/// Root workflow document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Workflow {
    /// Workflow name shown in logs and the final report.
    pub name: String,
    /// Optional descriptive copy for humans; never interpreted.
    #[serde(default)]
    pub description: Option<String>,
    /// Workflow-scoped variables. String values are templates evaluated once
    /// against the process environment snapshot when the run starts; other
    /// scalar values pass through untouched.
    #[serde(default)]
    pub vars: IndexMap<String, Value>,
    /// Ordered sequence of jobs. Report order follows this declaration order
    /// regardless of completion order.
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// One schedulable unit of the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Job {
    /// Job name; template-expandable at execution time.
    pub name: String,
    /// Unique job identifier. Auto-assigned as `job_<index>` when empty.
    #[serde(default)]
    pub id: String,
    /// Identifiers of jobs that must fully complete with success before this
    /// job becomes runnable.
    #[serde(default)]
    pub needs: Vec<String>,
    /// Ordered sequence of steps executed by one worker.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Whole-job repetition at a fixed interval.
    #[serde(default)]
    pub repeat: Option<Repeat>,
    /// Per-action default `with` trees, merged underneath each step's own
    /// `with` before template expansion.
    #[serde(default)]
    pub defaults: Option<IndexMap<String, Value>>,
    /// Boolean expression evaluated before the first step; when true the job
    /// is recorded as skipped (and successful).
    #[serde(default)]
    pub skipif: Option<String>,
}

/// One action invocation plus its surrounding controls.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Step {
    /// Display name; template-expandable.
    #[serde(default)]
    pub name: Option<String>,
    /// Step identifier, referenced by `outputs` consumers. Must match
    /// `[a-z0-9_-]+` when set and is required whenever `outputs` is present.
    #[serde(default)]
    pub id: String,
    /// Action name to dispatch. The sentinel `embedded` expands an external
    /// job file in place of this step.
    pub uses: String,
    /// Action parameters; string leaves are templates.
    #[serde(default)]
    pub with: Option<serde_json::Map<String, Value>>,
    /// Boolean assertion evaluated against the step context after the action
    /// returns. A step without a test is always considered successful.
    #[serde(default)]
    pub test: Option<String>,
    /// Expression whose rendered text is appended to the job log on success.
    #[serde(default)]
    pub echo: Option<String>,
    /// Sleep before the action call. Counted in the step's visible timing.
    #[serde(default)]
    pub wait: Option<WaitSpec>,
    /// Per-step iteration: when non-empty the step runs once per variable
    /// map, in sequence order.
    #[serde(default)]
    pub iter: Vec<serde_json::Map<String, Value>>,
    /// Re-execution until the test passes or attempts run out.
    #[serde(default)]
    pub retry: Option<Retry>,
    /// Named outputs captured into the shared store. Values are templates
    /// evaluated against the step context.
    #[serde(default)]
    pub outputs: Option<IndexMap<String, Value>>,
}

/// Whole-job repetition settings.
///
/// The job runs `count` times with at least `interval` between iteration
/// starts. `count: 0` and `count: 1` both mean a single run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Repeat {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub interval: Option<WaitSpec>,
}

/// Per-step retry settings.
///
/// The step is re-executed until its `test` evaluates true or `max_attempts`
/// is reached. The first attempt is delayed by `initial_delay` when set;
/// later attempts wait `interval` between executions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Retry {
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default)]
    pub interval: Option<WaitSpec>,
    #[serde(default)]
    pub initial_delay: Option<WaitSpec>,
}

/// A duration in authoring form: either a bare integer (seconds) or a
/// duration string such as `"250ms"` or `"2m30s"`.
///
/// Parsing lives in `probe-util`; this type only preserves what the author
/// wrote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WaitSpec {
    /// Whole seconds.
    Seconds(u64),
    /// Duration string, e.g. `250ms`, `10s`, `2m30s`.
    Text(String),
}

impl Default for WaitSpec {
    fn default() -> Self {
        WaitSpec::Seconds(0)
    }
}

impl Job {
    /// Default `with` tree declared for the given action. Only mapping-shaped
    /// defaults are usable; scalar defaults are ignored.
    pub fn defaults_for(&self, action: &str) -> Option<&serde_json::Map<String, Value>> {
        self.defaults.as_ref()?.get(action)?.as_object()
    }
}
