//! Execution contexts threaded through jobs and steps.
//!
//! A [`JobContext`] is built per worker invocation and carries the shared
//! stores by `Arc`; the step executor reads configuration and variables
//! immutably and writes only to those stores, to its own log vector, and to
//! the `failed` flag. Expressions never see the context itself, only the
//! JSON projection assembled by [`JobContext::step_env`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};

use crate::expr::{Evaluator, SecurityMode};
use crate::outputs::Outputs;
use crate::printer::Printer;
use crate::report::ResultBoard;

/// Run-wide configuration.
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    /// Stream buffered lines as they happen.
    pub verbose: bool,
    /// Show response times on step lines.
    pub show_rt: bool,
    /// What security violations do to the process.
    pub security_mode: SecurityMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            show_rt: true,
            security_mode: SecurityMode::default(),
        }
    }
}

/// Per-step accounting kept across the repeats of one job.
#[derive(Debug, Clone, Default)]
pub struct StepCounter {
    pub name: String,
    pub success_count: u32,
    pub failure_count: u32,
    pub last_result: bool,
    pub has_test: bool,
}

/// Shared counters for one job, surviving across repeat iterations.
pub type StepCounters = Arc<Mutex<IndexMap<String, StepCounter>>>;

/// Everything one job worker needs to execute its steps.
pub struct JobContext {
    pub job_id: String,
    /// Expanded workflow vars.
    pub vars: JsonMap<String, Value>,
    /// Process environment snapshot, read once at workflow start.
    pub env: Arc<JsonMap<String, Value>>,
    /// Append-only step result records of this job.
    pub logs: Vec<Value>,
    pub outputs: Arc<Outputs>,
    pub config: RunConfig,
    pub printer: Arc<Printer>,
    pub results: Arc<ResultBoard>,
    pub evaluator: Evaluator,
    /// Base directory for resolving embedded-job files.
    pub base_dir: PathBuf,
    pub is_repeating: bool,
    /// Zero-based index of the current repeat iteration.
    pub repeat_current: u32,
    pub repeat_total: u32,
    pub counters: StepCounters,
    /// Set when any step fails; the job keeps running but reports failure.
    pub failed: bool,
}

impl JobContext {
    pub fn new(
        job_id: impl Into<String>,
        vars: JsonMap<String, Value>,
        env: Arc<JsonMap<String, Value>>,
        outputs: Arc<Outputs>,
        printer: Arc<Printer>,
        results: Arc<ResultBoard>,
        config: RunConfig,
        base_dir: PathBuf,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            vars,
            env,
            logs: Vec::new(),
            outputs,
            config,
            printer,
            results,
            evaluator: Evaluator::new(config.security_mode),
            base_dir,
            is_repeating: false,
            repeat_current: 0,
            repeat_total: 1,
            counters: Arc::new(Mutex::new(IndexMap::new())),
            failed: false,
        }
    }

    /// Build the JSON environment a step expression evaluates against.
    ///
    /// Iteration variables are merged over `vars` and also exposed under
    /// `iter`; `res` and `rt` describe the step's current action result.
    pub fn step_env(&self, res: &Value, rt: &Value, iter_vars: Option<&JsonMap<String, Value>>) -> Value {
        let mut vars = self.vars.clone();
        if let Some(iteration) = iter_vars {
            for (key, value) in iteration {
                vars.insert(key.clone(), value.clone());
            }
        }

        let mut env = JsonMap::new();
        env.insert("vars".to_string(), Value::Object(vars));
        env.insert("logs".to_string(), Value::Array(self.logs.clone()));
        env.insert("outputs".to_string(), self.outputs.snapshot());
        env.insert("env".to_string(), Value::Object(self.env.as_ref().clone()));
        env.insert("res".to_string(), res.clone());
        env.insert("rt".to_string(), rt.clone());
        env.insert(
            "iter".to_string(),
            iter_vars.map(|vars| Value::Object(vars.clone())).unwrap_or(Value::Null),
        );
        env.insert("unixtime".to_string(), Value::Number(unix_now().into()));
        Value::Object(env)
    }

    /// Snapshot of the process environment as string values.
    pub fn capture_process_env() -> JsonMap<String, Value> {
        std::env::vars()
            .map(|(key, value)| (key, Value::String(value)))
            .collect()
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WorkflowBuffer;
    use serde_json::json;

    fn context() -> JobContext {
        let buffer = Arc::new(WorkflowBuffer::new([("j".to_string(), "j".to_string())]));
        let printer = Arc::new(Printer::new(Arc::clone(&buffer), false, false));
        let mut vars = JsonMap::new();
        vars.insert("region".to_string(), json!("us"));
        JobContext::new(
            "j",
            vars,
            Arc::new(JsonMap::new()),
            Arc::new(Outputs::new()),
            printer,
            Arc::new(ResultBoard::new([("j".to_string(), "j".to_string())])),
            RunConfig::default(),
            PathBuf::from("."),
        )
    }

    #[test]
    fn step_env_exposes_context_roots() {
        let mut ctx = context();
        ctx.logs.push(json!({"res": {"code": 200}}));
        ctx.outputs
            .set("auth", [("token".to_string(), json!("abc"))].into_iter().collect())
            .expect("set");

        let env = ctx.step_env(&json!({"code": 201}), &json!({"sec": 0.1}), None);

        assert_eq!(env["vars"]["region"], "us");
        assert_eq!(env["logs"][0]["res"]["code"], 200);
        assert_eq!(env["outputs"]["token"], "abc");
        assert_eq!(env["outputs"]["auth"]["token"], "abc");
        assert_eq!(env["res"]["code"], 201);
        assert_eq!(env["rt"]["sec"], 0.1);
        assert_eq!(env["iter"], Value::Null);
        assert!(env["unixtime"].as_i64().expect("unixtime") > 0);
    }

    #[test]
    fn iteration_vars_shadow_job_vars_and_surface_under_iter() {
        let ctx = context();
        let mut iteration = JsonMap::new();
        iteration.insert("region".to_string(), json!("eu"));

        let env = ctx.step_env(&Value::Null, &Value::Null, Some(&iteration));

        assert_eq!(env["vars"]["region"], "eu");
        assert_eq!(env["iter"]["region"], "eu");
    }
}
