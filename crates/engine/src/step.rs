//! Single-step execution.
//!
//! A step runs through a fixed sequence: template expansion of its name and
//! `with` tree, optional embedded-job expansion, optional wait, optional
//! per-entry iteration, the action call with retry-until-test, result
//! normalisation, then test/echo/outputs and bookkeeping. Failures never
//! abort the job here; they set the context's failed flag and execution
//! continues with the next step.

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use serde_json::{Map as JsonMap, Value, json};
use tracing::{debug, warn};

use probe_types::Step;
use probe_util::{format_duration, merge_maps, normalize_recorded_bodies, wait_duration};

use crate::action::ActionRunner;
use crate::buffer::{RepeatSnapshot, StepEntry, StepStatus};
use crate::context::{JobContext, StepCounter};
use crate::error::ProbeError;
use crate::loader;
use crate::report::StepRecord;

/// Action name that expands an external job file in place of the step.
pub const EMBEDDED_ACTION: &str = "embedded";

/// Execute one step, including iteration and embedded expansion.
///
/// Returns the step's overall success; with iteration, every entry must
/// succeed.
pub async fn run_step(
    step: &Step,
    index: usize,
    defaults: Option<&JsonMap<String, Value>>,
    ctx: &mut JobContext,
    runner: &dyn ActionRunner,
) -> bool {
    if step.uses == EMBEDDED_ACTION {
        return run_embedded(step, index, ctx, runner).await;
    }

    if step.iter.is_empty() {
        return run_step_once(step, index, defaults, ctx, runner, None).await;
    }

    let mut all_ok = true;
    for iteration in &step.iter {
        let ok = run_step_once(step, index, defaults, ctx, runner, Some(iteration)).await;
        all_ok &= ok;
    }
    all_ok
}

async fn run_step_once(
    step: &Step,
    index: usize,
    defaults: Option<&JsonMap<String, Value>>,
    ctx: &mut JobContext,
    runner: &dyn ActionRunner,
    iter_vars: Option<&JsonMap<String, Value>>,
) -> bool {
    let started = Instant::now();

    // Expansion phase. `res` refers to the previous step's result here; the
    // current result only exists after the action call.
    let previous_res = ctx
        .logs
        .last()
        .and_then(|record| record.get("res"))
        .cloned()
        .unwrap_or(Value::Null);
    let expansion_env = ctx.step_env(&previous_res, &Value::Null, iter_vars);

    let raw_name = step.name.clone().unwrap_or_else(|| step.uses.clone());
    let name = ctx.evaluator.render_template(&raw_name, &expansion_env).text;

    let user_with = step.with.clone().unwrap_or_default();
    let merged_with = match defaults {
        Some(base) => merge_maps(base, &user_with),
        None => user_with,
    };
    let (with, issues) = ctx.evaluator.eval_template_map(&merged_with, &expansion_env);

    if let Some(violation) = issues.iter().find(|issue| issue.is_security()) {
        let message = violation.to_string();
        warn!(step = %name, %message, "step refused by expression security");
        finish_step(ctx, step, index, &name, Value::Object(with), started, false, Some(message), None);
        return false;
    }

    // Wait phase: counted into the step's visible timing.
    if let Some(wait) = &step.wait {
        match wait_duration(wait) {
            Ok(delay) if !delay.is_zero() => tokio::time::sleep(delay).await,
            Ok(_) => {}
            Err(message) => warn!(step = %name, %message, "invalid wait duration; skipping wait"),
        }
    }

    // Action call with retry-until-test.
    let max_attempts = step.retry.as_ref().map(|retry| retry.max_attempts.max(1)).unwrap_or(1);
    let retry_interval = step
        .retry
        .as_ref()
        .and_then(|retry| retry.interval.as_ref())
        .and_then(|spec| wait_duration(spec).ok());
    if max_attempts > 1
        && let Some(delay) = step
            .retry
            .as_ref()
            .and_then(|retry| retry.initial_delay.as_ref())
            .and_then(|spec| wait_duration(spec).ok())
        && !delay.is_zero()
    {
        tokio::time::sleep(delay).await;
    }

    let mut attempt = 0u32;
    let mut res = Value::Null;
    let mut action_error: Option<ProbeError> = None;
    loop {
        attempt += 1;
        match runner.run(&step.uses, &[], &with, ctx.config.verbose).await {
            Ok(mut result) => {
                normalize_recorded_bodies(&mut result);
                res = Value::Object(result);
                action_error = None;
            }
            Err(error) => {
                warn!(step = %name, attempt, %error, "action dispatch failed");
                res = Value::Null;
                action_error = Some(error);
            }
        }

        if attempt >= max_attempts {
            break;
        }
        if action_error.is_none() && test_passes(step, ctx, &res, started, iter_vars) {
            break;
        }
        debug!(step = %name, attempt, "retrying step");
        if let Some(interval) = retry_interval
            && !interval.is_zero()
        {
            tokio::time::sleep(interval).await;
        }
    }

    // Test, echo, outputs against the final attempt's result.
    let rt = rt_value(started);
    let env = ctx.step_env(&res, &rt, iter_vars);

    let (success, test_output) = match &action_error {
        Some(error) => (false, Some(error.to_string())),
        None => match &step.test {
            Some(test) => match ctx.evaluator.eval_bool(test, &env) {
                Ok(true) => (true, None),
                Ok(false) => (false, Some(failed_test_output(test, ctx, &env))),
                Err(error) => (false, Some(format!("test: {test}\nerror: {error}"))),
            },
            None => (true, None),
        },
    };

    let echo = match &step.echo {
        Some(echo_expr) => match ctx.evaluator.eval_template(echo_expr, &env) {
            Ok(text) => Some(text),
            Err(error) => {
                warn!(step = %name, %error, "echo failed to render");
                None
            }
        },
        None => None,
    };

    if let Some(outputs) = &step.outputs
        && !outputs.is_empty()
    {
        store_outputs(step, outputs, ctx, &env);
    }

    finish_with_entry(ctx, step, index, &name, res, rt, success, test_output, echo, started);
    success
}

/// Evaluate the step's test mid-retry, against a fresh environment.
fn test_passes(step: &Step, ctx: &JobContext, res: &Value, started: Instant, iter_vars: Option<&JsonMap<String, Value>>) -> bool {
    let Some(test) = &step.test else {
        return true;
    };
    let env = ctx.step_env(res, &rt_value(started), iter_vars);
    ctx.evaluator.eval_bool(test, &env).unwrap_or(false)
}

fn rt_value(started: Instant) -> Value {
    let elapsed = started.elapsed();
    json!({
        "duration": format_duration(elapsed),
        "sec": elapsed.as_secs_f64(),
    })
}

/// Failure detail for the report: the test expression, its outcome, and a
/// structural diff when the test was a `match_json` comparison.
fn failed_test_output(test: &str, ctx: &JobContext, env: &Value) -> String {
    let mut output = format!("test: {test}\noutput: false");
    if test.contains("match_json(") {
        let diff_expression = test.replace("match_json(", "diff_json(");
        if let Ok(Value::String(diff)) = ctx.evaluator.eval(&diff_expression, env) {
            output.push_str("\ndiff: ");
            output.push_str(&diff);
        }
    }
    output
}

fn store_outputs(step: &Step, outputs: &indexmap::IndexMap<String, Value>, ctx: &mut JobContext, env: &Value) {
    let mut evaluated = indexmap::IndexMap::new();
    for (output_name, template) in outputs {
        let value = match template {
            Value::String(text) => eval_output_template(ctx, text, env),
            other => other.clone(),
        };
        evaluated.insert(output_name.clone(), value);
    }
    if let Err(error) = ctx.outputs.set(&step.id, evaluated) {
        warn!(step_id = %step.id, %error, "cannot record step outputs");
        ctx.printer.write(&ctx.job_id, &format!("outputs not recorded: {error}"));
        ctx.failed = true;
    }
}

/// Evaluate one output template. A value that is exactly one `{…}` segment
/// keeps its evaluated type; anything else renders to a string.
fn eval_output_template(ctx: &JobContext, text: &str, env: &Value) -> Value {
    let trimmed = text.trim();
    if let Some(inner) = trimmed.strip_prefix('{').and_then(|rest| rest.strip_suffix('}'))
        && !inner.contains('{')
        && !inner.is_empty()
    {
        if let Ok(value) = ctx.evaluator.eval(inner.trim(), env) {
            return value;
        }
    }
    Value::String(ctx.evaluator.render_template(text, env).text)
}

#[allow(clippy::too_many_arguments)]
fn finish_step(
    ctx: &mut JobContext,
    step: &Step,
    index: usize,
    name: &str,
    res: Value,
    started: Instant,
    success: bool,
    test_output: Option<String>,
    echo: Option<String>,
) {
    let rt = rt_value(started);
    finish_with_entry(ctx, step, index, name, res, rt, success, test_output, echo, started);
}

#[allow(clippy::too_many_arguments)]
fn finish_with_entry(
    ctx: &mut JobContext,
    step: &Step,
    index: usize,
    name: &str,
    res: Value,
    rt: Value,
    success: bool,
    test_output: Option<String>,
    echo: Option<String>,
    started: Instant,
) {
    let has_test = step.test.is_some();
    let rt_text = if ctx.config.show_rt {
        rt.get("duration").and_then(Value::as_str).unwrap_or_default().to_string()
    } else {
        String::new()
    };

    // Repeat accounting: counters live across the job's repeat iterations.
    let counter_key = if step.id.is_empty() {
        format!("{}#{index}", ctx.job_id)
    } else {
        step.id.clone()
    };
    let snapshot = {
        let mut counters = ctx.counters.lock().expect("step counters lock poisoned");
        let counter = counters.entry(counter_key).or_insert_with(|| StepCounter {
            name: name.to_string(),
            has_test,
            ..Default::default()
        });
        if success {
            counter.success_count += 1;
        } else {
            counter.failure_count += 1;
        }
        counter.last_result = success;
        RepeatSnapshot {
            success_count: counter.success_count,
            failure_count: counter.failure_count,
            total: counter.success_count + counter.failure_count,
            has_test,
        }
    };

    let status = if success { StepStatus::Success } else { StepStatus::Error };
    if ctx.is_repeating {
        // Only the first and final repeats print; the final one carries the
        // compact counter line.
        let is_first = ctx.repeat_current == 0;
        let is_final = ctx.repeat_current + 1 >= ctx.repeat_total;
        if is_final {
            ctx.printer.write_step(
                &ctx.job_id,
                StepEntry {
                    index,
                    name: name.to_string(),
                    status,
                    rt: rt_text,
                    test_output: test_output.clone(),
                    echo: echo.clone(),
                    has_test,
                    repeat: Some(snapshot),
                },
            );
        } else if is_first {
            ctx.printer.write_step(
                &ctx.job_id,
                StepEntry {
                    index,
                    name: name.to_string(),
                    status,
                    rt: rt_text,
                    test_output: test_output.clone(),
                    echo: echo.clone(),
                    has_test,
                    repeat: None,
                },
            );
        }
    } else {
        ctx.printer.write_step(
            &ctx.job_id,
            StepEntry {
                index,
                name: name.to_string(),
                status,
                rt: rt_text,
                test_output: test_output.clone(),
                echo: echo.clone(),
                has_test,
                repeat: None,
            },
        );
    }

    ctx.results.push_step(
        &ctx.job_id,
        StepRecord {
            index,
            name: name.to_string(),
            success,
            rt_sec: started.elapsed().as_secs_f64(),
            output: test_output.clone(),
        },
    );

    ctx.logs.push(json!({
        "name": name,
        "res": res,
        "rt": rt,
        "success": success,
    }));

    if !success {
        ctx.failed = true;
    }
}

/// Expand an embedded job file: its steps run inline, as if declared here.
async fn run_embedded(step: &Step, index: usize, ctx: &mut JobContext, runner: &dyn ActionRunner) -> bool {
    let expansion_env = ctx.step_env(&Value::Null, &Value::Null, None);
    let user_with = step.with.clone().unwrap_or_default();
    let (with, _) = ctx.evaluator.eval_template_map(&user_with, &expansion_env);

    let Some(path) = with.get("path").and_then(Value::as_str) else {
        let message = "embedded step requires with.path".to_string();
        warn!(job = %ctx.job_id, %message, "embedded expansion failed");
        record_embedded_failure(ctx, step, index, &message);
        return false;
    };

    let embedded_job = match loader::load_embedded_job(&ctx.base_dir, path) {
        Ok(job) => job,
        Err(error) => {
            warn!(job = %ctx.job_id, path, %error, "embedded expansion failed");
            record_embedded_failure(ctx, step, index, &error.to_string());
            return false;
        }
    };

    debug!(job = %ctx.job_id, path, steps = embedded_job.steps.len(), "expanding embedded job");
    let mut all_ok = true;
    for (offset, sub_step) in embedded_job.steps.iter().enumerate() {
        let defaults = embedded_job.defaults_for(&sub_step.uses).cloned();
        let ok = run_step_boxed(sub_step, index + offset, defaults.as_ref(), ctx, runner).await;
        all_ok &= ok;
    }
    all_ok
}

/// Boxed indirection that lets embedded expansion recurse into `run_step`.
fn run_step_boxed<'a>(
    step: &'a Step,
    index: usize,
    defaults: Option<&'a JsonMap<String, Value>>,
    ctx: &'a mut JobContext,
    runner: &'a dyn ActionRunner,
) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
    Box::pin(run_step(step, index, defaults, ctx, runner))
}

fn record_embedded_failure(ctx: &mut JobContext, step: &Step, index: usize, message: &str) {
    let name = step.name.clone().unwrap_or_else(|| EMBEDDED_ACTION.to_string());
    finish_step(ctx, step, index, &name, Value::Null, Instant::now(), false, Some(message.to_string()), None);
}
