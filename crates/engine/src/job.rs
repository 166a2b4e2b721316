//! Job execution: validation, `skipif`, and the sequential step loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map as JsonMap, Value};
use tracing::{debug, info, warn};

use probe_types::{Job, validation};

use crate::action::ActionRunner;
use crate::buffer::{JobStatus, WorkflowBuffer};
use crate::context::{JobContext, RunConfig};
use crate::error::ProbeError;
use crate::outputs::Outputs;
use crate::printer::Printer;
use crate::report::{JobOutcome, ResultBoard};
use crate::step::run_step;

/// Validate the job's step configuration.
///
/// Step identifiers must match the allowed charset and be unique within the
/// job; any step with outputs must declare an identifier.
pub fn validate_steps(job: &Job) -> Result<(), ProbeError> {
    let mut seen = std::collections::HashSet::new();
    for step in &job.steps {
        if !step.id.is_empty() {
            if !validation::step_id_is_valid(&step.id) {
                return Err(ProbeError::validation("job.validate", "invalid step id")
                    .with_context("job", job.id.clone())
                    .with_context("step_id", step.id.clone()));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(ProbeError::validation("job.validate", "duplicate step id")
                    .with_context("job", job.id.clone())
                    .with_context("step_id", step.id.clone()));
            }
        }
        if step.outputs.as_ref().is_some_and(|outputs| !outputs.is_empty()) && step.id.is_empty() {
            return Err(
                ProbeError::validation("job.validate", "step declares outputs but has no id")
                    .with_context("job", job.id.clone()),
            );
        }
    }
    Ok(())
}

/// How a job run ended when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    /// All steps executed.
    Completed,
    /// `skipif` evaluated true; no step ran and the job counts as
    /// successful.
    Skipped,
}

/// Execute every step of the job against the given context.
///
/// A failing step marks the context failed and execution continues; the
/// error returned at the end reflects the accumulated flag. `skipif`
/// short-circuits the whole job as skipped-and-successful.
pub async fn run_job(job: &Job, ctx: &mut JobContext, runner: &dyn ActionRunner) -> Result<JobRunStatus, ProbeError> {
    validate_steps(job)?;

    let env = ctx.step_env(&Value::Null, &Value::Null, None);
    let name = ctx.evaluator.render_template(&job.name, &env).text;
    ctx.printer.set_job_name(&ctx.job_id, &name);

    if let Some(skipif) = &job.skipif {
        match ctx.evaluator.eval_bool(skipif, &env) {
            Ok(true) => {
                info!(job = %ctx.job_id, %skipif, "job skipped by skipif");
                ctx.printer.write(&ctx.job_id, &format!("Skipped: {skipif}"));
                ctx.printer.finalize_job(&ctx.job_id, JobStatus::Skipped, true);
                ctx.results
                    .finalize(&ctx.job_id, JobOutcome::Skipped, true, None);
                return Ok(JobRunStatus::Skipped);
            }
            Ok(false) => {}
            // Evaluation problems never skip; the job runs and the reason is
            // logged for the operator.
            Err(error) => warn!(job = %ctx.job_id, %error, "skipif did not evaluate; running job"),
        }
    }

    debug!(job = %ctx.job_id, steps = job.steps.len(), "job execution started");
    for (position, step) in job.steps.iter().enumerate() {
        let defaults = job.defaults_for(&step.uses).cloned();
        run_step(step, position + 1, defaults.as_ref(), ctx, runner).await;
    }

    if ctx.failed {
        Err(ProbeError::execution("job.run", "one or more steps failed").with_context("job", ctx.job_id.clone()))
    } else {
        Ok(JobRunStatus::Completed)
    }
}

/// Result of an isolated single-job run.
#[derive(Debug)]
pub struct IndependentRun {
    pub success: bool,
    pub outputs: JsonMap<String, Value>,
    pub report: String,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Execute one job in isolation with its own stores and report.
///
/// Used by embedded execution checks and tests; nothing is shared with any
/// surrounding workflow run.
pub async fn run_independently(
    job: &Job,
    vars: JsonMap<String, Value>,
    verbose: bool,
    id: &str,
    runner: &dyn ActionRunner,
) -> IndependentRun {
    let started = Instant::now();
    let buffer = Arc::new(WorkflowBuffer::new([(id.to_string(), job.name.clone())]));
    let printer = Arc::new(Printer::new(Arc::clone(&buffer), verbose, false));
    let outputs = Arc::new(Outputs::new());
    let results = Arc::new(ResultBoard::new([(id.to_string(), job.name.clone())]));

    let config = RunConfig {
        verbose,
        ..RunConfig::default()
    };
    let mut ctx = JobContext::new(
        id,
        vars,
        Arc::new(JobContext::capture_process_env()),
        Arc::clone(&outputs),
        Arc::clone(&printer),
        Arc::clone(&results),
        config,
        PathBuf::from("."),
    );

    printer.mark_job_started(id);
    results.mark_started(id);
    let outcome = run_job(job, &mut ctx, runner).await;
    let success = outcome.is_ok();
    let error = outcome.as_ref().err().map(|e| e.to_string());

    if !matches!(outcome, Ok(JobRunStatus::Skipped)) {
        let status = if success { JobStatus::Completed } else { JobStatus::Failed };
        printer.finalize_job(id, status, success);
        results.finalize(
            id,
            if success { JobOutcome::Success } else { JobOutcome::Failed },
            success,
            error.clone(),
        );
    }

    let duration = started.elapsed();
    IndependentRun {
        success,
        outputs: outputs.get_all(),
        report: printer.render_report(duration),
        error,
        duration,
    }
}
