//! Workflow runner: scheduling loop, job workers, and the final report.
//!
//! The runner owns the scheduler and drives it over a completion channel:
//! workers and repeat timers push events, the loop reacts by updating
//! scheduler state, sweeping failure cascades, and dispatching whatever
//! became runnable. All job output lands in the buffers, so the report
//! prints in declared order no matter how completion interleaved.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map as JsonMap, Value};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use probe_types::{Job, Workflow, validation};
use probe_util::wait_duration;

use crate::action::ActionRunner;
use crate::buffer::{JobStatus as BufferStatus, WorkflowBuffer};
use crate::context::{JobContext, RunConfig, StepCounters};
use crate::error::ProbeError;
use crate::expr::Evaluator;
use crate::job::{self, JobRunStatus};
use crate::outputs::Outputs;
use crate::printer::{Printer, should_colorize};
use crate::report::{JobOutcome, JobResult, ResultBoard};
use crate::scheduler::{JobStatus, Scheduler};

/// Outcome of a full workflow run.
#[derive(Debug)]
pub struct RunSummary {
    /// Rendered report, as printed.
    pub report: String,
    pub results: Vec<JobResult>,
    pub exit_status: i32,
    pub total: Duration,
}

enum WorkerEvent {
    Done {
        job_id: String,
        success: bool,
        skipped: bool,
        error: Option<String>,
    },
    /// A repeat timer elapsed; the job may be re-queued.
    Ready { job_id: String },
}

/// A loaded workflow plus the run-scoped state around it.
pub struct WorkflowRun {
    spec: Workflow,
    base_dir: PathBuf,
    env: Arc<JsonMap<String, Value>>,
    exit_status: i32,
}

impl WorkflowRun {
    /// Wrap a loaded workflow. The process environment is snapshotted here
    /// and never re-read.
    pub fn new(spec: Workflow, base_dir: PathBuf) -> Self {
        Self {
            spec,
            base_dir,
            env: Arc::new(JobContext::capture_process_env()),
            exit_status: 0,
        }
    }

    /// Replace the environment snapshot (tests and embedding).
    pub fn with_env(mut self, env: JsonMap<String, Value>) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// `0` when every non-skipped job succeeded, `1` otherwise.
    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    pub fn spec(&self) -> &Workflow {
        &self.spec
    }

    /// Execute the workflow to completion.
    pub async fn start(&mut self, config: RunConfig, runner: Arc<dyn ActionRunner>) -> Result<RunSummary, ProbeError> {
        let started = Instant::now();

        validation::assign_job_ids(&mut self.spec);
        if let Err(message) = validation::validate_workflow(&self.spec) {
            self.exit_status = 1;
            return Err(ProbeError::validation("workflow.validate", message));
        }

        let evaluator = Evaluator::new(config.security_mode);
        let vars = self.evaluate_vars(&evaluator);

        let ordered: Vec<(String, String)> = self
            .spec
            .jobs
            .iter()
            .map(|job| (job.id.clone(), job.name.clone()))
            .collect();
        let buffer = Arc::new(WorkflowBuffer::new(ordered.clone()));
        let printer = Arc::new(Printer::new(Arc::clone(&buffer), config.verbose, should_colorize()));
        let outputs = Arc::new(Outputs::new());
        let results = Arc::new(ResultBoard::new(ordered));

        let scheduler = Arc::new(Scheduler::new());
        for job in &self.spec.jobs {
            if let Err(error) = scheduler.add_job(job) {
                self.exit_status = 1;
                printer.print_error(&error.to_string());
                return Err(error);
            }
        }
        if let Err(error) = scheduler.validate_dependencies() {
            self.exit_status = 1;
            printer.print_error(&error.to_string());
            return Err(error);
        }

        info!(workflow = %self.spec.name, jobs = self.spec.jobs.len(), "workflow started");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = RunState {
            scheduler: Arc::clone(&scheduler),
            printer: Arc::clone(&printer),
            results: Arc::clone(&results),
            outputs,
            vars,
            env: Arc::clone(&self.env),
            base_dir: self.base_dir.clone(),
            config,
            jobs_by_id: self.spec.jobs.iter().map(|job| (job.id.clone(), job.clone())).collect(),
            counters: HashMap::new(),
            last_start: HashMap::new(),
            tx,
            runner,
            in_flight: 0,
            pending_timers: 0,
        };

        state.dispatch_runnable();

        while !scheduler.all_jobs_completed() {
            if state.in_flight == 0 && state.pending_timers == 0 {
                // Nothing can make progress; validation should make this
                // unreachable.
                warn!(workflow = %self.spec.name, "scheduling stalled with incomplete jobs");
                break;
            }
            let Some(event) = rx.recv().await else {
                break;
            };
            match event {
                WorkerEvent::Done {
                    job_id,
                    success,
                    skipped,
                    error,
                } => {
                    state.in_flight -= 1;
                    state.on_job_done(&job_id, success, skipped, error);
                }
                WorkerEvent::Ready { job_id } => {
                    state.pending_timers -= 1;
                    state.scheduler.set_job_status(&job_id, JobStatus::Pending, false);
                    state.dispatch_runnable();
                }
            }
        }

        let total = started.elapsed();
        let report = printer.render_report(total);
        printer.print_report(total);

        let failed = results.failed_count();
        self.exit_status = if failed == 0 { 0 } else { 1 };
        info!(workflow = %self.spec.name, failed, total_sec = total.as_secs_f64(), "workflow finished");

        Ok(RunSummary {
            report,
            results: results.snapshot(),
            exit_status: self.exit_status,
            total,
        })
    }

    /// Expand workflow vars against the environment snapshot only.
    ///
    /// String values are templates; a reference to a missing environment
    /// variable renders `<nil>` rather than failing the run.
    fn evaluate_vars(&self, evaluator: &Evaluator) -> JsonMap<String, Value> {
        let mut env_root = JsonMap::new();
        env_root.insert("env".to_string(), Value::Object(self.env.as_ref().clone()));
        let template_env = Value::Object(env_root);

        let mut vars = JsonMap::new();
        for (key, value) in &self.spec.vars {
            let expanded = match value {
                Value::String(text) => Value::String(evaluator.render_template(text, &template_env).text),
                other => other.clone(),
            };
            vars.insert(key.clone(), expanded);
        }
        vars
    }
}

struct RunState {
    scheduler: Arc<Scheduler>,
    printer: Arc<Printer>,
    results: Arc<ResultBoard>,
    outputs: Arc<Outputs>,
    vars: JsonMap<String, Value>,
    env: Arc<JsonMap<String, Value>>,
    base_dir: PathBuf,
    config: RunConfig,
    jobs_by_id: HashMap<String, Job>,
    /// Per-job step counters, shared across repeat iterations.
    counters: HashMap<String, StepCounters>,
    last_start: HashMap<String, Instant>,
    tx: UnboundedSender<WorkerEvent>,
    runner: Arc<dyn ActionRunner>,
    in_flight: usize,
    pending_timers: usize,
}

impl RunState {
    /// Spawn a worker for every currently runnable job.
    fn dispatch_runnable(&mut self) {
        for job_id in self.scheduler.get_runnable_jobs() {
            self.spawn_worker(&job_id);
        }
    }

    fn spawn_worker(&mut self, job_id: &str) {
        let Some(job) = self.jobs_by_id.get(job_id).cloned() else {
            return;
        };
        self.scheduler.set_job_status(job_id, JobStatus::Running, false);
        self.printer.mark_job_started(job_id);
        self.results.mark_started(job_id);
        self.last_start.insert(job_id.to_string(), Instant::now());

        let (completed, target) = self.scheduler.get_repeat_info(job_id);
        let counters = Arc::clone(self.counters.entry(job_id.to_string()).or_default());

        let mut ctx = JobContext::new(
            job_id,
            self.vars.clone(),
            Arc::clone(&self.env),
            Arc::clone(&self.outputs),
            Arc::clone(&self.printer),
            Arc::clone(&self.results),
            self.config,
            self.base_dir.clone(),
        );
        ctx.is_repeating = target > 1;
        ctx.repeat_current = completed;
        ctx.repeat_total = target;
        ctx.counters = counters;

        debug!(job = %job_id, iteration = completed + 1, of = target, "job dispatched");
        let tx = self.tx.clone();
        let runner = Arc::clone(&self.runner);
        self.in_flight += 1;
        tokio::spawn(async move {
            let outcome = job::run_job(&job, &mut ctx, runner.as_ref()).await;
            let event = WorkerEvent::Done {
                job_id: ctx.job_id.clone(),
                success: outcome.is_ok(),
                skipped: matches!(outcome, Ok(JobRunStatus::Skipped)),
                error: outcome.err().map(|error| error.to_string()),
            };
            let _ = tx.send(event);
        });
    }

    fn on_job_done(&mut self, job_id: &str, success: bool, skipped: bool, error: Option<String>) {
        if skipped {
            // skipif jobs are terminal immediately; repeat settings do not
            // re-queue them. The worker already finalised buffers/results.
            self.scheduler.mark_fully_completed(job_id, true);
        } else if success {
            self.scheduler.increment_repeat_counter(job_id);
            self.scheduler.set_job_status(job_id, JobStatus::Completed, true);
            if self.scheduler.should_repeat_job(job_id) {
                self.schedule_repeat(job_id);
            } else {
                self.printer.finalize_job(job_id, BufferStatus::Completed, true);
                self.results.finalize(job_id, JobOutcome::Success, true, None);
            }
        } else {
            self.scheduler.increment_repeat_counter(job_id);
            self.scheduler.set_job_status(job_id, JobStatus::Failed, false);
            self.printer.finalize_job(job_id, BufferStatus::Failed, false);
            self.results.finalize(job_id, JobOutcome::Failed, false, error);
        }

        self.sweep_failed_dependencies();
        self.dispatch_runnable();
    }

    /// Re-queue a repeating job once its interval since the last start has
    /// elapsed. One timer per job; iterations never overlap because the
    /// timer only starts after completion.
    fn schedule_repeat(&mut self, job_id: &str) {
        let interval = self
            .jobs_by_id
            .get(job_id)
            .and_then(|job| job.repeat.as_ref())
            .and_then(|repeat| repeat.interval.as_ref())
            .and_then(|spec| wait_duration(spec).ok())
            .unwrap_or(Duration::ZERO);
        let since_start = self
            .last_start
            .get(job_id)
            .map(Instant::elapsed)
            .unwrap_or(Duration::ZERO);
        let delay = interval.saturating_sub(since_start);

        let (completed, target) = self.scheduler.get_repeat_info(job_id);
        debug!(job = %job_id, iteration = completed, of = target, delay_ms = delay.as_millis() as u64, "repeat scheduled");

        self.pending_timers += 1;
        let tx = self.tx.clone();
        let id = job_id.to_string();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = tx.send(WorkerEvent::Ready { job_id: id });
        });
    }

    /// Mark the transitive closure of failed dependencies and surface each
    /// newly skipped job in its buffer and result record.
    fn sweep_failed_dependencies(&mut self) {
        for skipped_id in self.scheduler.mark_jobs_with_failed_dependencies() {
            info!(job = %skipped_id, "job skipped due to failed dependency");
            self.printer.write(&skipped_id, "Skipped due to failed dependency");
            self.printer.finalize_job(&skipped_id, BufferStatus::Skipped, false);
            self.results.finalize(
                &skipped_id,
                JobOutcome::Failed,
                false,
                Some("skipped due to failed dependency".to_string()),
            );
        }
    }
}
