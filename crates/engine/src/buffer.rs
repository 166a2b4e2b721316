//! Per-job output buffers.
//!
//! Step executions never write to stdout directly; they record entries into
//! their job's buffer, and the printer assembles the final report from the
//! buffers in declared job order. This is what decouples report order from
//! completion order.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

/// Display status of one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Error,
    Warning,
}

/// Terminal display status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Compact repeat accounting attached to a step entry on the final
/// iteration of a repeating job.
#[derive(Debug, Clone)]
pub struct RepeatSnapshot {
    pub success_count: u32,
    pub failure_count: u32,
    pub total: u32,
    pub has_test: bool,
}

/// One recorded step execution.
#[derive(Debug, Clone)]
pub struct StepEntry {
    /// Position of the step within its job, 1-based for display.
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    /// Rendered response time, e.g. `0.52s`.
    pub rt: String,
    /// Test expression and its evaluation output; present on failures.
    pub test_output: Option<String>,
    /// Rendered `echo` text, shown under the step line.
    pub echo: Option<String>,
    pub has_test: bool,
    pub repeat: Option<RepeatSnapshot>,
}

/// Buffered output and results for one job.
#[derive(Debug)]
pub struct JobBuffer {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub success: bool,
    pub steps: Vec<StepEntry>,
    /// Free-form buffered lines (skip notices, diagnostics).
    pub output: String,
    started: Option<Instant>,
    elapsed: Option<Duration>,
}

impl JobBuffer {
    fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            status: JobStatus::Running,
            success: false,
            steps: Vec::new(),
            output: String::new(),
            started: None,
            elapsed: None,
        }
    }

    /// Elapsed execution time, zero until the job first starts.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
            .or_else(|| self.started.map(|at| at.elapsed()))
            .unwrap_or(Duration::ZERO)
    }
}

/// All job buffers of a run, keyed by job id in declaration order.
#[derive(Debug, Default)]
pub struct WorkflowBuffer {
    jobs: Mutex<IndexMap<String, JobBuffer>>,
}

impl WorkflowBuffer {
    /// Create buffers for the declared jobs, preserving order.
    pub fn new(jobs: impl IntoIterator<Item = (String, String)>) -> Self {
        let map = jobs
            .into_iter()
            .map(|(id, name)| (id.clone(), JobBuffer::new(id, name)))
            .collect();
        Self { jobs: Mutex::new(map) }
    }

    pub fn mark_started(&self, job_id: &str) {
        self.with_job(job_id, |job| {
            if job.started.is_none() {
                job.started = Some(Instant::now());
            }
        });
    }

    pub fn finalize(&self, job_id: &str, status: JobStatus, success: bool) {
        self.with_job(job_id, |job| {
            job.status = status;
            job.success = success;
            if let Some(started) = job.started {
                job.elapsed = Some(started.elapsed());
            } else {
                job.elapsed = Some(Duration::ZERO);
            }
        });
    }

    /// Update the display name once templates have been expanded.
    pub fn set_name(&self, job_id: &str, name: &str) {
        self.with_job(job_id, |job| job.name = name.to_string());
    }

    pub fn push_step(&self, job_id: &str, entry: StepEntry) {
        self.with_job(job_id, |job| job.steps.push(entry));
    }

    pub fn push_line(&self, job_id: &str, line: &str) {
        self.with_job(job_id, |job| {
            job.output.push_str(line);
            job.output.push('\n');
        });
    }

    /// Run `f` against the whole ordered buffer set.
    pub fn read<R>(&self, f: impl FnOnce(&IndexMap<String, JobBuffer>) -> R) -> R {
        let jobs = self.jobs.lock().expect("buffer lock poisoned");
        f(&jobs)
    }

    fn with_job(&self, job_id: &str, f: impl FnOnce(&mut JobBuffer)) {
        let mut jobs = self.jobs.lock().expect("buffer lock poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            f(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize) -> StepEntry {
        StepEntry {
            index,
            name: format!("step {index}"),
            status: StepStatus::Success,
            rt: "0.01s".into(),
            test_output: None,
            echo: None,
            has_test: false,
            repeat: None,
        }
    }

    #[test]
    fn buffers_keep_declaration_order() {
        let buffer = WorkflowBuffer::new([
            ("b".to_string(), "B".to_string()),
            ("a".to_string(), "A".to_string()),
        ]);

        buffer.push_step("a", entry(1));
        buffer.push_step("b", entry(1));

        let ids = buffer.read(|jobs| jobs.keys().cloned().collect::<Vec<_>>());
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn finalize_records_status_and_elapsed() {
        let buffer = WorkflowBuffer::new([("a".to_string(), "A".to_string())]);
        buffer.mark_started("a");
        buffer.finalize("a", JobStatus::Completed, true);

        buffer.read(|jobs| {
            let job = &jobs["a"];
            assert_eq!(job.status, JobStatus::Completed);
            assert!(job.success);
            assert!(job.elapsed() < Duration::from_secs(1));
        });
    }

    #[test]
    fn lines_accumulate_with_newlines() {
        let buffer = WorkflowBuffer::new([("a".to_string(), "A".to_string())]);
        buffer.push_line("a", "first");
        buffer.push_line("a", "second");

        buffer.read(|jobs| {
            assert_eq!(jobs["a"].output, "first\nsecond\n");
        });
    }
}
