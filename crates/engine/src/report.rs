//! Per-job result aggregation.
//!
//! The result board is the structured counterpart of the display buffers:
//! one record per job, updated by workers and consulted for the process
//! exit status and by `run_independently` callers.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// Terminal outcome of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Running,
    Success,
    Failed,
    Skipped,
}

/// Captured result of one step execution.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub index: usize,
    pub name: String,
    pub success: bool,
    pub rt_sec: f64,
    /// Test evaluation output or error text for failures.
    pub output: Option<String>,
}

/// Aggregated result of one job.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub id: String,
    pub name: String,
    pub status: JobOutcome,
    pub success: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    pub error: Option<String>,
}

impl JobResult {
    fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            status: JobOutcome::Running,
            success: false,
            started_at: None,
            ended_at: None,
            steps: Vec::new(),
            error: None,
        }
    }
}

/// Shared, ordered collection of job results.
#[derive(Debug, Default)]
pub struct ResultBoard {
    jobs: Mutex<IndexMap<String, JobResult>>,
}

impl ResultBoard {
    /// Initialise one `running` record per declared job.
    pub fn new(jobs: impl IntoIterator<Item = (String, String)>) -> Self {
        let map = jobs
            .into_iter()
            .map(|(id, name)| (id.clone(), JobResult::new(id, name)))
            .collect();
        Self { jobs: Mutex::new(map) }
    }

    pub fn mark_started(&self, job_id: &str) {
        self.update(job_id, |result| {
            result.started_at.get_or_insert_with(Utc::now);
        });
    }

    pub fn push_step(&self, job_id: &str, record: StepRecord) {
        self.update(job_id, |result| result.steps.push(record));
    }

    pub fn finalize(&self, job_id: &str, status: JobOutcome, success: bool, error: Option<String>) {
        self.update(job_id, |result| {
            result.status = status;
            result.success = success;
            result.ended_at = Some(Utc::now());
            if error.is_some() {
                result.error = error;
            }
        });
    }

    /// Snapshot of every job result, in declaration order.
    pub fn snapshot(&self) -> Vec<JobResult> {
        let jobs = self.jobs.lock().expect("result board lock poisoned");
        jobs.values().cloned().collect()
    }

    /// Number of jobs that ended failed (skipped-as-failed included).
    pub fn failed_count(&self) -> usize {
        let jobs = self.jobs.lock().expect("result board lock poisoned");
        jobs.values().filter(|result| !result.success).count()
    }

    fn update(&self, job_id: &str, f: impl FnOnce(&mut JobResult)) {
        let mut jobs = self.jobs.lock().expect("result board lock poisoned");
        if let Some(result) = jobs.get_mut(job_id) {
            f(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_initialise_running_and_finalize() {
        let board = ResultBoard::new([("a".to_string(), "A".to_string())]);

        let before = board.snapshot();
        assert_eq!(before[0].status, JobOutcome::Running);

        board.mark_started("a");
        board.finalize("a", JobOutcome::Success, true, None);

        let after = board.snapshot();
        assert_eq!(after[0].status, JobOutcome::Success);
        assert!(after[0].success);
        assert!(after[0].started_at.is_some());
        assert!(after[0].ended_at.is_some());
    }

    #[test]
    fn failed_count_includes_skipped_as_failed() {
        let board = ResultBoard::new([
            ("ok".to_string(), "ok".to_string()),
            ("bad".to_string(), "bad".to_string()),
            ("skipped".to_string(), "skipped".to_string()),
        ]);

        board.finalize("ok", JobOutcome::Success, true, None);
        board.finalize("bad", JobOutcome::Failed, false, Some("boom".into()));
        board.finalize("skipped", JobOutcome::Failed, false, None);

        assert_eq!(board.failed_count(), 2);
    }
}
