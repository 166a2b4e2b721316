//! Job state tracking and dependency-driven readiness.
//!
//! The scheduler owns one state record per job: lifecycle status, success,
//! and the repeat counter pair. All mutation goes through a single lock; the
//! runner holds the scheduler and serialises decisions on its completion
//! channel, so the lock only guards individual transitions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use indexmap::IndexMap;
use probe_types::Job;

use crate::error::ProbeError;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct JobState {
    status: JobStatus,
    success: bool,
    /// Completed executions, for jobs with `repeat`.
    counter: u32,
    /// Total executions requested; always at least 1.
    target: u32,
    needs: Vec<String>,
}

impl JobState {
    /// Completed with its full execution count reached.
    fn fully_completed(&self) -> bool {
        self.status == JobStatus::Completed && self.counter >= self.target
    }

    fn terminal(&self) -> bool {
        self.fully_completed() || self.status == JobStatus::Failed
    }
}

/// Dependency-aware job state table.
#[derive(Debug, Default)]
pub struct Scheduler {
    jobs: Mutex<IndexMap<String, JobState>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and return its identifier.
    ///
    /// A declared identifier is used as-is and duplicates are rejected.
    /// Jobs without one get a name-derived identifier (base `job` when the
    /// name is empty), suffixed `-<k>` on conflicts.
    pub fn add_job(&self, job: &Job) -> Result<String, ProbeError> {
        let mut jobs = self.jobs.lock().expect("scheduler lock poisoned");

        let id = if job.id.is_empty() {
            let base = slug(&job.name);
            let base = if base.is_empty() { "job".to_string() } else { base };
            let mut candidate = base.clone();
            let mut k = 0;
            while jobs.contains_key(&candidate) {
                k += 1;
                candidate = format!("{base}-{k}");
            }
            candidate
        } else {
            if jobs.contains_key(&job.id) {
                return Err(ProbeError::validation("scheduler.add", "duplicate job id").with_context("job", job.id.clone()));
            }
            job.id.clone()
        };

        let target = job.repeat.as_ref().map(|repeat| repeat.count.max(1)).unwrap_or(1);
        jobs.insert(
            id.clone(),
            JobState {
                status: JobStatus::Pending,
                success: false,
                counter: 0,
                target,
                needs: job.needs.clone(),
            },
        );
        Ok(id)
    }

    /// Check that every `needs` entry resolves and the graph is acyclic.
    pub fn validate_dependencies(&self) -> Result<(), ProbeError> {
        let jobs = self.jobs.lock().expect("scheduler lock poisoned");

        for (id, state) in jobs.iter() {
            for dependency in &state.needs {
                if !jobs.contains_key(dependency) {
                    return Err(
                        ProbeError::configuration("scheduler.validate", "job depends on an unknown job")
                            .with_context("job", id.clone())
                            .with_context("needs", dependency.clone()),
                    );
                }
            }
        }

        // Kahn's algorithm; anything left with a positive in-degree sits on
        // a cycle.
        let mut in_degrees: HashMap<&str, usize> = jobs.keys().map(|id| (id.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (id, state) in jobs.iter() {
            let mut seen = HashSet::new();
            for dependency in &state.needs {
                if seen.insert(dependency.as_str()) {
                    *in_degrees.get_mut(id.as_str()).expect("in-degree entry exists") += 1;
                    dependents.entry(dependency.as_str()).or_default().push(id.as_str());
                }
            }
        }

        let mut queue: VecDeque<&str> = in_degrees
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            if let Some(children) = dependents.get(id) {
                for child in children {
                    let degree = in_degrees.get_mut(child).expect("dependent exists");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        if visited != jobs.len() {
            let mut remaining: Vec<String> = in_degrees
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            remaining.sort();
            return Err(
                ProbeError::configuration("scheduler.validate", "cycle detected in job dependencies")
                    .with_context("jobs", remaining.join(", ")),
            );
        }

        Ok(())
    }

    /// True when the job is pending and every dependency has fully
    /// completed with success.
    pub fn can_run_job(&self, id: &str) -> bool {
        let jobs = self.jobs.lock().expect("scheduler lock poisoned");
        can_run(&jobs, id)
    }

    /// Identifiers of every currently runnable job, in declaration order.
    pub fn get_runnable_jobs(&self) -> Vec<String> {
        let jobs = self.jobs.lock().expect("scheduler lock poisoned");
        jobs.keys().filter(|id| can_run(&jobs, id)).cloned().collect()
    }

    /// Atomic status transition; `success` is recorded on completion.
    pub fn set_job_status(&self, id: &str, status: JobStatus, success: bool) {
        let mut jobs = self.jobs.lock().expect("scheduler lock poisoned");
        if let Some(state) = jobs.get_mut(id) {
            state.status = status;
            if status == JobStatus::Completed {
                state.success = success;
            }
            if status == JobStatus::Failed {
                state.success = false;
            }
        }
    }

    /// Complete a job with its full execution count in one step.
    ///
    /// Used when a job short-circuits (skipif) and must not be re-queued by
    /// its repeat settings.
    pub fn mark_fully_completed(&self, id: &str, success: bool) {
        let mut jobs = self.jobs.lock().expect("scheduler lock poisoned");
        if let Some(state) = jobs.get_mut(id) {
            state.status = JobStatus::Completed;
            state.success = success;
            state.counter = state.target;
        }
    }

    pub fn increment_repeat_counter(&self, id: &str) {
        let mut jobs = self.jobs.lock().expect("scheduler lock poisoned");
        if let Some(state) = jobs.get_mut(id) {
            state.counter += 1;
        }
    }

    /// True while the job's execution counter has not reached its target.
    pub fn should_repeat_job(&self, id: &str) -> bool {
        let jobs = self.jobs.lock().expect("scheduler lock poisoned");
        jobs.get(id).map(|state| state.counter < state.target).unwrap_or(false)
    }

    /// `(completed_executions, target_executions)` for the job.
    pub fn get_repeat_info(&self, id: &str) -> (u32, u32) {
        let jobs = self.jobs.lock().expect("scheduler lock poisoned");
        jobs.get(id).map(|state| (state.counter, state.target)).unwrap_or((0, 0))
    }

    /// Fail every pending job whose dependency chain contains a failure.
    ///
    /// Resolves the whole transitive closure in one call and returns the
    /// newly failed identifiers in declaration order.
    pub fn mark_jobs_with_failed_dependencies(&self) -> Vec<String> {
        let mut jobs = self.jobs.lock().expect("scheduler lock poisoned");
        let mut newly_failed = Vec::new();

        loop {
            let mut changed = false;
            let failed: HashSet<String> = jobs
                .iter()
                .filter(|(_, state)| {
                    state.status == JobStatus::Failed || (state.status == JobStatus::Completed && !state.success)
                })
                .map(|(id, _)| id.clone())
                .collect();

            for (id, state) in jobs.iter_mut() {
                if state.status == JobStatus::Pending && state.needs.iter().any(|dependency| failed.contains(dependency)) {
                    state.status = JobStatus::Failed;
                    state.success = false;
                    newly_failed.push(id.clone());
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        newly_failed
    }

    /// True when every job is terminal: fully completed or failed.
    pub fn all_jobs_completed(&self) -> bool {
        let jobs = self.jobs.lock().expect("scheduler lock poisoned");
        jobs.values().all(JobState::terminal)
    }

    /// Current status of a job, if registered.
    pub fn job_status(&self, id: &str) -> Option<(JobStatus, bool)> {
        let jobs = self.jobs.lock().expect("scheduler lock poisoned");
        jobs.get(id).map(|state| (state.status, state.success))
    }
}

fn can_run(jobs: &IndexMap<String, JobState>, id: &str) -> bool {
    let Some(state) = jobs.get(id) else {
        return false;
    };
    if state.status != JobStatus::Pending {
        return false;
    }
    state.needs.iter().all(|dependency| {
        jobs.get(dependency)
            .map(|dep| dep.fully_completed() && dep.success)
            .unwrap_or(false)
    })
}

fn slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}
