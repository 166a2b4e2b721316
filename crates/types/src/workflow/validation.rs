//! Identifier and bounds validation shared across workflow consumers.
//!
//! These routines cover the purely structural rules: identifier charsets,
//! uniqueness, the `outputs`-requires-`id` rule, and the environment-tunable
//! upper bounds on repetition. Dependency resolution and cycle detection are
//! the scheduler's concern and live in the engine.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Job, Step, Workflow};

/// Default ceiling for `repeat.count` and `retry.max_attempts`.
pub const DEFAULT_MAX_REPETITION: u32 = 10_000;

static STEP_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_-]+$").expect("valid step id pattern"));

/// True when `id` satisfies the step identifier charset `[a-z0-9_-]+`.
pub fn step_id_is_valid(id: &str) -> bool {
    STEP_ID_PATTERN.is_match(id)
}

/// Upper bound for `repeat.count`, overridable via `PROBE_MAX_REPEAT_COUNT`.
pub fn max_repeat_count() -> u32 {
    env_bound("PROBE_MAX_REPEAT_COUNT")
}

/// Upper bound for `retry.max_attempts`, overridable via `PROBE_MAX_ATTEMPTS`.
pub fn max_retry_attempts() -> u32 {
    env_bound("PROBE_MAX_ATTEMPTS")
}

fn env_bound(name: &str) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(DEFAULT_MAX_REPETITION)
}

/// Assign generated identifiers (`job_<index>`) to jobs that declare none.
///
/// Must run before [`validate_workflow`] and before scheduling: `needs`
/// resolution and the report are keyed by these identifiers.
pub fn assign_job_ids(workflow: &mut Workflow) {
    for (index, job) in workflow.jobs.iter_mut().enumerate() {
        if job.id.is_empty() {
            job.id = format!("job_{index}");
        }
    }
}

/// Validate identifiers and bounds across the whole workflow.
///
/// Checks, in order:
/// - job identifiers are unique;
/// - step identifiers, where present, match `[a-z0-9_-]+` and are unique
///   across the workflow (outputs aliases are workflow-global);
/// - every step with a non-empty `outputs` mapping declares an `id`;
/// - `repeat.count` and `retry.max_attempts` stay under their bounds.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), String> {
    let mut job_ids = HashSet::new();
    let mut step_ids = HashSet::new();

    for job in &workflow.jobs {
        if !job_ids.insert(job.id.as_str()) {
            return Err(format!("duplicate job id '{}'", job.id));
        }
        validate_job_repeat(job)?;
        for step in &job.steps {
            validate_step(job, step)?;
            if !step.id.is_empty() && !step_ids.insert(step.id.as_str()) {
                return Err(format!("duplicate step id '{}' in job '{}'", step.id, job.id));
            }
        }
    }

    Ok(())
}

fn validate_job_repeat(job: &Job) -> Result<(), String> {
    let Some(repeat) = &job.repeat else {
        return Ok(());
    };
    let bound = max_repeat_count();
    if repeat.count > bound {
        return Err(format!(
            "job '{}' repeat count {} exceeds the maximum of {}",
            job.id, repeat.count, bound
        ));
    }
    Ok(())
}

fn validate_step(job: &Job, step: &Step) -> Result<(), String> {
    if !step.id.is_empty() && !step_id_is_valid(&step.id) {
        return Err(format!(
            "step id '{}' in job '{}' contains invalid characters (allowed: a-z, 0-9, _, -)",
            step.id, job.id
        ));
    }

    if step.outputs.as_ref().is_some_and(|outputs| !outputs.is_empty()) && step.id.is_empty() {
        return Err(format!(
            "a step in job '{}' declares outputs but has no id; outputs require a step id",
            job.id
        ));
    }

    if let Some(retry) = &step.retry {
        let bound = max_retry_attempts();
        if retry.max_attempts > bound {
            return Err(format!(
                "step '{}' in job '{}' retry max_attempts {} exceeds the maximum of {}",
                step.id, job.id, retry.max_attempts, bound
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Repeat, Retry};
    use serde_json::json;

    fn workflow_with_step(step: Step) -> Workflow {
        Workflow {
            name: "w".into(),
            jobs: vec![Job {
                name: "j".into(),
                id: "j".into(),
                steps: vec![step],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn step_id_charset() {
        assert!(step_id_is_valid("auth_token-1"));
        assert!(!step_id_is_valid("Auth"));
        assert!(!step_id_is_valid("a b"));
        assert!(!step_id_is_valid(""));
    }

    #[test]
    fn assign_job_ids_fills_empty_ids_only() {
        let mut workflow = Workflow {
            name: "w".into(),
            jobs: vec![
                Job {
                    name: "a".into(),
                    ..Default::default()
                },
                Job {
                    name: "b".into(),
                    id: "custom".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        assign_job_ids(&mut workflow);

        assert_eq!(workflow.jobs[0].id, "job_0");
        assert_eq!(workflow.jobs[1].id, "custom");
    }

    #[test]
    fn outputs_without_id_is_rejected() {
        let mut outputs = indexmap::IndexMap::new();
        outputs.insert("token".to_string(), json!("{res.body.token}"));
        let workflow = workflow_with_step(Step {
            uses: "http".into(),
            outputs: Some(outputs),
            ..Default::default()
        });

        let error = validate_workflow(&workflow).expect_err("should reject");
        assert!(error.contains("outputs require a step id"), "unexpected error: {error}");
    }

    #[test]
    fn duplicate_step_ids_across_jobs_are_rejected() {
        let step = Step {
            id: "dup".into(),
            uses: "hello".into(),
            ..Default::default()
        };
        let workflow = Workflow {
            name: "w".into(),
            jobs: vec![
                Job {
                    name: "a".into(),
                    id: "a".into(),
                    steps: vec![step.clone()],
                    ..Default::default()
                },
                Job {
                    name: "b".into(),
                    id: "b".into(),
                    steps: vec![step],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        assert!(validate_workflow(&workflow).is_err());
    }

    #[test]
    fn repeat_and_retry_bounds_are_enforced() {
        let workflow = workflow_with_step(Step {
            uses: "hello".into(),
            retry: Some(Retry {
                max_attempts: DEFAULT_MAX_REPETITION + 1,
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(validate_workflow(&workflow).is_err());

        let mut workflow = workflow_with_step(Step {
            uses: "hello".into(),
            ..Default::default()
        });
        workflow.jobs[0].repeat = Some(Repeat {
            count: DEFAULT_MAX_REPETITION + 1,
            interval: None,
        });
        assert!(validate_workflow(&workflow).is_err());
    }
}
