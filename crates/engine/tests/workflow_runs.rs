//! End-to-end workflow runs against a scripted action runner.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map as JsonMap, Value, json};

use probe_engine::action::MockRunner;
use probe_engine::context::RunConfig;
use probe_engine::error::ProbeError;
use probe_engine::loader;
use probe_engine::report::JobOutcome;
use probe_engine::workflow::WorkflowRun;

fn ok_result() -> JsonMap<String, Value> {
    json!({"code": 0}).as_object().expect("object").clone()
}

async fn run_yaml(yaml: &str, runner: MockRunner) -> probe_engine::workflow::RunSummary {
    let spec = loader::load_workflow_str(yaml).expect("load workflow");
    let mut run = WorkflowRun::new(spec, std::env::temp_dir());
    run.start(RunConfig::default(), Arc::new(runner)).await.expect("run")
}

#[tokio::test]
async fn diamond_runs_all_jobs_in_dependency_order() {
    let yaml = r#"
name: diamond
jobs:
  - name: build
    id: build
    steps: [{uses: hello, test: "res.code == 0"}]
  - name: lint
    id: lint
    needs: [build]
    steps: [{uses: hello, test: "res.code == 0"}]
  - name: test
    id: test
    needs: [build]
    steps: [{uses: hello, test: "res.code == 0"}]
  - name: deploy
    id: deploy
    needs: [lint, test]
    steps: [{uses: hello, test: "res.code == 0"}]
"#;

    let summary = run_yaml(yaml, MockRunner::fixed(ok_result())).await;

    assert_eq!(summary.exit_status, 0);
    assert_eq!(summary.results.len(), 4);
    for result in &summary.results {
        assert_eq!(result.status, JobOutcome::Success, "job {} did not succeed", result.id);
    }

    // deploy starts only after both lint and test have ended.
    let find = |id: &str| summary.results.iter().find(|r| r.id == id).expect("job result");
    let deploy_start = find("deploy").started_at.expect("deploy start");
    for upstream in ["lint", "test"] {
        let upstream_end = find(upstream).ended_at.expect("end");
        assert!(
            deploy_start >= upstream_end,
            "deploy started before {upstream} finished"
        );
    }

    // Report prints in declared order regardless of completion order.
    let positions: Vec<usize> = ["build", "lint", "test", "deploy"]
        .iter()
        .map(|name| summary.report.find(&format!("⏺ {name}")).expect("header"))
        .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "report:\n{}", summary.report);
    assert!(summary.report.contains("All jobs succeeded"));
}

#[tokio::test]
async fn failure_cascade_skips_dependents_and_sets_exit_one() {
    let yaml = r#"
name: cascade
jobs:
  - name: a
    id: a
    steps: [{uses: hello, test: "res.code == 0"}]
  - name: b
    id: b
    needs: [a]
    steps: [{uses: hello, test: "false"}]
  - name: c
    id: c
    needs: [b]
    steps: [{uses: hello}]
"#;

    let summary = run_yaml(yaml, MockRunner::fixed(ok_result())).await;

    assert_eq!(summary.exit_status, 1);
    let find = |id: &str| summary.results.iter().find(|r| r.id == id).expect("job result");
    assert_eq!(find("a").status, JobOutcome::Success);
    assert_eq!(find("b").status, JobOutcome::Failed);
    assert_eq!(find("c").status, JobOutcome::Failed);
    assert!(
        find("c").error.as_deref().is_some_and(|e| e.contains("failed dependency")),
        "c should be skipped due to failed dependency"
    );
    // b failed and c counts as failed too.
    assert!(summary.report.contains("2 job(s) failed"), "report:\n{}", summary.report);
    assert!(summary.report.contains("Skipped due to failed dependency"));
}

#[tokio::test]
async fn repeat_runs_the_job_count_times_with_interval_spacing() {
    let yaml = r#"
name: repeated
jobs:
  - name: ping
    id: ping
    repeat:
      count: 3
      interval: 50ms
    steps:
      - name: ping
        uses: hello
        test: "res.code == 0"
"#;

    let summary = run_yaml(yaml, MockRunner::fixed(ok_result())).await;

    assert_eq!(summary.exit_status, 0);
    let ping = summary.results.iter().find(|r| r.id == "ping").expect("result");
    assert_eq!(ping.steps.len(), 3, "step should have run three times");
    assert!(
        summary.report.contains("ping: 3/3 success (100.0%)"),
        "final repeat line missing:\n{}",
        summary.report
    );
    // Three starts spaced at least 50ms apart span at least 100ms.
    assert!(
        summary.total >= Duration::from_millis(100),
        "total {:?} shorter than two intervals",
        summary.total
    );
}

#[tokio::test]
async fn failed_repeat_iteration_stops_repeating_and_cascades() {
    let yaml = r#"
name: flaky-repeat
jobs:
  - name: ping
    id: ping
    repeat:
      count: 5
      interval: 1ms
    steps:
      - uses: ping
        test: "res.code == 0"
  - name: after
    id: after
    needs: [ping]
    steps: [{uses: hello}]
"#;

    let calls = Arc::new(Mutex::new(0u32));
    let calls_in_runner = Arc::clone(&calls);
    let runner = MockRunner::with_handler(move |_, _| {
        let mut count = calls_in_runner.lock().expect("lock");
        *count += 1;
        let code = if *count >= 2 { 1 } else { 0 };
        Ok(json!({"code": code}).as_object().expect("object").clone())
    });

    let summary = run_yaml(yaml, runner).await;

    assert_eq!(summary.exit_status, 1);
    // The second iteration failed; no further iterations ran.
    assert_eq!(*calls.lock().expect("lock"), 2);
    let find = |id: &str| summary.results.iter().find(|r| r.id == id).expect("result");
    assert_eq!(find("ping").status, JobOutcome::Failed);
    assert_eq!(find("after").status, JobOutcome::Failed);
    assert!(summary.report.contains("2 job(s) failed"), "report:\n{}", summary.report);
}

#[tokio::test]
async fn outputs_flow_between_jobs_through_both_views() {
    let yaml = r#"
name: outputs
jobs:
  - name: auth
    id: auth_job
    steps:
      - id: auth
        uses: login
        outputs:
          token: "{res.body.token}"
  - name: call
    id: call
    needs: [auth_job]
    steps:
      - uses: api
        with:
          header: "Bearer {outputs.auth.token}"
          flat: "Bearer {outputs.token}"
        test: "res.code == 0"
"#;

    let captured: Arc<Mutex<JsonMap<String, Value>>> = Arc::new(Mutex::new(JsonMap::new()));
    let captured_in_runner = Arc::clone(&captured);
    let runner = MockRunner::with_handler(move |name, with| {
        if name == "login" {
            Ok(json!({"code": 0, "body": {"token": "tok-123"}})
                .as_object()
                .expect("object")
                .clone())
        } else {
            *captured_in_runner.lock().expect("lock") = with.clone();
            Ok(json!({"code": 0}).as_object().expect("object").clone())
        }
    });

    let summary = run_yaml(yaml, runner).await;

    assert_eq!(summary.exit_status, 0);
    let with = captured.lock().expect("lock").clone();
    assert_eq!(with["header"], "Bearer tok-123");
    assert_eq!(with["flat"], "Bearer tok-123");
}

#[tokio::test]
async fn embedded_steps_run_inline() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("sub.yml"),
        "name: sub\nsteps:\n  - uses: first\n  - uses: second\n",
    )
    .expect("write sub job");
    std::fs::write(
        dir.path().join("main.yml"),
        "name: embedded\njobs:\n  - name: host\n    id: host\n    steps:\n      - uses: embedded\n        with:\n          path: ./sub.yml\n",
    )
    .expect("write workflow");

    let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let calls_in_runner = Arc::clone(&calls);
    let runner = MockRunner::with_handler(move |name, _| {
        calls_in_runner.lock().expect("lock").push(name.to_string());
        Ok(json!({"code": 0}).as_object().expect("object").clone())
    });

    let (spec, base_dir) = loader::load_workflow(&[dir.path().join("main.yml")]).expect("load");
    let mut run = WorkflowRun::new(spec, base_dir);
    let summary = run.start(RunConfig::default(), Arc::new(runner)).await.expect("run");

    assert_eq!(summary.exit_status, 0);
    let seen = calls.lock().expect("lock").clone();
    assert_eq!(seen, vec!["first", "second"], "embedded steps should run in order");
}

#[tokio::test]
async fn sensitive_env_access_fails_the_step_and_the_run() {
    let yaml = r#"
name: secure
jobs:
  - name: leak
    id: leak
    steps:
      - uses: hello
        with:
          q: "{env.SECRET}"
"#;

    let spec = loader::load_workflow_str(yaml).expect("load");
    let mut env = JsonMap::new();
    env.insert("SECRET".to_string(), json!("hunter2"));
    let mut run = WorkflowRun::new(spec, std::env::temp_dir()).with_env(env);
    let summary = run
        .start(RunConfig::default(), Arc::new(MockRunner::fixed(ok_result())))
        .await
        .expect("run");

    assert_eq!(summary.exit_status, 1);
    assert!(
        summary.report.to_lowercase().contains("security"),
        "report should surface the security violation:\n{}",
        summary.report
    );
    assert!(!summary.report.contains("hunter2"), "secret value must never surface");
}

#[tokio::test]
async fn empty_workflow_reports_success() {
    let summary = run_yaml("name: empty\njobs: []\n", MockRunner::new()).await;
    assert_eq!(summary.exit_status, 0);
    assert!(summary.report.contains("All jobs succeeded"));
}

#[tokio::test]
async fn dependency_cycle_aborts_before_any_job_runs() {
    let yaml = r#"
name: cyclic
jobs:
  - name: a
    id: a
    needs: [b]
    steps: [{uses: hello}]
  - name: b
    id: b
    needs: [a]
    steps: [{uses: hello}]
"#;

    let calls = Arc::new(Mutex::new(0usize));
    let calls_in_runner = Arc::clone(&calls);
    let runner = MockRunner::with_handler(move |_, _| {
        *calls_in_runner.lock().expect("lock") += 1;
        Ok(json!({"code": 0}).as_object().expect("object").clone())
    });

    let spec = loader::load_workflow_str(yaml).expect("load");
    let mut run = WorkflowRun::new(spec, std::env::temp_dir());
    let error: ProbeError = run
        .start(RunConfig::default(), Arc::new(runner))
        .await
        .expect_err("cycle must abort the run");

    assert!(error.to_string().contains("cycle"), "unexpected error: {error}");
    assert_eq!(run.exit_status(), 1);
    assert_eq!(*calls.lock().expect("lock"), 0, "no action may run");
}

#[tokio::test]
async fn skipif_job_counts_as_success_for_exit_status() {
    let yaml = r#"
name: skipping
vars:
  mode: fast
jobs:
  - name: optional
    id: optional
    skipif: "vars.mode == \"fast\""
    steps: [{uses: hello, test: "false"}]
  - name: rest
    id: rest
    steps: [{uses: hello, test: "res.code == 0"}]
"#;

    let summary = run_yaml(yaml, MockRunner::fixed(ok_result())).await;

    assert_eq!(summary.exit_status, 0);
    let optional = summary.results.iter().find(|r| r.id == "optional").expect("result");
    assert_eq!(optional.status, JobOutcome::Skipped);
    assert!(optional.success);
    assert!(summary.report.contains("Skipped"), "report:\n{}", summary.report);
}

#[tokio::test]
async fn vars_render_from_the_env_snapshot_with_nil_for_missing() {
    let yaml = r#"
name: vars
vars:
  host: "{env.PROBE_TEST_HOST}"
  missing: "{env.PROBE_TEST_ABSENT}"
jobs:
  - name: use
    id: use
    steps:
      - uses: api
        with:
          url: "https://{vars.host}/x"
          other: "{vars.missing}"
"#;

    let captured: Arc<Mutex<JsonMap<String, Value>>> = Arc::new(Mutex::new(JsonMap::new()));
    let captured_in_runner = Arc::clone(&captured);
    let runner = MockRunner::with_handler(move |_, with| {
        *captured_in_runner.lock().expect("lock") = with.clone();
        Ok(json!({"code": 0}).as_object().expect("object").clone())
    });

    let spec = loader::load_workflow_str(yaml).expect("load");
    let mut env = JsonMap::new();
    env.insert("PROBE_TEST_HOST".to_string(), json!("example.com"));
    let mut run = WorkflowRun::new(spec, std::env::temp_dir()).with_env(env);
    let summary = run.start(RunConfig::default(), Arc::new(runner)).await.expect("run");

    assert_eq!(summary.exit_status, 0);
    let with = captured.lock().expect("lock").clone();
    assert_eq!(with["url"], "https://example.com/x");
    assert_eq!(with["other"], "<nil>");
}
