//! # Probe Engine
//!
//! The workflow execution engine: it loads declarative YAML workflows,
//! orders jobs by their dependencies, runs their steps concurrently with
//! iteration/retry/repeat semantics, feeds data between steps through the
//! expression evaluator and the outputs store, and serialises everything
//! into a deterministic final report.
//!
//! ## Architecture
//!
//! - **`expr`**: the `{…}` template and expression evaluator, wrapped in a
//!   security layer (banlist, env projection, length and time limits)
//! - **`outputs`**: dual-view store for named step outputs
//! - **`step`** / **`job`**: per-step and per-job executors
//! - **`scheduler`**: DAG state, readiness, and failure cascade
//! - **`workflow`**: the runner driving workers over a completion channel
//! - **`buffer`** / **`printer`**: ordered, buffered reporting
//! - **`loader`**: YAML file discovery and decoding
//! - **`action`**: the capability the engine invokes actions through
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use probe_engine::{loader, workflow::WorkflowRun, context::RunConfig, action::MockRunner};
//!
//! # async fn run() -> Result<(), probe_engine::error::ProbeError> {
//! let (spec, base_dir) = loader::load_workflow(&[PathBuf::from("workflow.yml")])?;
//! let mut run = WorkflowRun::new(spec, base_dir);
//! let summary = run.start(RunConfig::default(), Arc::new(MockRunner::new())).await?;
//! std::process::exit(summary.exit_status);
//! # }
//! ```

pub mod action;
pub mod buffer;
pub mod context;
pub mod error;
pub mod expr;
pub mod job;
pub mod loader;
pub mod outputs;
pub mod printer;
pub mod report;
pub mod scheduler;
pub mod step;
pub mod workflow;

pub use action::{ActionRunner, MockRunner};
pub use context::{JobContext, RunConfig};
pub use error::{ErrorKind, ProbeError};
pub use expr::{Evaluator, SecurityMode};
pub use loader::{load_workflow, load_workflow_str};
pub use outputs::Outputs;
pub use workflow::{RunSummary, WorkflowRun};
