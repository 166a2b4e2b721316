//! # Probe Types
//!
//! Strongly typed workflow schema definitions shared across the loader, the
//! execution engine, and the CLI. The models here mirror the YAML authoring
//! surface: a workflow owns an ordered sequence of jobs, each job owns an
//! ordered sequence of steps, and steps carry the optional knobs that the
//! executor interprets (`test`, `wait`, `iter`, `retry`, `outputs`).
//!
//! Declaration order is preserved everywhere it is observable (`vars`,
//! `with`, `outputs`, iteration maps) via [`indexmap::IndexMap`].

pub mod workflow;

pub use workflow::{
    Job, Repeat, Retry, Step, WaitSpec, Workflow, validation,
};
