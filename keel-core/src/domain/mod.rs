//! Core domain types
//!
//! This module contains the core domain structures used across Keel services.
//! These types are shared between the orchestrator (for persistence) and the
//! runner (for execution).

pub mod job;
pub mod pipeline;
pub mod project;
pub mod run;
pub mod runner;
pub mod status;

pub use job::{Job, JobKind, NewJob};
pub use pipeline::Pipeline;
pub use project::{ExecutionConfig, Project, RunMode};
pub use run::Run;
pub use runner::{Runner, RunnerStatus};
pub use status::{Status, aggregate};
