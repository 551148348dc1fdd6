//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between the store and the log files and contain domain logic.

pub mod job;
pub mod lease;
pub mod log;
pub mod project;
pub mod run;
pub mod runner;

// Re-export for convenience
pub use job as job_service;
pub use log as log_service;
pub use project as project_service;
pub use run as run_service;
pub use runner as runner_service;
