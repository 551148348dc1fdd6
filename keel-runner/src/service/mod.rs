//! Service layer
//!
//! Business logic of the runner: planning a sandbox, running it and
//! shipping its output.

pub mod execution;
pub mod log_buffer;
pub mod plan;
pub mod sandbox;

pub use execution::ExecutionService;
pub use sandbox::{DockerSandbox, Sandbox};
