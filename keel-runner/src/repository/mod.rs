//! Repository layer
//!
//! Everything the runner needs from the orchestrator goes through the
//! [`ControlPlane`] trait, implemented over HTTP by `OrchestratorClient`.
//! Tests substitute an in-process fake.

mod control_plane;

pub use control_plane::ControlPlane;
