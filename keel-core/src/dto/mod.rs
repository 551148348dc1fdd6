//! Data Transfer Objects for inter-service communication
//!
//! This module contains DTOs used for communication between Keel services
//! (orchestrator, runner, CLI). All of them use camelCase on the wire.

pub mod job;
pub mod project;
pub mod run;
pub mod runner;
