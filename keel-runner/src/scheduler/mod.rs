//! Scheduler
//!
//! The agent loop: heartbeat, claim, execute, sleep.

mod agent;

pub use agent::Agent;
