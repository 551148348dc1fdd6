//! Keel Core
//!
//! Core types and abstractions for the Keel CI/CD system.
//!
//! This crate contains:
//! - Domain types: Core business entities (Run, Job, Runner, etc.)
//! - Definition: Pipeline YAML parsing and resolution into ordered steps
//! - Deploy: Deployment driver selection and command tokens
//! - DTOs: Data transfer objects for inter-service communication

pub mod definition;
pub mod deploy;
pub mod domain;
pub mod dto;
