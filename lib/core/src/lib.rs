//! Core domain types and utilities for mixtape.
//!
//! This crate provides the foundational id types and the error handling
//! alias shared by every other mixtape crate.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, SystemStatusId, UserId, WorkerId, WorkflowId, WorkflowRunId};
