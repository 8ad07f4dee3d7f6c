//! The mixtape worker process.
//!
//! Wires the HTTP content API, in-memory stores, scheduler and worker pool
//! together; `main` only loads configuration and starts the loops.

pub mod config;
pub mod error;
pub mod http;
pub mod runtime;
pub mod seed;
