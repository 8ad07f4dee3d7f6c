//! Scheduler for recurring workflow jobs.
//!
//! This crate provides:
//!
//! - **Cron Schedules**: parsing, next-run computation and display classification
//! - **Scheduler**: absolute next-run tracking that emits each due job once

pub mod error;
pub mod schedule;
pub mod scheduler;

pub use error::ScheduleError;
pub use schedule::{CronExpression, CronSchedule, DisplaySchedule, Interval, UNSET};
pub use scheduler::{DueJob, Scheduler};
