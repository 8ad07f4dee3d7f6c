//! Error types for the scheduler crate.

use std::fmt;

/// Errors from schedule parsing and evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    InvalidCronExpression { expression: String, reason: String },
    /// The expression is valid but never fires after the given time.
    NoUpcomingRun { expression: String },
}

impl ScheduleError {
    pub(crate) fn invalid(expression: &str, reason: impl Into<String>) -> Self {
        Self::InvalidCronExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::NoUpcomingRun { expression } => {
                write!(f, "cron expression '{expression}' has no upcoming run")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}
