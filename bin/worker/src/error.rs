//! Error types for worker startup.

use std::fmt;
use std::path::PathBuf;

/// Failures that prevent the worker from starting.
#[derive(Debug)]
pub enum StartupError {
    /// The HTTP client could not be built.
    HttpClient { details: String },
    /// The jobs file could not be read.
    JobsFileUnreadable { path: PathBuf, details: String },
    /// The jobs file is not a JSON array of jobs.
    JobsFileMalformed { path: PathBuf, details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpClient { details } => write!(f, "failed to build HTTP client: {}", details),
            Self::JobsFileUnreadable { path, details } => {
                write!(f, "failed to read jobs file '{}': {}", path.display(), details)
            }
            Self::JobsFileMalformed { path, details } => {
                write!(f, "jobs file '{}' is malformed: {}", path.display(), details)
            }
        }
    }
}

impl std::error::Error for StartupError {}
