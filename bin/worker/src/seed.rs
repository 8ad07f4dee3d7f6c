//! Loading jobs from a JSON file at startup.

use crate::error::StartupError;
use mixtape_coordinator::{JobService, WorkflowJob};
use rootcause::prelude::Report;
use std::path::Path;
use tracing::{info, warn};

/// Outcome of seeding the job store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub saved: usize,
    /// Jobs that failed validation or scheduling; each is logged.
    pub rejected: usize,
}

/// Parses a JSON array of jobs.
///
/// # Errors
///
/// Returns `StartupError::JobsFileMalformed` if the text is not an array of
/// job records.
pub fn parse_jobs(path: &Path, text: &str) -> Result<Vec<WorkflowJob>, Report<StartupError>> {
    Ok(serde_json::from_str(text).map_err(|e| StartupError::JobsFileMalformed {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?)
}

/// Saves every job from `path` through the job service.
///
/// Jobs are validated exactly as interactive saves are; a rejected job is
/// logged and skipped.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub async fn seed_jobs(
    service: &JobService,
    path: &Path,
) -> Result<SeedSummary, Report<StartupError>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| StartupError::JobsFileUnreadable {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
    let jobs = parse_jobs(path, &text)?;
    Ok(save_all(service, jobs).await)
}

async fn save_all(service: &JobService, jobs: Vec<WorkflowJob>) -> SeedSummary {
    let mut summary = SeedSummary::default();
    for job in jobs {
        let id = job.id;
        match service.save(job.user_id, job.workflow, job.cron).await {
            Ok(_) => summary.saved += 1,
            Err(e) => {
                warn!(workflow_id = %id, error = %e, "skipping job from jobs file");
                summary.rejected += 1;
            }
        }
    }
    info!(saved = summary.saved, rejected = summary.rejected, "jobs file loaded");
    summary
}
