//! Background loops of the worker process.

use chrono::{DateTime, Utc};
use mixtape_coordinator::{Coordinator, StatusService};
use mixtape_scheduler::{DueJob, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sends every job due at `now` to the pool.
///
/// Returns the number sent, or `None` once the pool has stopped receiving.
pub async fn dispatch_due(
    scheduler: &Scheduler,
    jobs: &mpsc::Sender<DueJob>,
    now: DateTime<Utc>,
) -> Option<usize> {
    let due = scheduler.due(now);
    let count = due.len();
    for job in due {
        if jobs.send(job).await.is_err() {
            return None;
        }
    }
    Some(count)
}

/// Checks for due jobs every `tick` until the pool closes its channel.
pub async fn scheduler_loop(scheduler: Arc<Scheduler>, jobs: mpsc::Sender<DueJob>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        match dispatch_due(&scheduler, &jobs, Utc::now()).await {
            Some(0) => {}
            Some(count) => debug!(count, "dispatched due jobs"),
            None => {
                info!("worker pool stopped; scheduler loop exiting");
                break;
            }
        }
    }
}

/// Sweeps stale workers, retries unwritten run statuses and records a
/// status snapshot every `every`.
pub async fn status_loop(status: StatusService, coordinator: Arc<Coordinator>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = coordinator.sweep_stale_workers(Utc::now()).await {
            warn!(error = %e, "failed to sweep stale workers");
        }
        let unrecorded = coordinator.retry_unrecorded_runs().await;
        if unrecorded > 0 {
            warn!(unrecorded, "run statuses still waiting to be written");
        }
        match status.record_snapshot().await {
            Ok(snapshot) => debug!(
                workers = snapshot.workers_total,
                busy = snapshot.workers_busy,
                running = snapshot.runs_running,
                healthy = snapshot.healthy,
                "status snapshot"
            ),
            Err(e) => warn!(error = %e, "failed to record status snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mixtape_core::WorkflowId;
    use mixtape_scheduler::CronSchedule;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, h, m, 0).single().expect("time")
    }

    #[tokio::test]
    async fn due_jobs_are_sent_once() {
        let scheduler = Scheduler::new();
        let id = WorkflowId::new();
        let hourly = CronSchedule::parse(Some("0 * * * *")).expect("cron");
        scheduler.upsert(id, hourly, at(9, 10));

        let (tx, mut rx) = mpsc::channel(4);
        assert_eq!(dispatch_due(&scheduler, &tx, at(9, 30)).await, Some(0));
        assert_eq!(dispatch_due(&scheduler, &tx, at(10, 0)).await, Some(1));
        assert_eq!(dispatch_due(&scheduler, &tx, at(10, 0)).await, Some(0));

        let job = rx.recv().await.expect("job");
        assert_eq!(job.workflow_id, id);
        assert_eq!(job.scheduled_for, at(10, 0));
    }

    #[tokio::test]
    async fn closed_pool_stops_dispatch() {
        let scheduler = Scheduler::new();
        let every_minute = CronSchedule::parse(Some("* * * * *")).expect("cron");
        scheduler.upsert(WorkflowId::new(), every_minute, at(9, 0));

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert_eq!(dispatch_due(&scheduler, &tx, at(9, 5)).await, None);
    }

    #[tokio::test]
    async fn scheduler_loop_exits_when_pool_stops() {
        let scheduler = Arc::new(Scheduler::new());
        let every_minute = CronSchedule::parse(Some("* * * * *")).expect("cron");
        // Anchored in the past so the job is due on the first tick.
        scheduler.upsert(WorkflowId::new(), every_minute, Utc::now() - chrono::Duration::hours(1));

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        tokio::time::timeout(
            Duration::from_secs(5),
            scheduler_loop(scheduler, tx, Duration::from_millis(10)),
        )
        .await
        .expect("loop exits");
    }
}
