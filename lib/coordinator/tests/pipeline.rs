//! End-to-end job lifecycle: save, schedule, claim, run, history.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use mixtape_coordinator::{
    Coordinator, CoordinatorError, DeleteOutcome, InMemoryBackend, InMemoryCredentials, JobError,
    JobService, RunStore, WorkerRegistry,
};
use mixtape_core::{UserId, WorkerId};
use mixtape_scheduler::Scheduler;
use mixtape_workflow::{
    Collection, ContentApi, ContentError, Credentials, Engine, InMemoryContentApi, RunStatus,
    TimeRange, Track, Workflow, parse_error_pairs,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Harness {
    backend: InMemoryBackend,
    scheduler: Arc<Scheduler>,
    service: JobService,
    coordinator: Arc<Coordinator>,
    user: UserId,
}

fn harness(content: Arc<dyn ContentApi>) -> Harness {
    let backend = InMemoryBackend::new();
    let scheduler = Arc::new(Scheduler::new());
    let user = UserId::new();

    let service = JobService::new(backend.jobs.clone(), backend.runs.clone(), scheduler.clone());
    let credentials = InMemoryCredentials::new().with_user(user, Credentials::bearer("token"));
    let coordinator = Coordinator::new(
        Engine::new(content),
        backend.jobs.clone(),
        backend.runs.clone(),
        WorkerRegistry::new(backend.workers.clone()),
        Arc::new(credentials),
    )
    .with_prepared(service.prepared());

    Harness {
        backend,
        scheduler,
        service,
        coordinator: Arc::new(coordinator),
        user,
    }
}

fn tracks(prefix: &str, n: usize) -> Collection {
    (0..n)
        .map(|i| {
            Track::new(format!("{prefix}{i}"), format!("{prefix} track {i}")).with_popularity(50)
        })
        .collect()
}

fn mix_workflow() -> Workflow {
    Workflow::new("weekly mix")
        .with_source("a", "playlist", json!({"playlistId": "morning"}))
        .with_source("b", "top_tracks", json!({"timeRange": "medium", "limit": 10}))
        .with_operation("merged", "merge", json!({}), &["a", "b"])
        .with_operation("dedup", "deduplicate", json!({"by": "id"}), &["merged"])
        .with_operation("top", "limit", json!({"count": 4}), &["dedup"])
}

#[tokio::test]
async fn saved_job_fires_on_schedule_and_records_history() {
    let content = InMemoryContentApi::new()
        .with_playlist("morning", tracks("m", 3))
        .with_top_tracks(TimeRange::Medium, tracks("t", 3));
    let h = harness(Arc::new(content));

    let saved_at = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).single().expect("time");
    let job = h
        .service
        .save(h.user, mix_workflow(), Some("0 9 * * 1".into()))
        .await
        .expect("save");
    // Saving schedules relative to the wall clock; reschedule from a fixed point.
    h.scheduler
        .upsert(job.id, job.schedule().expect("schedule"), saved_at);

    assert!(h.scheduler.due(saved_at + Duration::minutes(30)).is_empty());
    let due = h.scheduler.due(saved_at + Duration::hours(1));
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].workflow_id, job.id);

    let completed = h
        .coordinator
        .execute_job(WorkerId::new(), due[0].workflow_id)
        .await
        .expect("run");
    let ids: Vec<&str> = completed.result.output.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["m0", "m1", "m2", "t0"]);

    let history = h.service.list_runs(h.user, job.id).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, RunStatus::Succeeded);
    assert!(history[0].completed_at.is_some());
    let returned = history[0].return_values.as_ref().expect("return values");
    assert_eq!(returned.as_array().map(Vec::len), Some(4));
}

#[tokio::test]
async fn partial_failure_is_recorded_and_reported_as_pairs() {
    let content = InMemoryContentApi::new()
        .with_playlist("morning", tracks("m", 2))
        .with_failure(
            "top:medium_term",
            ContentError::RateLimited {
                retry_after_secs: Some(30),
            },
        );
    let h = harness(Arc::new(content));
    let job = h.service.save(h.user, mix_workflow(), None).await.expect("save");

    let err = h
        .coordinator
        .execute_job(WorkerId::new(), job.id)
        .await
        .unwrap_err();
    let CoordinatorError::ExecutionFailed { error, .. } = err.current_context() else {
        panic!("expected execution failure, got {err}");
    };
    let pairs = parse_error_pairs(&error.message());
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].error_type, "Rate Limited");
    assert_eq!(pairs[0].operation["id"], "b");
    assert_eq!(error.report.skipped().len(), 3);

    let history = h.service.list_runs(h.user, job.id).await.expect("history");
    assert_eq!(history[0].status, RunStatus::Failed);
    assert!(history[0].return_values.is_none());
}

/// Blocks every playlist fetch until released.
struct GatedApi {
    calls: AtomicUsize,
    gate: tokio::sync::Notify,
}

#[async_trait]
impl ContentApi for GatedApi {
    async fn playlist_tracks(&self, _: &Credentials, id: &str) -> Result<Collection, ContentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(vec![Track::new(id, id)])
    }

    async fn saved_tracks(&self, _: &Credentials, _: usize) -> Result<Collection, ContentError> {
        Ok(Vec::new())
    }

    async fn top_tracks(
        &self,
        _: &Credentials,
        _: TimeRange,
        _: usize,
    ) -> Result<Collection, ContentError> {
        Ok(Vec::new())
    }

    async fn replace_playlist_tracks(
        &self,
        _: &Credentials,
        _: &str,
        _: &[String],
    ) -> Result<(), ContentError> {
        Ok(())
    }
}

#[tokio::test]
async fn concurrent_claims_run_the_job_once() {
    let api = Arc::new(GatedApi {
        calls: AtomicUsize::new(0),
        gate: tokio::sync::Notify::new(),
    });
    let h = harness(api.clone());
    let workflow = Workflow::new("copy").with_source("p", "playlist", json!({"playlistId": "pl"}));
    let job = h.service.save(h.user, workflow, None).await.expect("save");

    let first = WorkerId::new();
    let second = WorkerId::new();
    let coordinator = Arc::clone(&h.coordinator);
    let running = tokio::spawn(async move { coordinator.execute_job(first, job.id).await });

    // Wait until the first run is inside the content call, holding its claim.
    while api.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    let refused = h.coordinator.execute_job(second, job.id).await.unwrap_err();
    assert_eq!(
        refused.current_context(),
        &CoordinatorError::AlreadyClaimed {
            workflow_id: job.id,
            owner: first
        }
    );

    api.gate.notify_one();
    let completed = running.await.expect("join").expect("run");
    assert_eq!(completed.run.status, RunStatus::Succeeded);
    assert_eq!(api.calls.load(Ordering::SeqCst), 1);

    let history = h.service.list_runs(h.user, job.id).await.expect("history");
    assert_eq!(history.len(), 1);
    assert!(h.coordinator.claims().is_empty());
}

#[tokio::test]
async fn delete_cancels_schedule_and_is_safe_to_repeat() {
    let content = InMemoryContentApi::new().with_playlist("pl", tracks("p", 1));
    let h = harness(Arc::new(content));
    let workflow = Workflow::new("copy").with_source("p", "playlist", json!({"playlistId": "pl"}));
    let job = h
        .service
        .save(h.user, workflow, Some("* * * * *".into()))
        .await
        .expect("save");
    h.coordinator
        .execute_job(WorkerId::new(), job.id)
        .await
        .expect("run");

    let missing = mixtape_core::WorkflowId::new();
    assert_eq!(
        h.service.delete(h.user, missing).await.expect("delete"),
        DeleteOutcome::NotFound
    );
    assert_eq!(
        h.service.delete(h.user, job.id).await.expect("delete"),
        DeleteOutcome::Deleted
    );
    assert_eq!(
        h.service.delete(h.user, job.id).await.expect("delete"),
        DeleteOutcome::NotFound
    );

    assert!(h.scheduler.is_empty());
    assert!(h.scheduler.due(Utc::now() + Duration::hours(1)).is_empty());

    // A deleted job is never claimed again.
    let err = h
        .coordinator
        .execute_job(WorkerId::new(), job.id)
        .await
        .unwrap_err();
    assert_eq!(
        err.current_context(),
        &CoordinatorError::JobNotFound {
            workflow_id: job.id
        }
    );

    // History survives deletion but is no longer reachable through the job.
    let err = h.service.list_runs(h.user, job.id).await.unwrap_err();
    assert_eq!(err.current_context(), &JobError::NotFound { id: job.id });
    let runs = h.backend.runs.list_for_workflow(job.id).await.expect("list");
    assert_eq!(runs.len(), 1);
}
