//! Pool and system status.
//!
//! Status is dashboard data. Reads go through an optional TTL cache that
//! is never invalidated on write, so a reader may see a snapshot up to one
//! TTL old. Without a cache every read hits the stores.

use crate::error::StatusError;
use crate::store::{RunStore, StatusStore};
use crate::worker::{WorkerRegistry, WorkerStatus, WorkerView};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mixtape_core::SystemStatusId;
use mixtape_workflow::RunStatus;
use rootcause::prelude::Report;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

const LATEST_KEY: &str = "status:latest";
const POOL_KEY: &str = "status:pool";

/// One point-in-time snapshot of the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub id: SystemStatusId,
    pub recorded_at: DateTime<Utc>,
    pub workers_total: usize,
    pub workers_busy: usize,
    pub runs_running: usize,
    /// True when at least one worker is online.
    pub healthy: bool,
}

/// Current worker pool occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub workers_total: usize,
    pub workers_idle: usize,
    pub workers_busy: usize,
    pub workers_offline: usize,
    pub workers: Vec<WorkerView>,
}

impl PoolStatus {
    fn from_workers(workers: Vec<WorkerView>) -> Self {
        let count = |status: WorkerStatus| workers.iter().filter(|w| w.status == status).count();
        Self {
            workers_total: workers.len(),
            workers_idle: count(WorkerStatus::Idle),
            workers_busy: count(WorkerStatus::Busy),
            workers_offline: count(WorkerStatus::Offline),
            workers,
        }
    }
}

/// A key-value cache with per-entry expiry.
///
/// Implementations may drop entries at any time; a miss only costs a store
/// read.
#[async_trait]
pub trait ReadCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<JsonValue>;

    async fn set(&self, key: &str, value: JsonValue, ttl: Duration);
}

/// An in-process [`ReadCache`].
#[derive(Debug, Default)]
pub struct InMemoryReadCache {
    entries: Mutex<HashMap<String, (Instant, JsonValue)>>,
}

impl InMemoryReadCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadCache for InMemoryReadCache {
    async fn get(&self, key: &str) -> Option<JsonValue> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some((expires_at, value)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: JsonValue, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (expires_at, value));
    }
}

/// Records and serves status snapshots.
#[derive(Clone)]
pub struct StatusService {
    workers: WorkerRegistry,
    runs: Arc<dyn RunStore>,
    statuses: Arc<dyn StatusStore>,
    cache: Option<Arc<dyn ReadCache>>,
    ttl: Duration,
}

impl StatusService {
    #[must_use]
    pub fn new(
        workers: WorkerRegistry,
        runs: Arc<dyn RunStore>,
        statuses: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            workers,
            runs,
            statuses,
            cache: None,
            ttl: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ReadCache>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.ttl = ttl;
        self
    }

    /// Captures and stores a snapshot of the pool and running runs.
    #[instrument(skip(self))]
    pub async fn record_snapshot(&self) -> Result<SystemStatus, Report<StatusError>> {
        let workers = self.workers.list().await.map_err(|e| StatusError::Storage {
            details: e.to_string(),
        })?;
        let runs_running = self
            .runs
            .count_by_status(RunStatus::Running)
            .await
            .map_err(|e| StatusError::Storage {
                details: e.to_string(),
            })?;

        let status = SystemStatus {
            id: SystemStatusId::new(),
            recorded_at: Utc::now(),
            workers_total: workers.len(),
            workers_busy: workers
                .iter()
                .filter(|w| w.status == WorkerStatus::Busy)
                .count(),
            runs_running,
            healthy: workers.iter().any(|w| w.status != WorkerStatus::Offline),
        };
        self.statuses
            .insert(status.clone())
            .await
            .map_err(|e| StatusError::Storage {
                details: e.to_string(),
            })?;
        debug!(status_id = %status.id, healthy = status.healthy, "status recorded");
        Ok(status)
    }

    /// The most recent snapshot, possibly served from cache.
    pub async fn latest(&self) -> Result<Option<SystemStatus>, Report<StatusError>> {
        if let Some(cached) = self.cached::<Option<SystemStatus>>(LATEST_KEY).await {
            return Ok(cached);
        }
        let latest = self.statuses.latest().await.map_err(|e| StatusError::Storage {
            details: e.to_string(),
        })?;
        self.store_cached(LATEST_KEY, &latest).await;
        Ok(latest)
    }

    /// Current pool occupancy, possibly served from cache.
    pub async fn pool_status(&self) -> Result<PoolStatus, Report<StatusError>> {
        if let Some(cached) = self.cached::<PoolStatus>(POOL_KEY).await {
            return Ok(cached);
        }
        let workers = self.workers.list().await.map_err(|e| StatusError::Storage {
            details: e.to_string(),
        })?;
        let pool = PoolStatus::from_workers(workers);
        self.store_cached(POOL_KEY, &pool).await;
        Ok(pool)
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.cache.as_ref()?.get(key).await?;
        serde_json::from_value(value).ok()
    }

    async fn store_cached<T: Serialize>(&self, key: &str, value: &T) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Ok(value) = serde_json::to_value(value) {
            cache.set(key, value, self.ttl).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryRunStore, InMemoryStatusStore, InMemoryWorkerStore};
    use mixtape_core::WorkflowId;
    use mixtape_workflow::WorkflowRun;

    struct Fixture {
        workers: WorkerRegistry,
        runs: Arc<InMemoryRunStore>,
        service: StatusService,
    }

    fn fixture(cache_ttl: Option<Duration>) -> Fixture {
        let workers = WorkerRegistry::new(Arc::new(InMemoryWorkerStore::new()));
        let runs = Arc::new(InMemoryRunStore::new());
        let mut service = StatusService::new(
            workers.clone(),
            runs.clone(),
            Arc::new(InMemoryStatusStore::new()),
        );
        if let Some(ttl) = cache_ttl {
            service = service.with_cache(Arc::new(InMemoryReadCache::new()), ttl);
        }
        Fixture {
            workers,
            runs,
            service,
        }
    }

    #[tokio::test]
    async fn snapshot_counts_workers_and_running_runs() {
        let f = fixture(None);
        let busy = f.workers.register("a").await.expect("register");
        f.workers.register("b").await.expect("register");
        f.workers
            .set_status(busy.id, WorkerStatus::Busy)
            .await
            .expect("status");
        f.runs
            .insert(WorkflowRun::start(WorkflowId::new()))
            .await
            .expect("insert");

        let status = f.service.record_snapshot().await.expect("snapshot");
        assert_eq!(status.workers_total, 2);
        assert_eq!(status.workers_busy, 1);
        assert_eq!(status.runs_running, 1);
        assert!(status.healthy);

        assert_eq!(f.service.latest().await.expect("latest"), Some(status));
    }

    #[tokio::test]
    async fn empty_pool_is_unhealthy() {
        let f = fixture(None);
        let status = f.service.record_snapshot().await.expect("snapshot");
        assert!(!status.healthy);
        assert_eq!(f.service.latest().await.expect("latest").map(|s| s.id), Some(status.id));
    }

    #[tokio::test]
    async fn uncached_reads_see_writes_immediately() {
        let f = fixture(None);
        assert_eq!(f.service.pool_status().await.expect("pool").workers_total, 0);
        f.workers.register("a").await.expect("register");
        assert_eq!(f.service.pool_status().await.expect("pool").workers_total, 1);
    }

    #[tokio::test]
    async fn cached_reads_are_not_invalidated_by_writes() {
        let f = fixture(Some(Duration::from_secs(60)));
        assert_eq!(f.service.pool_status().await.expect("pool").workers_total, 0);

        f.workers.register("a").await.expect("register");
        assert_eq!(f.service.pool_status().await.expect("pool").workers_total, 0);
    }

    #[tokio::test]
    async fn cached_reads_refresh_after_ttl() {
        let f = fixture(Some(Duration::from_millis(20)));
        assert_eq!(f.service.pool_status().await.expect("pool").workers_total, 0);

        f.workers.register("a").await.expect("register");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pool = f.service.pool_status().await.expect("pool");
        assert_eq!(pool.workers_total, 1);
        assert_eq!(pool.workers_idle, 1);
    }

    #[tokio::test]
    async fn expired_cache_entries_are_dropped() {
        let cache = InMemoryReadCache::new();
        cache.set("k", JsonValue::from(1), Duration::ZERO).await;
        assert_eq!(cache.get("k").await, None);

        cache.set("k", JsonValue::from(2), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(JsonValue::from(2)));
    }
}
