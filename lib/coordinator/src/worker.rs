//! Worker liveness.
//!
//! A worker is registered by its device hash, which identifies the host it
//! runs on. The hash is internal: it never appears in [`WorkerView`], logs
//! or `Debug` output.

use crate::error::WorkerError;
use crate::store::WorkerStore;
use chrono::{DateTime, Duration, Utc};
use mixtape_core::WorkerId;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// The stored worker record.
#[derive(Clone, PartialEq)]
pub struct Worker {
    pub id: WorkerId,
    pub device_hash: String,
    pub status: WorkerStatus,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Worker {
    fn register(device_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            id: WorkerId::new(),
            device_hash: device_hash.to_string(),
            status: WorkerStatus::Idle,
            registered_at: now,
            last_seen: now,
        }
    }

    #[must_use]
    pub fn view(&self) -> WorkerView {
        WorkerView {
            id: self.id,
            status: self.status,
            last_seen: self.last_seen,
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("device_hash", &"[REDACTED]")
            .field("status", &self.status)
            .field("registered_at", &self.registered_at)
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

/// The externally visible form of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerView {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub last_seen: DateTime<Utc>,
}

/// Registers workers and tracks their status.
#[derive(Clone)]
pub struct WorkerRegistry {
    store: Arc<dyn WorkerStore>,
}

impl WorkerRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn WorkerStore>) -> Self {
        Self { store }
    }

    /// Registers a worker, reusing the existing record for a known device.
    #[instrument(skip_all)]
    pub async fn register(&self, device_hash: &str) -> Result<Worker, Report<WorkerError>> {
        let existing = self
            .store
            .find_by_device(device_hash)
            .await
            .map_err(|e| WorkerError::Storage {
                details: e.to_string(),
            })?;

        let worker = match existing {
            Some(mut worker) => {
                worker.status = WorkerStatus::Idle;
                worker.last_seen = Utc::now();
                debug!(worker_id = %worker.id, "worker re-registered");
                worker
            }
            None => {
                let worker = Worker::register(device_hash);
                info!(worker_id = %worker.id, "worker registered");
                worker
            }
        };
        self.save(worker.clone()).await?;
        Ok(worker)
    }

    /// Records that a worker is alive. An offline worker comes back idle.
    #[instrument(skip(self))]
    pub async fn heartbeat(&self, id: WorkerId) -> Result<(), Report<WorkerError>> {
        let mut worker = self.load(id).await?;
        worker.last_seen = Utc::now();
        if worker.status == WorkerStatus::Offline {
            worker.status = WorkerStatus::Idle;
        }
        self.save(worker).await
    }

    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        id: WorkerId,
        status: WorkerStatus,
    ) -> Result<(), Report<WorkerError>> {
        let mut worker = self.load(id).await?;
        worker.status = status;
        worker.last_seen = Utc::now();
        self.save(worker).await
    }

    /// Marks every worker not seen within `older_than` of `now` as offline.
    ///
    /// Returns the ids that changed.
    pub async fn mark_stale(
        &self,
        older_than: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkerId>, Report<WorkerError>> {
        let cutoff = now - older_than;
        let mut marked = Vec::new();
        for mut worker in self.all().await? {
            if worker.status == WorkerStatus::Offline || worker.last_seen >= cutoff {
                continue;
            }
            worker.status = WorkerStatus::Offline;
            marked.push(worker.id);
            self.save(worker).await?;
        }
        if !marked.is_empty() {
            info!(count = marked.len(), "marked stale workers offline");
        }
        Ok(marked)
    }

    pub async fn get(&self, id: WorkerId) -> Result<WorkerView, Report<WorkerError>> {
        Ok(self.load(id).await?.view())
    }

    /// Every worker, ordered by id.
    pub async fn list(&self) -> Result<Vec<WorkerView>, Report<WorkerError>> {
        Ok(self.all().await?.iter().map(Worker::view).collect())
    }

    async fn all(&self) -> Result<Vec<Worker>, Report<WorkerError>> {
        Ok(self.store.list().await.map_err(|e| WorkerError::Storage {
            details: e.to_string(),
        })?)
    }

    async fn load(&self, id: WorkerId) -> Result<Worker, Report<WorkerError>> {
        let worker = self.store.get(id).await.map_err(|e| WorkerError::Storage {
            details: e.to_string(),
        })?;
        worker.ok_or_else(|| WorkerError::NotFound { id }.into())
    }

    async fn save(&self, worker: Worker) -> Result<(), Report<WorkerError>> {
        Ok(self.store.put(worker).await.map_err(|e| WorkerError::Storage {
            details: e.to_string(),
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryWorkerStore;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(Arc::new(InMemoryWorkerStore::new()))
    }

    #[tokio::test]
    async fn register_reuses_device_record() {
        let registry = registry();
        let first = registry.register("host-a").await.expect("register");
        registry
            .set_status(first.id, WorkerStatus::Offline)
            .await
            .expect("status");

        let again = registry.register("host-a").await.expect("register");
        assert_eq!(again.id, first.id);
        assert_eq!(again.status, WorkerStatus::Idle);

        let other = registry.register("host-b").await.expect("register");
        assert_ne!(other.id, first.id);
        assert_eq!(registry.list().await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn view_and_debug_hide_device_hash() {
        let registry = registry();
        let worker = registry.register("secret-device").await.expect("register");

        let json = serde_json::to_string(&worker.view()).expect("serialize");
        assert!(!json.contains("secret-device"));
        assert!(!json.contains("deviceHash"));
        assert!(json.contains("lastSeen"));
        assert!(!format!("{worker:?}").contains("secret-device"));
    }

    #[tokio::test]
    async fn heartbeat_revives_offline_worker() {
        let registry = registry();
        let worker = registry.register("host").await.expect("register");
        registry
            .set_status(worker.id, WorkerStatus::Offline)
            .await
            .expect("status");
        registry.heartbeat(worker.id).await.expect("heartbeat");
        assert_eq!(
            registry.get(worker.id).await.expect("get").status,
            WorkerStatus::Idle
        );
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_worker_is_not_found() {
        let registry = registry();
        let id = WorkerId::new();
        let err = registry.heartbeat(id).await.unwrap_err();
        assert_eq!(err.current_context(), &WorkerError::NotFound { id });
    }

    #[tokio::test]
    async fn mark_stale_only_touches_silent_workers() {
        let registry = registry();
        let worker = registry.register("host").await.expect("register");

        let none = registry
            .mark_stale(Duration::minutes(2), Utc::now())
            .await
            .expect("mark");
        assert!(none.is_empty());

        let later = Utc::now() + Duration::minutes(5);
        let marked = registry
            .mark_stale(Duration::minutes(2), later)
            .await
            .expect("mark");
        assert_eq!(marked, vec![worker.id]);
        assert_eq!(
            registry.get(worker.id).await.expect("get").status,
            WorkerStatus::Offline
        );

        // Already offline workers are not reported twice.
        let again = registry
            .mark_stale(Duration::minutes(2), later)
            .await
            .expect("mark");
        assert!(again.is_empty());
    }
}
