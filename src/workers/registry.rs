//! Known workers, their health, and load-aware selection.
//!
//! The health table is an immutable snapshot behind `RwLock<Arc<_>>`: readers clone
//! the `Arc`, a refresh builds a new table and swaps it in. In-flight load lives in
//! a separate map and is released when a `WorkerLease` drops; callers waiting in
//! `acquire` are woken by the release.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::errors::WorkerError;

/// Consecutive failures after which a worker is marked unhealthy until the next
/// refresh.
const FAILURE_LIMIT: u32 = 3;

fn default_capacity() -> usize {
    1
}

/// One `[[workers]]` entry in `conductor.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub id: String,
    /// Program to run, absolute, relative to the project, or looked up on `PATH`.
    pub endpoint: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub roles: Vec<String>,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerInfo {
    pub id: String,
    pub endpoint: String,
    pub args: Vec<String>,
    pub roles: Vec<String>,
    pub capacity: usize,
    pub healthy: bool,
}

impl WorkerInfo {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl From<&WorkerSpec> for WorkerInfo {
    fn from(spec: &WorkerSpec) -> Self {
        Self {
            id: spec.id.clone(),
            endpoint: spec.endpoint.clone(),
            args: spec.args.clone(),
            roles: spec.roles.clone(),
            capacity: spec.capacity.max(1),
            healthy: false,
        }
    }
}

/// Source of worker descriptions and health probes.
#[async_trait]
pub trait WorkerDirectory: Send + Sync {
    async fn list_available_workers(&self) -> Vec<WorkerInfo>;

    async fn probe_health(&self, id: &str) -> bool;
}

/// Directory backed by the `[[workers]]` table of the config file.
#[derive(Debug, Clone)]
pub struct ConfiguredDirectory {
    specs: Vec<WorkerSpec>,
    project_dir: PathBuf,
}

impl ConfiguredDirectory {
    pub fn new(specs: Vec<WorkerSpec>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            specs,
            project_dir: project_dir.into(),
        }
    }

    /// Resolve a worker program the way a shell would.
    pub fn resolve_program(&self, endpoint: &str) -> Option<PathBuf> {
        let candidate = Path::new(endpoint);
        if candidate.components().count() > 1 || candidate.is_absolute() {
            let path = if candidate.is_absolute() {
                candidate.to_path_buf()
            } else {
                self.project_dir.join(candidate)
            };
            return path.is_file().then_some(path);
        }
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(endpoint))
            .find(|path| path.is_file())
    }
}

#[async_trait]
impl WorkerDirectory for ConfiguredDirectory {
    async fn list_available_workers(&self) -> Vec<WorkerInfo> {
        self.specs.iter().map(WorkerInfo::from).collect()
    }

    async fn probe_health(&self, id: &str) -> bool {
        self.specs
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| self.resolve_program(&s.endpoint))
            .is_some()
    }
}

/// Immutable snapshot of worker health.
#[derive(Debug, Clone, Default)]
pub struct HealthTable {
    pub workers: Vec<WorkerInfo>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl HealthTable {
    pub fn healthy(&self) -> impl Iterator<Item = &WorkerInfo> {
        self.workers.iter().filter(|w| w.healthy)
    }

    pub fn healthy_count(&self) -> usize {
        self.healthy().count()
    }

    pub fn supports(&self, role: &str) -> bool {
        self.healthy().any(|w| w.has_role(role))
    }
}

type LoadMap = Arc<Mutex<HashMap<String, usize>>>;

/// A reserved slot on one worker. Dropping it releases the slot.
#[derive(Debug)]
pub struct WorkerLease {
    worker: WorkerInfo,
    loads: LoadMap,
    released: Arc<Notify>,
}

impl WorkerLease {
    pub fn worker(&self) -> &WorkerInfo {
        &self.worker
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        let mut loads = self.loads.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(load) = loads.get_mut(&self.worker.id) {
            *load = load.saturating_sub(1);
        }
        drop(loads);
        self.released.notify_waiters();
    }
}

pub struct WorkerRegistry {
    directory: Arc<dyn WorkerDirectory>,
    health: RwLock<Arc<HealthTable>>,
    loads: LoadMap,
    released: Arc<Notify>,
    failures: Mutex<HashMap<String, u32>>,
}

impl WorkerRegistry {
    pub fn new(directory: Arc<dyn WorkerDirectory>) -> Self {
        Self {
            directory,
            health: RwLock::new(Arc::new(HealthTable::default())),
            loads: Arc::new(Mutex::new(HashMap::new())),
            released: Arc::new(Notify::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<HealthTable> {
        self.health
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, table: HealthTable) {
        *self.health.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
        // Waiters re-check against the new health table.
        self.released.notify_waiters();
    }

    /// Probe every listed worker and publish a fresh table. Returns the number of
    /// healthy workers.
    pub async fn refresh(&self) -> usize {
        let mut workers = self.directory.list_available_workers().await;
        for worker in &mut workers {
            worker.healthy = self.directory.probe_health(&worker.id).await;
            if !worker.healthy {
                tracing::warn!(worker = %worker.id, endpoint = %worker.endpoint, "Worker failed health probe");
            }
        }
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let table = HealthTable {
            workers,
            refreshed_at: Some(Utc::now()),
        };
        let healthy = table.healthy_count();
        tracing::debug!(healthy, total = table.workers.len(), "Worker health refreshed");
        self.swap(table);
        healthy
    }

    pub fn load(&self, id: &str) -> usize {
        self.loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Lease the least-loaded healthy worker that has `role`, waiting while every
    /// such worker is at capacity. Fails with `NoWorkerAvailable` only when no
    /// healthy worker has the role at all.
    pub async fn acquire(&self, role: &str) -> Result<WorkerLease, WorkerError> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register before checking so a release in between is not missed.
            released.as_mut().enable();
            match self.try_acquire(role) {
                Ok(lease) => return Ok(lease),
                Err(e) if !self.snapshot().supports(role) => return Err(e),
                Err(_) => {
                    tracing::trace!(role, "All workers for role busy, waiting for a lease");
                    released.await;
                }
            }
        }
    }

    /// Lease the least-loaded healthy worker that has `role` and spare capacity,
    /// without waiting. Ties go to the lowest worker id.
    pub fn try_acquire(&self, role: &str) -> Result<WorkerLease, WorkerError> {
        let table = self.snapshot();
        let mut loads = self.loads.lock().unwrap_or_else(PoisonError::into_inner);
        let chosen = table
            .healthy()
            .filter(|w| w.has_role(role))
            .map(|w| (w, loads.get(&w.id).copied().unwrap_or(0)))
            .filter(|(w, load)| *load < w.capacity)
            .min_by(|(a, la), (b, lb)| la.cmp(lb).then_with(|| a.id.cmp(&b.id)))
            .map(|(w, _)| w.clone())
            .ok_or_else(|| WorkerError::NoWorkerAvailable {
                role: role.to_string(),
            })?;
        *loads.entry(chosen.id.clone()).or_insert(0) += 1;
        drop(loads);
        Ok(WorkerLease {
            worker: chosen,
            loads: Arc::clone(&self.loads),
            released: Arc::clone(&self.released),
        })
    }

    pub fn report_success(&self, id: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Count a failure; after repeated failures the worker leaves the healthy set
    /// until the next refresh.
    pub fn report_failure(&self, id: &str) {
        let count = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let count = failures.entry(id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if count < FAILURE_LIMIT {
            return;
        }
        let mut table = (*self.snapshot()).clone();
        if let Some(worker) = table.workers.iter_mut().find(|w| w.id == id && w.healthy) {
            worker.healthy = false;
            tracing::warn!(worker = %id, failures = count, "Worker marked unhealthy");
            self.swap(table);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixed::registry;
    use super::*;

    #[tokio::test]
    async fn test_acquire_prefers_least_loaded_then_lowest_id() {
        let registry = registry(&[("w2", &["coder"], 2), ("w1", &["coder"], 2)]).await;

        let first = registry.acquire("coder").await.unwrap();
        assert_eq!(first.worker().id, "w1");
        let second = registry.acquire("coder").await.unwrap();
        assert_eq!(second.worker().id, "w2");
        let third = registry.acquire("coder").await.unwrap();
        assert_eq!(third.worker().id, "w1");
        assert_eq!(registry.load("w1"), 2);
    }

    #[tokio::test]
    async fn test_lease_releases_capacity_on_drop() {
        let registry = registry(&[("w1", &["qa"], 1)]).await;
        let lease = registry.acquire("qa").await.unwrap();
        assert!(matches!(
            registry.try_acquire("qa").unwrap_err(),
            WorkerError::NoWorkerAvailable { .. }
        ));
        drop(lease);
        assert_eq!(registry.load("w1"), 0);
        registry.try_acquire("qa").unwrap();
    }

    #[tokio::test]
    async fn test_acquire_waits_for_a_released_lease() {
        let registry = registry(&[("w1", &["reviewer"], 1)]).await;
        let held = registry.acquire("reviewer").await.unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .acquire("reviewer")
                    .await
                    .map(|lease| lease.worker().id.clone())
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), "w1");
    }

    #[tokio::test]
    async fn test_acquire_filters_by_role() {
        let registry = registry(&[("w1", &["coder"], 4)]).await;
        assert!(matches!(
            registry.acquire("reviewer").await.unwrap_err(),
            WorkerError::NoWorkerAvailable { .. }
        ));
        assert!(registry.snapshot().supports("coder"));
    }

    #[tokio::test]
    async fn test_repeated_failures_mark_unhealthy_until_refresh() {
        let registry = registry(&[("w1", &["coder"], 1)]).await;
        for _ in 0..FAILURE_LIMIT {
            registry.report_failure("w1");
        }
        assert_eq!(registry.snapshot().healthy_count(), 0);
        assert!(registry.acquire("coder").await.is_err());

        registry.refresh().await;
        assert_eq!(registry.snapshot().healthy_count(), 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let registry = registry(&[("w1", &["coder"], 1)]).await;
        registry.report_failure("w1");
        registry.report_failure("w1");
        registry.report_success("w1");
        registry.report_failure("w1");
        assert_eq!(registry.snapshot().healthy_count(), 1);
    }

    #[tokio::test]
    async fn test_configured_directory_probes_program_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("worker.sh"), "#!/bin/sh\n").unwrap();
        let directory = ConfiguredDirectory::new(
            vec![
                WorkerSpec {
                    id: "local".into(),
                    endpoint: "./worker.sh".into(),
                    args: Vec::new(),
                    roles: vec!["coder".into()],
                    capacity: 1,
                },
                WorkerSpec {
                    id: "missing".into(),
                    endpoint: "./nope.sh".into(),
                    args: Vec::new(),
                    roles: vec!["coder".into()],
                    capacity: 1,
                },
            ],
            dir.path(),
        );
        assert!(directory.probe_health("local").await);
        assert!(!directory.probe_health("missing").await);
        assert!(!directory.probe_health("unknown").await);
        assert_eq!(directory.list_available_workers().await.len(), 2);
    }
}
