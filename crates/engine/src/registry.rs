//! Live worker registry.
//!
//! Responsibilities:
//! - track reachable workers with heartbeat liveness and in-flight load;
//! - hand out the least-loaded healthy workers, round-robin on ties;
//! - mark workers unhealthy after `failure_threshold` consecutive task
//!   failures or a missed `worker_ttl`, and drop entries that stay silent
//!   for another full TTL;
//! - block acquirers up to `acquire_timeout`, then fail with `NoWorkers`
//!   rather than hang.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use msf_common::{EngineConfig, MsfError, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// One registered worker.
#[derive(Debug, Clone)]
pub struct WorkerEntry {
    /// Stable worker id used for scheduling and logs.
    pub worker_id: String,
    /// Base address tasks are sent to.
    pub address: String,
    /// Last heartbeat or registration time.
    pub last_heartbeat: Instant,
    /// Currently dispatched task count.
    pub in_flight: u32,
    /// Consecutive failed task attempts.
    pub consecutive_failures: u32,
    /// Whether the worker is eligible for new tasks.
    pub healthy: bool,
}

/// Worker handed out by [`WorkerRegistry::acquire`]; must be returned with
/// [`WorkerRegistry::release`].
#[derive(Debug, Clone)]
pub struct AcquiredWorker {
    /// Worker id to release against.
    pub worker_id: String,
    /// Address to dispatch the task to.
    pub address: String,
}

#[derive(Debug, Default)]
struct RegistryInner {
    workers: BTreeMap<String, WorkerEntry>,
    rr_cursor: usize,
}

/// Internally synchronized registry of live workers.
#[derive(Debug)]
pub struct WorkerRegistry {
    inner: Mutex<RegistryInner>,
    notify: Notify,
    worker_ttl: Duration,
    failure_threshold: u32,
}

impl WorkerRegistry {
    /// Build a registry from engine configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            notify: Notify::new(),
            worker_ttl: config.worker_ttl(),
            failure_threshold: config.failure_threshold.max(1),
        }
    }

    /// Upsert a worker on registration or first heartbeat.
    pub fn register(&self, worker_id: &str, address: &str) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner
            .workers
            .entry(worker_id.to_string())
            .and_modify(|w| {
                w.address = address.trim_end_matches('/').to_string();
                w.last_heartbeat = now;
                w.healthy = true;
            })
            .or_insert_with(|| {
                debug!(worker_id, address, operator = "RegistryRegister", "worker joined");
                WorkerEntry {
                    worker_id: worker_id.to_string(),
                    address: address.trim_end_matches('/').to_string(),
                    last_heartbeat: now,
                    in_flight: 0,
                    consecutive_failures: 0,
                    healthy: true,
                }
            });
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Refresh liveness for a known worker.
    pub fn heartbeat(&self, worker_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| MsfError::NotFound(format!("worker '{worker_id}'")))?;
        entry.last_heartbeat = Instant::now();
        entry.healthy = true;
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Mark stale workers unhealthy and drop long-dead entries.
    pub fn sweep_stale(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let ttl = self.worker_ttl;
        inner.workers.retain(|worker_id, entry| {
            let age = now.saturating_duration_since(entry.last_heartbeat);
            if age > ttl * 2 {
                warn!(
                    worker_id,
                    operator = "RegistrySweep",
                    "worker silent past twice its TTL; removing"
                );
                return false;
            }
            if age > ttl && entry.healthy {
                warn!(
                    worker_id,
                    operator = "RegistrySweep",
                    "worker missed heartbeat TTL; marking unhealthy"
                );
                entry.healthy = false;
            }
            true
        });
    }

    /// Number of currently healthy workers.
    pub fn healthy_count(&self) -> usize {
        self.inner.lock().workers.values().filter(|w| w.healthy).count()
    }

    fn try_acquire(&self, n: usize, exclude: Option<&str>) -> Option<Vec<AcquiredWorker>> {
        let mut inner = self.inner.lock();
        let cursor = inner.rr_cursor;
        let mut candidates: Vec<(u32, usize, String)> = inner
            .workers
            .values()
            .filter(|w| w.healthy)
            .enumerate()
            .map(|(idx, w)| (w.in_flight, idx, w.worker_id.clone()))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        // Retry attempts prefer a different worker, but a one-worker pool
        // still serves them.
        if candidates.len() > 1 {
            if let Some(excluded) = exclude {
                candidates.retain(|(_, _, id)| id != excluded);
            }
        }
        let len = candidates.len();
        // Tie-break equal load round-robin over the worker-id order.
        candidates.sort_by_key(|(load, idx, _)| (*load, (idx + len - cursor % len) % len));

        let picked: Vec<String> = candidates
            .into_iter()
            .take(n.max(1))
            .map(|(_, _, id)| id)
            .collect();
        let mut out = Vec::with_capacity(picked.len());
        for id in picked {
            let entry = inner.workers.get_mut(&id).expect("picked worker exists");
            entry.in_flight += 1;
            out.push(AcquiredWorker {
                worker_id: entry.worker_id.clone(),
                address: entry.address.clone(),
            });
        }
        inner.rr_cursor = inner.rr_cursor.wrapping_add(1);
        Some(out)
    }

    /// Return up to `n` healthy workers with the lowest in-flight load,
    /// blocking up to `timeout` for one to appear.
    ///
    /// `exclude` is honored when more than one worker is available, so task
    /// retries land elsewhere.
    pub async fn acquire(
        &self,
        n: usize,
        exclude: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<AcquiredWorker>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(workers) = self.try_acquire(n, exclude) {
                return Ok(workers);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(MsfError::NoWorkers(format!(
                    "no healthy worker within {}ms",
                    timeout.as_millis()
                )));
            }
            let notified = self.notify.notified();
            // Re-check: a register may have raced the notified() setup.
            if let Some(workers) = self.try_acquire(n, exclude) {
                return Ok(workers);
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    /// Return a worker after its task attempt finished.
    pub fn release(&self, worker_id: &str, ok: bool) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.workers.get_mut(worker_id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            if ok {
                entry.consecutive_failures = 0;
            } else {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.failure_threshold && entry.healthy {
                    warn!(
                        worker_id,
                        failures = entry.consecutive_failures,
                        threshold = self.failure_threshold,
                        operator = "RegistryRelease",
                        "worker marked unhealthy after repeated failures"
                    );
                    entry.healthy = false;
                }
            }
        }
        drop(inner);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ttl_ms: u64, failure_threshold: u32) -> EngineConfig {
        EngineConfig {
            worker_ttl_ms: ttl_ms,
            failure_threshold,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn acquire_prefers_least_loaded() {
        let registry = WorkerRegistry::new(&config(45_000, 3));
        registry.register("w1", "local://w1");
        registry.register("w2", "local://w2");

        let a = registry
            .acquire(1, None, Duration::from_millis(100))
            .await
            .unwrap();
        let b = registry
            .acquire(1, None, Duration::from_millis(100))
            .await
            .unwrap();
        // Both workers start at zero load, so the two acquisitions must
        // land on distinct workers via the round-robin tie-break.
        assert_ne!(a[0].worker_id, b[0].worker_id);

        registry.release(&a[0].worker_id, true);
        let c = registry
            .acquire(1, None, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(c[0].worker_id, a[0].worker_id);
    }

    #[tokio::test]
    async fn acquire_excludes_previous_worker_when_possible() {
        let registry = WorkerRegistry::new(&config(45_000, 3));
        registry.register("w1", "local://w1");
        registry.register("w2", "local://w2");
        for _ in 0..4 {
            let w = registry
                .acquire(1, Some("w1"), Duration::from_millis(100))
                .await
                .unwrap();
            assert_eq!(w[0].worker_id, "w2");
            registry.release("w2", true);
        }
    }

    #[tokio::test]
    async fn single_worker_still_serves_excluded_retries() {
        let registry = WorkerRegistry::new(&config(45_000, 3));
        registry.register("w1", "local://w1");
        let w = registry
            .acquire(1, Some("w1"), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(w[0].worker_id, "w1");
    }

    #[tokio::test]
    async fn empty_registry_fails_with_no_workers_instead_of_hanging() {
        let registry = WorkerRegistry::new(&config(45_000, 3));
        let started = Instant::now();
        let err = registry
            .acquire(1, None, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, MsfError::NoWorkers(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn failure_threshold_marks_unhealthy_and_heartbeat_revives() {
        let registry = WorkerRegistry::new(&config(45_000, 2));
        registry.register("w1", "local://w1");
        for _ in 0..2 {
            let w = registry
                .acquire(1, None, Duration::from_millis(100))
                .await
                .unwrap();
            registry.release(&w[0].worker_id, false);
        }
        assert_eq!(registry.healthy_count(), 0);

        registry.heartbeat("w1").unwrap();
        assert_eq!(registry.healthy_count(), 1);
    }

    #[tokio::test]
    async fn sweep_marks_stale_then_removes() {
        let registry = WorkerRegistry::new(&config(30, 3));
        registry.register("w1", "local://w1");
        tokio::time::sleep(Duration::from_millis(40)).await;
        registry.sweep_stale();
        assert_eq!(registry.healthy_count(), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        registry.sweep_stale();
        assert!(matches!(
            registry.heartbeat("w1"),
            Err(MsfError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn blocked_acquire_wakes_on_registration() {
        let registry = std::sync::Arc::new(WorkerRegistry::new(&config(45_000, 3)));
        let waiter = std::sync::Arc::clone(&registry);
        let handle = tokio::spawn(async move {
            waiter.acquire(1, None, Duration::from_secs(5)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.register("w1", "local://w1");
        let acquired = handle.await.expect("join").expect("acquire");
        assert_eq!(acquired[0].worker_id, "w1");
    }
}
