//! Distributed advisory locking.
//!
//! Mutating metastore operations run under an advisory lock scoped to the
//! affected resource (a database or a table). The lock is lease-based: a
//! holder that crashes without releasing is evicted once its lease expires,
//! so a stuck client can never wedge the catalog forever.

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// A lease held on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockLease {
    fn new(holder_id: String, lease_ms: u64) -> Self {
        let now = Utc::now();
        Self {
            holder_id,
            acquired_at: now,
            expires_at: now + ChronoDuration::milliseconds(lease_ms as i64),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Storage backend for advisory locks.
///
/// Implementations must make `try_acquire` atomic per resource: two
/// concurrent calls for the same resource must never both succeed while a
/// live lease exists.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Attempt to claim `resource`. Returns `true` on success, `false` if the
    /// resource is held by a live lease. An expired lease is taken over.
    async fn try_acquire(&self, resource: &str, lease: LockLease) -> Result<bool>;

    /// Extend the lease on `resource` by `extend_ms` from now, if it is
    /// still held by `holder_id`. Returns `false` when the lease was lost
    /// (expired or taken over); only the current holder can extend.
    async fn renew(&self, resource: &str, holder_id: &str, extend_ms: u64) -> Result<bool>;

    /// Release the lease on `resource` if it is still held by `holder_id`.
    /// Releasing an already-lost lease is not an error.
    async fn release(&self, resource: &str, holder_id: &str) -> Result<()>;
}

/// In-process lock backend.
///
/// Backs single-process deployments and tests; per-resource atomicity comes
/// from the map's per-key locking.
#[derive(Debug, Default)]
pub struct MemoryLockBackend {
    leases: DashMap<String, LockLease>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lease on a resource, if any.
    pub fn current_lease(&self, resource: &str) -> Option<LockLease> {
        self.leases.get(resource).map(|l| l.clone())
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn try_acquire(&self, resource: &str, lease: LockLease) -> Result<bool> {
        match self.leases.entry(resource.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(lease);
                Ok(true)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired() {
                    debug!(resource, evicted = %slot.get().holder_id, "taking over expired lease");
                    slot.insert(lease);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn renew(&self, resource: &str, holder_id: &str, extend_ms: u64) -> Result<bool> {
        match self.leases.get_mut(resource) {
            Some(mut lease) if lease.holder_id == holder_id && !lease.is_expired() => {
                lease.expires_at = Utc::now() + ChronoDuration::milliseconds(extend_ms as i64);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, resource: &str, holder_id: &str) -> Result<()> {
        self.leases
            .remove_if(resource, |_, lease| lease.holder_id == holder_id);
        Ok(())
    }
}

/// Lease-based lock front-end with exponential backoff acquisition.
#[derive(Clone)]
pub struct DistributedLock {
    backend: Arc<dyn LockBackend>,
    config: LockConfig,
}

impl DistributedLock {
    pub fn new(backend: Arc<dyn LockBackend>, config: LockConfig) -> Self {
        Self { backend, config }
    }

    /// Run `work` while holding the lock on `resource`.
    ///
    /// Acquisition retries with exponential backoff up to the configured
    /// budget, then fails with [`LockError::Timeout`]. While `work` runs the
    /// lease is renewed in the background, so work longer than one lease
    /// period keeps the lock. The lease is released whether `work` succeeds
    /// or fails; if this process dies mid-work, lease expiry (renewal stops)
    /// bounds how long other holders wait.
    pub async fn run_with_lock<T, F, Fut>(&self, resource: &str, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let holder_id = Uuid::new_v4().to_string();

        let mut acquired = false;
        for attempt in 0..self.config.max_retries {
            let lease = LockLease::new(holder_id.clone(), self.config.lease_ms);
            if self.backend.try_acquire(resource, lease).await? {
                acquired = true;
                break;
            }
            tokio::time::sleep(self.backoff_delay(attempt)).await;
        }
        if !acquired {
            return Err(LockError::Timeout {
                resource: resource.to_string(),
                attempts: self.config.max_retries,
            }
            .into());
        }

        debug!(resource, holder = %holder_id, "lock acquired");
        let renewal = self.spawn_renewal(resource, &holder_id);
        let result = work().await;
        renewal.abort();

        if let Err(e) = self.backend.release(resource, &holder_id).await {
            // the lease expires on its own; other holders are not blocked forever
            warn!(resource, holder = %holder_id, error = %e, "failed to release lock");
        } else {
            debug!(resource, holder = %holder_id, "lock released");
        }

        result
    }

    /// Heartbeat that extends the held lease until aborted.
    ///
    /// Ticks well inside one lease period so a slow-but-alive holder never
    /// loses the resource to a contender's expired-lease takeover. Stops on
    /// its own once the lease is lost or the backend errors.
    fn spawn_renewal(&self, resource: &str, holder_id: &str) -> tokio::task::JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let resource = resource.to_string();
        let holder_id = holder_id.to_string();
        let lease_ms = self.config.lease_ms;
        let tick = Duration::from_millis((lease_ms / 3).max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                match backend.renew(&resource, &holder_id, lease_ms).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(resource = %resource, holder = %holder_id, "lease lost before renewal");
                        break;
                    }
                    Err(e) => {
                        warn!(resource = %resource, holder = %holder_id, error = %e, "lease renewal failed");
                        break;
                    }
                }
            }
        })
    }

    /// Exponential backoff with a cap, plus optional ±25% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp_delay_ms = self
            .config
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(16)));
        let capped_delay_ms = exp_delay_ms.min(self.config.max_delay_ms).max(1);

        let final_delay_ms = if self.config.jitter {
            let jitter_range = capped_delay_ms / 4;
            let jitter = (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64)
                % (jitter_range * 2 + 1);
            capped_delay_ms.saturating_sub(jitter_range) + jitter
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> LockConfig {
        LockConfig {
            lease_ms: 5_000,
            max_retries: 100,
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let backend = Arc::new(MemoryLockBackend::new());
        let lock = DistributedLock::new(backend.clone(), fast_config());

        let value = lock
            .run_with_lock("db.t", || async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert!(backend.current_lease("db.t").is_none());
    }

    #[tokio::test]
    async fn test_held_lock_blocks_second_acquirer() {
        let backend = MemoryLockBackend::new();
        let lease = LockLease::new("holder-1".to_string(), 5_000);
        assert!(backend.try_acquire("db.t", lease).await.unwrap());

        let second = LockLease::new("holder-2".to_string(), 5_000);
        assert!(!backend.try_acquire("db.t", second.clone()).await.unwrap());

        backend.release("db.t", "holder-1").await.unwrap();
        assert!(backend.try_acquire("db.t", second).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let backend = MemoryLockBackend::new();
        let stale = LockLease::new("crashed".to_string(), 0);
        assert!(backend.try_acquire("db.t", stale).await.unwrap());

        let fresh = LockLease::new("alive".to_string(), 5_000);
        assert!(backend.try_acquire("db.t", fresh).await.unwrap());
        assert_eq!(
            backend.current_lease("db.t").unwrap().holder_id,
            "alive".to_string()
        );
    }

    #[tokio::test]
    async fn test_renew_extends_lease_for_holder_only() {
        let backend = MemoryLockBackend::new();
        let lease = LockLease::new("holder-1".to_string(), 5_000);
        assert!(backend.try_acquire("db.t", lease).await.unwrap());
        let before = backend.current_lease("db.t").unwrap().expires_at;

        assert!(backend.renew("db.t", "holder-1", 60_000).await.unwrap());
        assert!(backend.current_lease("db.t").unwrap().expires_at > before);

        assert!(!backend.renew("db.t", "someone-else", 60_000).await.unwrap());
        assert!(!backend.renew("db.missing", "holder-1", 60_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_rejected_once_lease_expired() {
        let backend = MemoryLockBackend::new();
        let stale = LockLease::new("slow".to_string(), 0);
        assert!(backend.try_acquire("db.t", stale).await.unwrap());
        assert!(!backend.renew("db.t", "slow", 60_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_work_outliving_lease_stays_exclusive() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let backend = Arc::new(MemoryLockBackend::new());
        let lock = DistributedLock::new(
            backend,
            LockConfig {
                lease_ms: 20,
                max_retries: 10_000,
                base_delay_ms: 1,
                max_delay_ms: 5,
                jitter: false,
            },
        );

        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                lock.run_with_lock("db.t", || async {
                    // hold the lock for several lease periods
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_by_wrong_holder_is_ignored() {
        let backend = MemoryLockBackend::new();
        let lease = LockLease::new("holder-1".to_string(), 5_000);
        assert!(backend.try_acquire("db.t", lease).await.unwrap());

        backend.release("db.t", "someone-else").await.unwrap();
        assert!(backend.current_lease("db.t").is_some());
    }

    #[tokio::test]
    async fn test_lock_released_when_work_fails() {
        let backend = Arc::new(MemoryLockBackend::new());
        let lock = DistributedLock::new(backend.clone(), fast_config());

        let result: Result<()> = lock
            .run_with_lock("db.t", || async {
                Err(crate::Error::Storage("boom".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(backend.current_lease("db.t").is_none());
    }

    #[tokio::test]
    async fn test_timeout_after_retry_budget() {
        let backend = Arc::new(MemoryLockBackend::new());
        let blocker = LockLease::new("blocker".to_string(), 60_000);
        assert!(backend.try_acquire("db.t", blocker).await.unwrap());

        let lock = DistributedLock::new(
            backend,
            LockConfig {
                lease_ms: 5_000,
                max_retries: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
                jitter: false,
            },
        );
        let result: Result<()> = lock.run_with_lock("db.t", || async { Ok(()) }).await;
        match result {
            Err(crate::Error::Lock(LockError::Timeout { attempts, .. })) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("expected lock timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_different_resources_do_not_contend() {
        let backend = Arc::new(MemoryLockBackend::new());
        let lock = DistributedLock::new(backend.clone(), fast_config());

        let blocker = LockLease::new("other".to_string(), 60_000);
        assert!(backend.try_acquire("db.other", blocker).await.unwrap());

        let value = lock.run_with_lock("db.t", || async { Ok(1) }).await.unwrap();
        assert_eq!(value, 1);
    }
}
