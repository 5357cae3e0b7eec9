use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::Instant,
};
use tracing::trace;

use crate::GatewayError;

/// Exclusive right to use a keyed resource until released or expired.
#[async_trait]
pub trait Lease: Send + Sync + fmt::Debug {
    /// Key the lease was acquired for.
    fn key(&self) -> &str;

    /// Push the expiry one TTL into the future.
    async fn extend(&mut self) -> Result<(), GatewayError>;

    /// Give the resource back.
    async fn release(self: Box<Self>);
}

/// Hands out [`Lease`]s, at most one per key at a time.
#[async_trait]
pub trait LeaseManager: Send + Sync + fmt::Debug {
    /// Wait until the lease for `key` is free and take it for `ttl`.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Box<dyn Lease>, GatewayError>;
}

/// In-process lease manager backed by one async mutex per key.
///
/// Holders in this process release explicitly (or on drop), so expiry is only
/// tracked to report holders that outlive their TTL.
#[derive(Debug, Clone)]
pub struct LocalLeaseManager {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    acquire_timeout: Duration,
}

impl Default for LocalLeaseManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(15 * 60))
    }
}

impl LocalLeaseManager {
    /// Give up acquiring a lease after `acquire_timeout`.
    pub fn new(acquire_timeout: Duration) -> Self {
        Self { locks: Arc::default(), acquire_timeout }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_owned()).or_default().clone()
    }
}

#[async_trait]
impl LeaseManager for LocalLeaseManager {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Box<dyn Lease>, GatewayError> {
        let lock = self.lock_for(key);
        let guard =
            tokio::time::timeout(self.acquire_timeout, lock.lock_owned()).await.map_err(|_| {
                GatewayError::Lease {
                    key: key.to_owned(),
                    reason: format!("not acquired within {:?}", self.acquire_timeout),
                }
            })?;
        trace!(key, "lease acquired");
        Ok(Box::new(LocalLease {
            key: key.to_owned(),
            ttl,
            expires_at: Instant::now() + ttl,
            _guard: guard,
        }))
    }
}

#[derive(Debug)]
struct LocalLease {
    key: String,
    ttl: Duration,
    expires_at: Instant,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl Lease for LocalLease {
    fn key(&self) -> &str {
        &self.key
    }

    async fn extend(&mut self) -> Result<(), GatewayError> {
        let now = Instant::now();
        if now > self.expires_at {
            return Err(GatewayError::Lease {
                key: self.key.clone(),
                reason: format!("expired {:?} ago", now - self.expires_at),
            });
        }
        self.expires_at = now + self.ttl;
        trace!(key = %self.key, "lease extended");
        Ok(())
    }

    async fn release(self: Box<Self>) {
        trace!(key = %self.key, "lease released");
    }
}
