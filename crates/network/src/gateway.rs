use std::{
    collections::HashSet,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use derive_more::Debug;
use tokio_retry::RetryIf;
use tracing::{debug, error, trace, warn};

use crate::{
    BackoffConfig, Clock, Endpoint, GatewayError, InMemoryLastCallStore, LastCallStore, Lease,
    LeaseManager, LocalLeaseManager, TokioClock, classify::is_archive_node_error,
};

tokio::task_local! {
    /// Lease keys held by the current task.
    static HELD_LEASES: HashSet<String>;
}

/// Gateway settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Lease time to live, extended at half-TTL while work runs
    pub lease_ttl: Duration,
    /// Retry schedule
    pub backoff: BackoffConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { lease_ttl: Duration::from_secs(120), backoff: BackoffConfig::default() }
    }
}

/// Serialises, throttles and retries calls to upstream endpoints.
#[derive(Debug, Clone)]
pub struct CallGateway {
    #[debug(skip)]
    leases: Arc<dyn LeaseManager>,
    #[debug(skip)]
    last_calls: Arc<dyn LastCallStore>,
    #[debug(skip)]
    clock: Arc<dyn Clock>,
    config: GatewayConfig,
}

enum AttemptError {
    Archive(GatewayError),
    Transient(eyre::Report),
}

impl CallGateway {
    /// Create a gateway from its collaborators.
    pub fn new(
        leases: Arc<dyn LeaseManager>,
        last_calls: Arc<dyn LastCallStore>,
        clock: Arc<dyn Clock>,
        config: GatewayConfig,
    ) -> Self {
        Self { leases, last_calls, clock, config }
    }

    /// Gateway coordinating the calls of this process only.
    pub fn in_process(config: GatewayConfig) -> Self {
        Self::new(
            Arc::new(LocalLeaseManager::default()),
            Arc::new(InMemoryLastCallStore::new()),
            Arc::new(TokioClock::new()),
            config,
        )
    }

    /// Run `work` against `endpoint`.
    ///
    /// Each attempt holds the endpoint lease, waits out the endpoint's minimum
    /// delay since the previous call and records the call time. Failures are
    /// retried with jittered exponential backoff, except missing historical
    /// state which fails at once with [`GatewayError::ArchiveNodeNeeded`].
    pub async fn call_protected<T, F, Fut>(
        &self,
        endpoint: &Endpoint,
        mut work: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = eyre::Result<T>> + Send,
        T: Send,
    {
        let key = endpoint.key();
        let attempts = AtomicU32::new(0);
        let max_attempts = self.config.backoff.max_attempts;
        let (key_ref, attempts_ref) = (key.as_str(), &attempts);

        let action = move || {
            attempts_ref.fetch_add(1, Ordering::Relaxed);
            self.attempt(endpoint, key_ref, work())
        };
        let condition = move |err: &AttemptError| {
            let AttemptError::Transient(err) = err else { return false };
            let attempt = attempts_ref.load(Ordering::Relaxed);
            if attempt >= max_attempts {
                return false;
            }
            match attempt {
                0..=2 => debug!(key = key_ref, attempt, error = %format!("{err:#}"), "call failed, retrying"),
                3..=5 => warn!(key = key_ref, attempt, error = %format!("{err:#}"), "call failed, retrying"),
                _ => error!(key = key_ref, attempt, error = %format!("{err:#}"), "call failed, retrying"),
            }
            true
        };

        let strategy = self.config.backoff.delays(endpoint.min_delay);
        let outcome = RetryIf::spawn(strategy, action, condition).await;
        match outcome {
            Ok(value) => Ok(value),
            Err(AttemptError::Archive(err)) => Err(err),
            Err(AttemptError::Transient(last_error)) => Err(GatewayError::RetriesExhausted {
                key,
                attempts: attempts.load(Ordering::Relaxed),
                last_error,
            }),
        }
    }

    async fn attempt<T, Fut>(&self, endpoint: &Endpoint, key: &str, work: Fut) -> Result<T, AttemptError>
    where
        Fut: Future<Output = eyre::Result<T>> + Send,
    {
        let Some(min_delay) = endpoint.min_delay.as_millis() else {
            return work.await.map_err(|err| classify(endpoint, err));
        };

        let mut held = HELD_LEASES.try_with(Clone::clone).unwrap_or_default();
        if held.contains(key) {
            trace!(key, "lease already held by this task");
            return work.await.map_err(|err| classify(endpoint, err));
        }

        let mut lease = self
            .leases
            .acquire(key, self.config.lease_ttl)
            .await
            .map_err(|err| AttemptError::Transient(err.into()))?;
        held.insert(key.to_owned());

        let result = HELD_LEASES
            .scope(held, async {
                self.throttle(key, min_delay).await;
                self.last_calls.record_call(key, self.clock.now_ms()).await;
                let result = self.run_extending(&mut lease, work).await;
                if result.is_ok() {
                    self.last_calls.record_call(key, self.clock.now_ms()).await;
                }
                result
            })
            .await;
        lease.release().await;

        result.map_err(|err| classify(endpoint, err))
    }

    async fn throttle(&self, key: &str, min_delay_ms: u64) {
        let Some(last) = self.last_calls.last_call(key).await else { return };
        let elapsed = self.clock.now_ms().saturating_sub(last);
        if elapsed < min_delay_ms {
            let wait = Duration::from_millis(min_delay_ms - elapsed);
            trace!(key, ?wait, "throttling call");
            tokio::time::sleep(wait).await;
        }
    }

    /// Await `work`, extending `lease` every half TTL.
    async fn run_extending<T, Fut>(&self, lease: &mut Box<dyn Lease>, work: Fut) -> eyre::Result<T>
    where
        Fut: Future<Output = eyre::Result<T>> + Send,
    {
        let period = (self.config.lease_ttl / 2).max(Duration::from_millis(1));
        let mut extend = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tokio::pin!(work);
        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = extend.tick() => {
                    if let Err(err) = lease.extend().await {
                        warn!(key = lease.key(), %err, "failed to extend lease");
                    }
                }
            }
        }
    }
}

fn classify(endpoint: &Endpoint, err: eyre::Report) -> AttemptError {
    let err = match err.downcast::<GatewayError>() {
        Ok(err @ GatewayError::ArchiveNodeNeeded { .. }) => return AttemptError::Archive(err),
        Ok(other) => eyre::Report::new(other),
        Err(err) => err,
    };
    let message = format!("{err:#}");
    if is_archive_node_error(&message) {
        AttemptError::Archive(GatewayError::ArchiveNodeNeeded {
            chain: endpoint.chain,
            payload: message,
        })
    } else {
        AttemptError::Transient(err)
    }
}
