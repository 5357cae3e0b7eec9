use std::time::Duration;

use alloy::transports::{
    RpcError, TransportError, TransportErrorKind,
    layers::{RetryBackoffLayer, RetryPolicy},
};
use alloy_json_rpc::ErrorPayload;
use config::CallDelay;
use serde::Deserialize;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

/// The default maximum number of transport-level retries for a single request.
const DEFAULT_MAX_RETRIES: u32 = 5;

/// The default initial transport backoff in milliseconds.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;

/// Compute units per second assumed for providers that don't report any.
const DEFAULT_COMPUTE_UNITS_PER_SECOND: u64 = 100;

/// The default [`RetryBackoffLayer`] for HTTP providers.
///
/// Only covers rate limits and refused connections at the transport level;
/// everything else surfaces to the [`crate::CallGateway`] which owns the
/// real backoff schedule.
pub const DEFAULT_RETRY_LAYER: RetryBackoffLayer<RateLimitConnRefusedRetryPolicy> =
    RetryBackoffLayer::new_with_policy(
        DEFAULT_MAX_RETRIES,
        DEFAULT_INITIAL_BACKOFF_MS,
        DEFAULT_COMPUTE_UNITS_PER_SECOND,
        RateLimitConnRefusedRetryPolicy,
    );

/// Extension trait to implement methods for [`RpcError<TransportErrorKind, E>`].
///
/// Ported from Alloy because it is private to its crate.
/// Reference: <https://github.com/alloy-rs/alloy/blob/a3d521e18fe335f5762be03656a3470f5f6331d8/crates/transport/src/error.rs#L126>
pub(crate) trait RpcErrorExt {
    /// Analyzes whether to retry the request depending on the error.
    fn is_retryable(&self) -> bool;

    /// Fetches the backoff hint from the error message if present
    fn backoff_hint(&self) -> Option<Duration>;
}

impl RpcErrorExt for RpcError<TransportErrorKind> {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retry_err(),
            Self::DeserError { text, .. } => {
                if let Ok(resp) = serde_json::from_str::<ErrorPayload>(text) {
                    return resp.is_retry_err();
                }

                // some providers answer without an `id`, the body is still a json-rpc error
                #[derive(Deserialize)]
                struct Resp {
                    error: ErrorPayload,
                }

                serde_json::from_str::<Resp>(text).is_ok_and(|resp| resp.error.is_retry_err())
            }
            Self::ErrorResp(err) => err.is_retry_err(),
            Self::NullResp => true,
            _ => false,
        }
    }

    fn backoff_hint(&self) -> Option<Duration> {
        let Self::ErrorResp(resp) = self else { return None };
        let Some(Ok(data)) = resp.try_data_as::<serde_json::Value>() else { return None };
        // infura sends the requested backoff with daily rate limit errors
        let backoff_seconds = &data["rate"]["backoff_seconds"];
        if let Some(seconds) = backoff_seconds.as_u64() {
            return Some(Duration::from_secs(seconds));
        }
        backoff_seconds.as_f64().map(|seconds| Duration::from_secs(seconds as u64 + 1))
    }
}

/// A retry policy that retries also on "connection refused" errors.
#[derive(Debug, Clone)]
pub struct RateLimitConnRefusedRetryPolicy;

impl RetryPolicy for RateLimitConnRefusedRetryPolicy {
    fn should_retry(&self, error: &TransportError) -> bool {
        error.is_retryable() || is_connection_refused(error)
    }

    fn backoff_hint(&self, error: &TransportError) -> Option<Duration> {
        error.backoff_hint()
    }
}

/// Checks whether the error message contains "connection refused".
#[inline]
pub fn is_connection_refused<S: ToString>(e: S) -> bool {
    e.to_string().to_lowercase().contains("connection refused")
}

/// Backoff schedule of the call gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Lower bound of the first delay, applied when an endpoint has a smaller
    /// (or no) minimum delay between calls
    pub min_initial_delay: Duration,
    /// Growth factor between two consecutive delays
    pub multiplier: u32,
    /// Upper bound of a single delay
    pub max_delay: Duration,
    /// Total number of attempts, the first one included
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_initial_delay: Duration::from_millis(100),
            multiplier: 3,
            max_delay: Duration::from_secs(5 * 60),
            max_attempts: 10,
        }
    }
}

impl BackoffConfig {
    /// Jittered delays between attempts for an endpoint throttled by `min_delay`.
    ///
    /// Yields `max_attempts - 1` delays.
    pub fn delays(&self, min_delay: CallDelay) -> impl Iterator<Item = Duration> + Send + use<> {
        let initial = min_delay
            .as_millis()
            .map(Duration::from_millis)
            .unwrap_or_default()
            .max(self.min_initial_delay);
        growing_delays(initial, self.multiplier, self.max_delay)
            .map(equal_jitter)
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// `initial`, then `initial` times successive powers of `multiplier`, capped at `max`.
fn growing_delays(
    initial: Duration,
    multiplier: u32,
    max: Duration,
) -> impl Iterator<Item = Duration> + Send + use<> {
    let initial_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
    let growth = ExponentialBackoff::from_millis(u64::from(multiplier.max(1)))
        .factor(initial_ms)
        .max_delay(max);
    std::iter::once(initial.min(max)).chain(growth)
}

/// Half of the delay is fixed, the other half is random.
fn equal_jitter(delay: Duration) -> Duration {
    let half = delay / 2;
    half + jitter(delay - half)
}
