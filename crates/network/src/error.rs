use primitives::Chain;
use thiserror::Error;

/// Failure of a gateway protected call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The endpoint lacks historical state. Never retried.
    #[error("{chain} endpoint needs to be an archive node: {payload}")]
    ArchiveNodeNeeded {
        /// Chain of the endpoint
        chain: Chain,
        /// Upstream error message
        payload: String,
    },
    /// Every attempt failed.
    #[error("call to {key} failed after {attempts} attempt(s): {last_error:#}")]
    RetriesExhausted {
        /// Endpoint key
        key: String,
        /// Number of attempts made
        attempts: u32,
        /// Error of the last attempt
        last_error: eyre::Report,
    },
    /// The endpoint lease could not be acquired or kept.
    #[error("lease {key}: {reason}")]
    Lease {
        /// Lease key
        key: String,
        /// What went wrong
        reason: String,
    },
}

impl GatewayError {
    /// Whether this is [`GatewayError::ArchiveNodeNeeded`].
    pub const fn is_archive_node_needed(&self) -> bool {
        matches!(self, Self::ArchiveNodeNeeded { .. })
    }

    /// Upstream error message, when there is one.
    pub fn upstream_message(&self) -> String {
        match self {
            Self::ArchiveNodeNeeded { payload, .. } => payload.clone(),
            Self::RetriesExhausted { last_error, .. } => format!("{last_error:#}"),
            Self::Lease { reason, .. } => reason.clone(),
        }
    }
}
