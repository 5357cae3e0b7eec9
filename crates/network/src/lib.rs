//! Rate-limited, lease-protected access to upstream RPC and explorer endpoints.
//!
//! Every call to an endpoint goes through [`CallGateway::call_protected`], which
//! serialises calls per endpoint, keeps a minimum delay between them and retries
//! transient failures with jittered exponential backoff.

/// Error message classification
pub mod classify;
/// Time source used for throttling
pub mod clock;
/// Endpoint identity and limits
pub mod endpoint;
mod error;
/// The call gateway
pub mod gateway;
/// Keyed leases serialising access to an endpoint
pub mod lease;
/// Last call timestamps per endpoint
pub mod last_call;
/// Transport retry layer and gateway backoff
pub mod retries;

pub use clock::{Clock, TokioClock};
pub use endpoint::{Endpoint, EndpointKind};
pub use error::GatewayError;
pub use gateway::{CallGateway, GatewayConfig};
pub use last_call::{InMemoryLastCallStore, LastCallStore};
pub use lease::{Lease, LeaseManager, LocalLeaseManager};
pub use retries::{BackoffConfig, DEFAULT_RETRY_LAYER};
