use std::fmt;

use config::CallDelay;
use primitives::Chain;

/// Which upstream service of a chain an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// The `index`-th configured RPC url
    Rpc {
        /// Position in the chain's rpc endpoint list
        index: usize,
    },
    /// The chain's block explorer api
    Explorer,
}

/// An upstream endpoint protected by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Chain served by the endpoint
    pub chain: Chain,
    /// Kind of endpoint
    pub kind: EndpointKind,
    /// Minimum delay between two calls
    pub min_delay: CallDelay,
}

impl Endpoint {
    /// RPC endpoint number `index` of `chain`.
    pub const fn rpc(chain: Chain, index: usize, min_delay: CallDelay) -> Self {
        Self { chain, kind: EndpointKind::Rpc { index }, min_delay }
    }

    /// Block explorer of `chain`.
    pub const fn explorer(chain: Chain, min_delay: CallDelay) -> Self {
        Self { chain, kind: EndpointKind::Explorer, min_delay }
    }

    /// Lease and last-call key, e.g. `rpc:bsc:0` or `explorer:bsc`.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EndpointKind::Rpc { index } => write!(f, "rpc:{}:{index}", self.chain),
            EndpointKind::Explorer => write!(f, "explorer:{}", self.chain),
        }
    }
}
