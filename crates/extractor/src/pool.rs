use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use config::ChainConfig;
use eyre::{Result, bail};
use network::Endpoint;
use primitives::Chain;

use crate::{ChainReader, RpcReader};

/// The RPC endpoints of one chain, handed out round-robin.
#[derive(Debug, Clone)]
pub struct RpcPool {
    chain: Chain,
    readers: Vec<(Endpoint, Arc<dyn ChainReader>)>,
    next: Arc<AtomicUsize>,
}

impl RpcPool {
    /// Pool over already built readers, all serving `chain`.
    pub fn new(chain: Chain, readers: Vec<(Endpoint, Arc<dyn ChainReader>)>) -> Result<Self> {
        if readers.is_empty() {
            bail!("no rpc endpoint for chain {chain}");
        }
        if let Some((endpoint, _)) = readers.iter().find(|(endpoint, _)| endpoint.chain != chain) {
            bail!("endpoint {endpoint} does not serve chain {chain}");
        }
        Ok(Self { chain, readers, next: Arc::default() })
    }

    /// One HTTP reader per configured rpc url.
    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        let readers = config
            .rpc_endpoints
            .iter()
            .enumerate()
            .map(|(index, url)| {
                let endpoint =
                    Endpoint::rpc(config.chain, index, config.limitations.min_delay_between_calls);
                let reader: Arc<dyn ChainReader> =
                    Arc::new(RpcReader::new(config.chain, url.clone()));
                (endpoint, reader)
            })
            .collect();
        Self::new(config.chain, readers)
    }

    /// Chain served by the pool.
    pub const fn chain(&self) -> Chain {
        self.chain
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    /// Always false, a pool has at least one endpoint.
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// The next endpoint in round-robin order.
    pub fn next(&self) -> (Endpoint, Arc<dyn ChainReader>) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let (endpoint, reader) = &self.readers[index];
        (*endpoint, Arc::clone(reader))
    }
}
