//! Vaultscope extractor: read-only access to chain data over JSON-RPC and
//! block explorer APIs.

/// Etherscan compatible explorer client
pub mod explorer;
/// Round-robin selection of a chain's RPC endpoints
pub mod pool;
/// alloy based JSON-RPC reader
pub mod rpc;

pub use explorer::{ContractCreationInfo, ExplorerClient, ExplorerError};
pub use pool::RpcPool;
pub use rpc::RpcReader;

use std::fmt;

use alloy::primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use eyre::Result;
use primitives::{BlockRange, Chain};

/// An event log, as returned by either an RPC node or an explorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,
    /// Block the log was emitted in
    pub block_number: u64,
    /// Emitting transaction
    pub transaction_hash: B256,
    /// Position of the log in the block
    pub log_index: u64,
    /// Indexed topics, the event signature first
    pub topics: Vec<B256>,
    /// Non-indexed data
    pub data: Bytes,
}

/// Read access to one chain endpoint.
///
/// Implementations do not retry or throttle, that is the gateway's job.
#[async_trait]
pub trait ChainReader: Send + Sync + fmt::Debug {
    /// Chain served by this reader.
    fn chain(&self) -> Chain;

    /// Current head block number.
    async fn latest_block_number(&self) -> Result<u64>;

    /// Logs with signature `topic0` emitted by any of `addresses` within `range`.
    async fn get_logs(
        &self,
        addresses: &[Address],
        range: BlockRange,
        topic0: B256,
    ) -> Result<Vec<RawLog>>;

    /// `eth_call` of `to` with `calldata` at `block`.
    async fn call_at_block(&self, to: Address, calldata: Bytes, block: u64) -> Result<Bytes>;

    /// Timestamp of `block`, in seconds.
    async fn block_timestamp(&self, block: u64) -> Result<u64>;
}
