//! What is imported for a product, and how it is read from a chain.

mod share_price;
mod transfer;

pub use share_price::SharePriceImporter;
pub use transfer::TransferImporter;

use std::fmt;

use alloy::primitives::Address;
use async_trait::async_trait;
use config::ChainConfig;
use extractor::{ChainReader, ExplorerClient};
use eyre::Result;
use primitives::{BlockRange, Product};

use crate::records::FetchedRecord;

/// Upstreams available to one fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchTarget<'a> {
    /// Chain being read
    pub config: &'a ChainConfig,
    /// RPC endpoint chosen for this fetch
    pub reader: &'a dyn ChainReader,
    /// Explorer, set only when the importer reads from it
    pub explorer: Option<&'a ExplorerClient>,
}

/// One kind of historical product data.
#[async_trait]
pub trait ProductImporter: Send + Sync + fmt::Debug {
    /// Stable name, used as the import status key and in logs.
    fn kind(&self) -> &'static str;

    /// Whether `product` has this kind of data.
    fn accepts(&self, product: &Product) -> bool;

    /// Whether one fetch can serve several contracts on this chain.
    fn supports_address_batch(&self, config: &ChainConfig) -> bool;

    /// Whether fetches go to the chain's explorer rather than an RPC endpoint.
    fn uses_explorer(&self, _config: &ChainConfig) -> bool {
        false
    }

    /// Read the data of `contracts` within `range`.
    ///
    /// Must fail as a whole rather than return a partial result, a failed
    /// fetch is retried later over the same range.
    async fn fetch(
        &self,
        target: &FetchTarget<'_>,
        contracts: &[Address],
        range: BlockRange,
    ) -> Result<Vec<FetchedRecord>>;
}
