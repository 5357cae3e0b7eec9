use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256, Bytes},
    providers::{Provider, ProviderBuilder},
    rpc::client::ClientBuilder,
};
use alloy_rpc_types_eth::Filter;
use async_trait::async_trait;
use chainio::{CallEncoding, DefaultProvider};
use derive_more::Debug;
use eyre::{Context, OptionExt, Result};
use network::DEFAULT_RETRY_LAYER;
use primitives::{BlockRange, Chain};
use tracing::trace;
use url::Url;

use crate::{ChainReader, RawLog};

/// [`ChainReader`] over one HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcReader {
    chain: Chain,
    url: Url,
    encoding: CallEncoding,
    #[debug(skip)]
    provider: DefaultProvider,
}

impl RpcReader {
    /// Connect to `url`. Calls are encoded the way `chain` expects.
    pub fn new(chain: Chain, url: Url) -> Self {
        let client = ClientBuilder::default().layer(DEFAULT_RETRY_LAYER).http(url.clone());
        let provider = ProviderBuilder::new().connect_client(client);
        Self { chain, url, encoding: CallEncoding::for_chain(chain), provider }
    }

    /// Endpoint url.
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ChainReader for RpcReader {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn latest_block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn get_logs(
        &self,
        addresses: &[Address],
        range: BlockRange,
        topic0: B256,
    ) -> Result<Vec<RawLog>> {
        let filter = Filter::new()
            .address(addresses.to_vec())
            .event_signature(topic0)
            .from_block(range.from)
            .to_block(range.to);
        let logs = self.provider.get_logs(&filter).await?;
        trace!(chain = %self.chain, %range, count = logs.len(), "fetched logs");

        logs.into_iter()
            .map(|log| -> Result<RawLog> {
                Ok(RawLog {
                    address: log.address(),
                    block_number: log.block_number.ok_or_eyre("log without block number")?,
                    transaction_hash: log
                        .transaction_hash
                        .ok_or_eyre("log without transaction hash")?,
                    log_index: log.log_index.unwrap_or_default(),
                    topics: log.topics().to_vec(),
                    data: log.data().data.clone(),
                })
            })
            .collect()
    }

    async fn call_at_block(&self, to: Address, calldata: Bytes, block: u64) -> Result<Bytes> {
        let request = self.encoding.call_request(to, calldata);
        self.provider
            .call(request)
            .block(block.into())
            .await
            .wrap_err_with(|| format!("eth_call to {to} at block {block}"))
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block))
            .await?
            .ok_or_else(|| eyre::eyre!("block {block} not found"))?;
        Ok(block.header.timestamp)
    }
}
