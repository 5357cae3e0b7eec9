use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use config::ChainConfig;
use extractor::{ExplorerClient, RpcPool};
use eyre::{Result, bail, eyre};
use import_status::{ContractCreation, ContractCreationLookup};
use network::{CallGateway, Endpoint};
use primitives::Product;

/// Finds contract deployments through the chain's explorer.
///
/// Explorers that omit the deployment time are completed with the block
/// timestamp read from an RPC endpoint.
#[derive(Debug, Clone)]
pub struct ExplorerCreationLookup {
    gateway: CallGateway,
    explorer: Option<(Endpoint, Arc<ExplorerClient>)>,
    pool: RpcPool,
}

impl ExplorerCreationLookup {
    /// Lookup for the chain of `config`.
    pub fn new(
        config: &ChainConfig,
        gateway: CallGateway,
        explorer: Option<Arc<ExplorerClient>>,
        pool: RpcPool,
    ) -> Self {
        let explorer = config.explorer.as_ref().zip(explorer).map(|(settings, client)| {
            (Endpoint::explorer(config.chain, settings.min_delay_between_calls), client)
        });
        Self { gateway, explorer, pool }
    }
}

#[async_trait]
impl ContractCreationLookup for ExplorerCreationLookup {
    async fn contract_creation(&self, product: &Product) -> Result<ContractCreation> {
        let Some((endpoint, explorer)) = &self.explorer else {
            bail!("no explorer configured on {} to find contract creations", product.chain);
        };
        let address = product.contract_address;
        let info = self
            .gateway
            .call_protected(endpoint, || async move {
                explorer.contract_creation(address).await.map_err(eyre::Report::from)
            })
            .await?
            .ok_or_else(|| eyre!("explorer does not know contract {address}"))?;

        let timestamp = match info.timestamp {
            Some(timestamp) => timestamp,
            None => {
                let (endpoint, reader) = self.pool.next();
                let reader = &reader;
                self.gateway
                    .call_protected(&endpoint, move || reader.block_timestamp(info.block_number))
                    .await?
            }
        };
        let datetime = i64::try_from(timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| eyre!("invalid creation timestamp {timestamp}"))?;

        Ok(ContractCreation { block_number: info.block_number, datetime })
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::Address;
    use network::GatewayConfig;
    use primitives::{Chain, ProductId, ProductKind};

    use super::*;
    use crate::testing::{FakeReader, chain_config};

    #[tokio::test]
    async fn fails_without_explorer() {
        let config = chain_config(Chain::Bsc);
        let reader: Arc<dyn extractor::ChainReader> = Arc::new(FakeReader::new(Chain::Bsc, 10));
        let pool = RpcPool::new(
            Chain::Bsc,
            vec![(Endpoint::rpc(Chain::Bsc, 0, config.limitations.min_delay_between_calls), reader)],
        )
        .unwrap();
        let lookup = ExplorerCreationLookup::new(
            &config,
            CallGateway::in_process(GatewayConfig::default()),
            None,
            pool,
        );
        let product = Product {
            id: ProductId(1),
            chain: Chain::Bsc,
            kind: ProductKind::StandardVault,
            contract_address: Address::repeat_byte(1),
            name: "vault".to_owned(),
        };

        let err = lookup.contract_creation(&product).await.unwrap_err();
        assert!(err.to_string().contains("no explorer"));
    }
}
