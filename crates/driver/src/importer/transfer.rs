use alloy::primitives::Address;
use async_trait::async_trait;
use chainio::vault::{TRANSFER_TOPIC, decode_transfer};
use config::ChainConfig;
use extractor::RawLog;
use eyre::Result;
use primitives::{BlockRange, Product};
use tracing::debug;

use super::{FetchTarget, ProductImporter};
use crate::records::{FetchedRecord, RecordData};

/// ERC-20 `Transfer` events of the vault share tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferImporter;

#[async_trait]
impl ProductImporter for TransferImporter {
    fn kind(&self) -> &'static str {
        "transfers"
    }

    fn accepts(&self, _product: &Product) -> bool {
        true
    }

    fn supports_address_batch(&self, config: &ChainConfig) -> bool {
        // explorer log apis take a single address
        !config.logs_from_explorer()
    }

    fn uses_explorer(&self, config: &ChainConfig) -> bool {
        config.logs_from_explorer()
    }

    async fn fetch(
        &self,
        target: &FetchTarget<'_>,
        contracts: &[Address],
        range: BlockRange,
    ) -> Result<Vec<FetchedRecord>> {
        let logs = match target.explorer {
            Some(explorer) => {
                let mut logs = Vec::new();
                for contract in contracts {
                    logs.extend(explorer.get_logs(*contract, range, TRANSFER_TOPIC).await?);
                }
                logs
            }
            None => target.reader.get_logs(contracts, range, TRANSFER_TOPIC).await?,
        };
        Ok(logs.into_iter().filter_map(transfer_record).collect())
    }
}

/// ERC-721 style transfers share the topic but not the layout, they are skipped.
fn transfer_record(log: RawLog) -> Option<FetchedRecord> {
    let transfer = match decode_transfer(&log.topics, &log.data) {
        Ok(transfer) => transfer,
        Err(err) => {
            debug!(contract = %log.address, block = log.block_number, %err, "Skipping undecodable transfer");
            return None;
        }
    };
    Some(FetchedRecord {
        contract: log.address,
        block_number: log.block_number,
        data: RecordData::Transfer {
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
            from: transfer.from,
            to: transfer.to,
            value: transfer.value,
        },
    })
}
