use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chainio::{
    multicall::{
        aggregate3_same_call, current_block_timestamp_calldata, decode_aggregate3,
        decode_current_block_timestamp,
    },
    vault::{decode_price_per_full_share, price_per_full_share_calldata},
};
use config::ChainConfig;
use eyre::{Result, WrapErr, eyre};
use primitives::{BlockRange, Product};
use tracing::debug;

use super::{FetchTarget, ProductImporter};
use crate::records::{FetchedRecord, RecordData};

/// `getPricePerFullShare()` sampled on blocks that are multiples of the chain's
/// `sample_block_step`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharePriceImporter;

/// Blocks of `range` that are a multiple of `step`.
pub(crate) fn sample_blocks(range: BlockRange, step: u64) -> impl Iterator<Item = u64> {
    let step = step.max(1);
    let first = range.from.div_ceil(step).saturating_mul(step);
    (first..=range.to).step_by(usize::try_from(step).unwrap_or(usize::MAX))
}

#[async_trait]
impl ProductImporter for SharePriceImporter {
    fn kind(&self) -> &'static str {
        "share_prices"
    }

    fn accepts(&self, product: &Product) -> bool {
        product.kind.has_share_price()
    }

    fn supports_address_batch(&self, config: &ChainConfig) -> bool {
        config.multicall_address.is_some()
    }

    async fn fetch(
        &self,
        target: &FetchTarget<'_>,
        contracts: &[Address],
        range: BlockRange,
    ) -> Result<Vec<FetchedRecord>> {
        let mut records = Vec::new();
        for block in sample_blocks(range, target.config.sample_block_step) {
            match (contracts, target.config.multicall_address) {
                ([contract], _) => {
                    records.push(single_price(target, *contract, block).await?);
                }
                (_, Some(multicall)) => {
                    records.extend(multicall_prices(target, multicall, contracts, block).await?);
                }
                (_, None) => {
                    for contract in contracts {
                        records.push(single_price(target, *contract, block).await?);
                    }
                }
            }
        }
        Ok(records)
    }
}

async fn single_price(target: &FetchTarget<'_>, contract: Address, block: u64) -> Result<FetchedRecord> {
    let output = target
        .reader
        .call_at_block(contract, price_per_full_share_calldata(), block)
        .await
        .wrap_err_with(|| format!("getPricePerFullShare of {contract} at {block}"))?;
    let price = decode_price_per_full_share(&output)?;
    let block_timestamp = target.reader.block_timestamp(block).await?;
    Ok(price_record(contract, block, block_timestamp, price))
}

async fn multicall_prices(
    target: &FetchTarget<'_>,
    multicall: Address,
    contracts: &[Address],
    block: u64,
) -> Result<Vec<FetchedRecord>> {
    let calldata = aggregate3_same_call(contracts, &price_per_full_share_calldata());
    let output = target
        .reader
        .call_at_block(multicall, calldata, block)
        .await
        .wrap_err_with(|| format!("aggregate3 of {} vaults at {block}", contracts.len()))?;
    let results = decode_aggregate3(&output)?;
    if results.len() != contracts.len() {
        return Err(eyre!("aggregate3 returned {} results for {} calls", results.len(), contracts.len()));
    }

    let block_timestamp = block_timestamp(target, multicall, block).await?;
    let mut records = Vec::with_capacity(contracts.len());
    for (contract, result) in contracts.iter().zip(results) {
        if !result.success {
            debug!(%contract, block, "getPricePerFullShare reverted");
            continue;
        }
        let price = decode_price_per_full_share(&result.returnData)?;
        records.push(price_record(*contract, block, block_timestamp, price));
    }
    Ok(records)
}

async fn block_timestamp(target: &FetchTarget<'_>, multicall: Address, block: u64) -> Result<u64> {
    if !target.config.limitations.can_read_multicall_block_timestamp {
        return target.reader.block_timestamp(block).await;
    }
    let output =
        target.reader.call_at_block(multicall, current_block_timestamp_calldata(), block).await?;
    let timestamp = decode_current_block_timestamp(&output)?;
    u64::try_from(timestamp).map_err(|_| eyre!("block timestamp {timestamp} overflows u64"))
}

const fn price_record(contract: Address, block: u64, block_timestamp: u64, price: U256) -> FetchedRecord {
    FetchedRecord {
        contract,
        block_number: block,
        data: RecordData::SharePrice { block_timestamp, price_per_full_share: price },
    }
}
