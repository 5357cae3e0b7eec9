//! In-memory chain used by the driver tests.

use std::{collections::HashMap, sync::Mutex};

use alloy::{
    primitives::{Address, B256, Bytes, U256},
    sol_types::{SolCall, SolValue},
};
use async_trait::async_trait;
use chainio::{
    IMulticall3::{Call3Result, aggregate3Call, getCurrentBlockTimestampCall},
    vault::TRANSFER_TOPIC,
};
use config::{CallDelay, ChainConfig, RpcLimitations};
use extractor::{ChainReader, RawLog};
use eyre::{Result, bail, eyre};
use primitives::{BlockRange, Chain};

pub(crate) const MULTICALL: Address = Address::repeat_byte(0xca);

pub(crate) fn chain_config(chain: Chain) -> ChainConfig {
    ChainConfig {
        chain,
        rpc_endpoints: vec!["http://localhost:8545".parse().unwrap()],
        limitations: RpcLimitations {
            min_delay_between_calls: CallDelay::NoLimit,
            max_addresses_per_query: 100,
            max_block_span_per_query: 1_000,
            state_change_visible_on_same_block: false,
            can_read_multicall_block_timestamp: true,
        },
        multicall_address: Some(MULTICALL),
        explorer: None,
        work_concurrency: 2,
        sample_block_step: 100,
    }
}

/// A mint of `value` shares emitted by `contract` at `block`.
pub(crate) fn transfer_log(contract: Address, block: u64, value: u64) -> RawLog {
    RawLog {
        address: contract,
        block_number: block,
        transaction_hash: B256::from(U256::from(block)),
        log_index: 0,
        topics: vec![TRANSFER_TOPIC, Address::ZERO.into_word(), Address::repeat_byte(0x99).into_word()],
        data: U256::from(value).abi_encode().into(),
    }
}

#[derive(Debug)]
pub(crate) struct FakeReader {
    pub(crate) chain: Chain,
    pub(crate) head: u64,
    pub(crate) logs: Vec<RawLog>,
    /// Base price of each vault, the price at a block is base + block
    pub(crate) prices: HashMap<Address, U256>,
    /// Every `get_logs` fails with this message
    pub(crate) log_error: Option<String>,
    /// `get_logs` over more blocks than this is rejected as too large
    pub(crate) max_log_span: Option<u64>,
    log_calls: Mutex<Vec<(Vec<Address>, BlockRange)>>,
    eth_calls: Mutex<Vec<(Address, u64)>>,
}

impl FakeReader {
    pub(crate) fn new(chain: Chain, head: u64) -> Self {
        Self {
            chain,
            head,
            logs: Vec::new(),
            prices: HashMap::new(),
            log_error: None,
            max_log_span: None,
            log_calls: Mutex::default(),
            eth_calls: Mutex::default(),
        }
    }

    pub(crate) const fn timestamp_of(block: u64) -> u64 {
        1_600_000_000 + block * 3
    }

    pub(crate) fn log_calls(&self) -> Vec<(Vec<Address>, BlockRange)> {
        self.log_calls.lock().unwrap().clone()
    }

    pub(crate) fn eth_calls(&self) -> Vec<(Address, u64)> {
        self.eth_calls.lock().unwrap().clone()
    }

    fn price_at(&self, contract: Address, block: u64) -> Option<U256> {
        self.prices.get(&contract).map(|base| *base + U256::from(block))
    }
}

#[async_trait]
impl ChainReader for FakeReader {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn latest_block_number(&self) -> Result<u64> {
        Ok(self.head)
    }

    async fn get_logs(
        &self,
        addresses: &[Address],
        range: BlockRange,
        topic0: B256,
    ) -> Result<Vec<RawLog>> {
        self.log_calls.lock().unwrap().push((addresses.to_vec(), range));
        if let Some(message) = &self.log_error {
            bail!("{message}");
        }
        if self.max_log_span.is_some_and(|span| range.length() > span) {
            bail!("query returned more than 10000 results");
        }
        Ok(self
            .logs
            .iter()
            .filter(|log| {
                addresses.contains(&log.address)
                    && range.contains_value(log.block_number)
                    && log.topics.first() == Some(&topic0)
            })
            .cloned()
            .collect())
    }

    async fn call_at_block(&self, to: Address, calldata: Bytes, block: u64) -> Result<Bytes> {
        self.eth_calls.lock().unwrap().push((to, block));
        if to != MULTICALL {
            return self
                .price_at(to, block)
                .map(|price| price.abi_encode().into())
                .ok_or_else(|| eyre!("execution reverted"));
        }
        if calldata.starts_with(&getCurrentBlockTimestampCall::SELECTOR) {
            return Ok(U256::from(Self::timestamp_of(block)).abi_encode().into());
        }
        let aggregate = aggregate3Call::abi_decode(&calldata)?;
        let results: Vec<Call3Result> = aggregate
            .calls
            .iter()
            .map(|call| match self.price_at(call.target, block) {
                Some(price) => Call3Result { success: true, returnData: price.abi_encode().into() },
                None => Call3Result { success: false, returnData: Bytes::new() },
            })
            .collect();
        Ok(results.abi_encode().into())
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        Ok(Self::timestamp_of(block))
    }
}
