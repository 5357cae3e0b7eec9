use alloy_primitives::{Address, B256, Bytes, LogData, U256};
use alloy_sol_types::{SolCall, SolEvent};

use crate::{IBeefyVault::getPricePerFullShareCall, IERC20::Transfer};

/// `Transfer(address,address,uint256)` topic.
pub const TRANSFER_TOPIC: B256 = Transfer::SIGNATURE_HASH;

/// `getPricePerFullShare()` calldata.
pub fn price_per_full_share_calldata() -> Bytes {
    getPricePerFullShareCall {}.abi_encode().into()
}

/// Decode a `getPricePerFullShare()` result.
pub fn decode_price_per_full_share(data: &[u8]) -> Result<U256, alloy_sol_types::Error> {
    getPricePerFullShareCall::abi_decode_returns(data)
}

/// A decoded share token transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareTransfer {
    /// Sender, zero on mint
    pub from: Address,
    /// Receiver, zero on burn
    pub to: Address,
    /// Amount of shares
    pub value: U256,
}

/// Decode an ERC-20 `Transfer` log.
pub fn decode_transfer(topics: &[B256], data: &Bytes) -> Result<ShareTransfer, alloy_sol_types::Error> {
    let log = LogData::new_unchecked(topics.to_vec(), data.clone());
    let transfer = Transfer::decode_log_data(&log)?;
    Ok(ShareTransfer { from: transfer.from, to: transfer.to, value: transfer.value })
}
