use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;

use crate::IMulticall3::{Call3, Call3Result, aggregate3Call, getCurrentBlockTimestampCall};

/// `aggregate3` calldata calling every target with the same `calldata`,
/// individual failures allowed.
pub fn aggregate3_same_call(targets: &[Address], calldata: &Bytes) -> Bytes {
    let calls = targets
        .iter()
        .map(|target| Call3 { target: *target, allowFailure: true, callData: calldata.clone() })
        .collect();
    aggregate3Call { calls }.abi_encode().into()
}

/// Decode an `aggregate3` result.
pub fn decode_aggregate3(data: &[u8]) -> Result<Vec<Call3Result>, alloy_sol_types::Error> {
    aggregate3Call::abi_decode_returns(data)
}

/// `getCurrentBlockTimestamp()` calldata.
pub fn current_block_timestamp_calldata() -> Bytes {
    getCurrentBlockTimestampCall {}.abi_encode().into()
}

/// Decode a `getCurrentBlockTimestamp()` result, in seconds.
pub fn decode_current_block_timestamp(data: &[u8]) -> Result<U256, alloy_sol_types::Error> {
    getCurrentBlockTimestampCall::abi_decode_returns(data)
}
