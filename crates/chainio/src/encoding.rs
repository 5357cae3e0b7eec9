use alloy_primitives::{Address, Bytes};
use alloy_rpc_types_eth::{TransactionInput, TransactionRequest};
use primitives::Chain;

/// How calldata is placed in an `eth_call` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEncoding {
    /// Calldata in the `input` field
    Standard,
    /// Calldata in the legacy `data` field only. Some nodes reject `input`.
    LegacyData,
}

/// Chains whose nodes need something other than [`CallEncoding::Standard`].
const CHAIN_ENCODINGS: &[(Chain, CallEncoding)] =
    &[(Chain::Harmony, CallEncoding::LegacyData), (Chain::Heco, CallEncoding::LegacyData)];

impl CallEncoding {
    /// Encoding used for `chain`.
    pub fn for_chain(chain: Chain) -> Self {
        CHAIN_ENCODINGS
            .iter()
            .find_map(|(known, encoding)| (*known == chain).then_some(*encoding))
            .unwrap_or(Self::Standard)
    }

    /// Wrap `calldata` the way this encoding expects.
    pub fn input(self, calldata: Bytes) -> TransactionInput {
        match self {
            Self::Standard => TransactionInput::new(calldata),
            Self::LegacyData => TransactionInput { input: None, data: Some(calldata) },
        }
    }

    /// A read-only call of `to` with `calldata`.
    pub fn call_request(self, to: Address, calldata: Bytes) -> TransactionRequest {
        TransactionRequest::default().to(to).input(self.input(calldata))
    }
}
