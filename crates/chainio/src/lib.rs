//! `ChainIO` holds the contract bindings used to read vault data on chain.

/// Chain specific `eth_call` encoding
pub mod encoding;
/// Multicall3 batching helpers
pub mod multicall;
/// Vault share token reads
pub mod vault;

pub use encoding::CallEncoding;

use alloy::{
    providers::{RootProvider, fillers::FillProvider, utils::JoinedRecommendedFillers},
    sol,
};

/// Alias to the default provider with all recommended fillers (read-only).
pub type DefaultProvider = FillProvider<JoinedRecommendedFillers, RootProvider>;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IMulticall3 {
        #[derive(Default)]
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        #[derive(Default)]
        struct Call3Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Call3Result[] memory returnData);

        function getCurrentBlockTimestamp() external view returns (uint256 timestamp);
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IERC20 {
        #[derive(Default)]
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IBeefyVault {
        /// Underlying tokens per 1e18 shares.
        function getPricePerFullShare() external view returns (uint256);
    }
}
