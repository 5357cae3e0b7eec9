use alloy::primitives::{Address, B256, U256};
use primitives::{Chain, ProductId};

/// Data read for one contract, before it is attributed to a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRecord {
    /// Contract the data belongs to
    pub contract: Address,
    /// Block the data was read at or emitted in
    pub block_number: u64,
    /// Payload
    pub data: RecordData,
}

/// Imported payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    /// A share token transfer
    Transfer {
        /// Emitting transaction
        transaction_hash: B256,
        /// Position of the log in its block
        log_index: u64,
        /// Sender, zero on mint
        from: Address,
        /// Receiver, zero on burn
        to: Address,
        /// Shares moved
        value: U256,
    },
    /// A sampled price per full share
    SharePrice {
        /// Block timestamp, in seconds
        block_timestamp: u64,
        /// `getPricePerFullShare()` at the block
        price_per_full_share: U256,
    },
}

/// A record attributed to a product, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedRecord {
    /// Owning product
    pub product_id: ProductId,
    /// Chain of the product
    pub chain: Chain,
    /// Block the data was read at or emitted in
    pub block_number: u64,
    /// Payload
    pub data: RecordData,
}
