//! Core primitives shared by every Vaultscope crate.

/// Product and chain identifiers
pub mod product;
/// Range algebra over block numbers and timestamps
pub mod range;
/// Millisecond timestamp range domain
pub mod timestamp;

pub use product::{Chain, Product, ProductId, ProductKind, UnknownChain};
pub use range::{Range, RangeError, RangeValue};
pub use timestamp::TimestampMs;

/// Block number range, the unit of import tracking.
pub type BlockRange = Range<u64>;
