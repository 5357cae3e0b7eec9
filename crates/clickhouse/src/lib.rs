//! ClickHouse persistence for Vaultscope: import statuses and imported vault data.

/// Row types
pub mod models;
/// Table definitions
pub mod schema;
mod status;
/// Byte wrappers for fixed size columns
pub mod types;
/// Schema management and data insertion
pub mod writer;

pub use models::{ImportStatusRow, SharePriceRow, VaultTransferRow};
pub use status::ClickhouseImportStatusRepository;
pub use types::{AddressBytes, HashBytes, U256Bytes};
pub use writer::ClickhouseWriter;
