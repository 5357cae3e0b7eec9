use chrono::{DateTime, Utc};
use clickhouse::Row;
use eyre::{Result, eyre};
use import_status::ImportStatus;
use primitives::{BlockRange, ProductId, Range};
use serde::{Deserialize, Serialize};

use crate::types::{AddressBytes, HashBytes, U256Bytes};

/// Row of `import_status`
#[derive(Debug, Clone, Row, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportStatusRow {
    /// Importer the status belongs to
    pub import_kind: String,
    /// Product
    pub product_id: u64,
    /// Contract deployment block
    pub contract_created_at_block: u64,
    /// Contract deployment time, epoch milliseconds
    pub contract_created_date: i64,
    /// Highest chain head seen
    pub chain_latest_block_number: u64,
    /// Attempted ranges as `(from, to)`
    pub covered_ranges: Vec<(u64, u64)>,
    /// Ranges to retry as `(from, to)`
    pub to_retry: Vec<(u64, u64)>,
    /// Last merge time, epoch milliseconds
    pub last_import_date: Option<i64>,
    /// Row version, the highest one is the live row
    pub version: u64,
}

impl ImportStatusRow {
    /// Row storing `status` of `import_kind` with `version`.
    pub fn new(status: &ImportStatus, import_kind: &str, version: u64) -> Self {
        let pairs = |ranges: &[BlockRange]| ranges.iter().map(|r| (r.from, r.to)).collect();
        Self {
            import_kind: import_kind.to_owned(),
            product_id: status.product_id.0,
            contract_created_at_block: status.contract_created_at_block,
            contract_created_date: status.contract_created_date.timestamp_millis(),
            chain_latest_block_number: status.chain_latest_block_number,
            covered_ranges: pairs(&status.covered_ranges),
            to_retry: pairs(&status.to_retry),
            last_import_date: status.last_import_date.map(|date| date.timestamp_millis()),
            version,
        }
    }
}

fn datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| eyre!("timestamp out of range: {millis}"))
}

fn ranges(pairs: Vec<(u64, u64)>) -> Result<Vec<BlockRange>> {
    pairs.into_iter().map(|(from, to)| Range::new(from, to).map_err(Into::into)).collect()
}

impl TryFrom<ImportStatusRow> for ImportStatus {
    type Error = eyre::Error;

    fn try_from(row: ImportStatusRow) -> Result<Self, Self::Error> {
        Ok(Self {
            product_id: ProductId(row.product_id),
            contract_created_at_block: row.contract_created_at_block,
            contract_created_date: datetime(row.contract_created_date)?,
            chain_latest_block_number: row.chain_latest_block_number,
            covered_ranges: ranges(row.covered_ranges)?,
            to_retry: ranges(row.to_retry)?,
            last_import_date: row.last_import_date.map(datetime).transpose()?,
        })
    }
}

/// Row of `vault_transfers`
#[derive(Debug, Clone, Row, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultTransferRow {
    /// Chain name
    pub chain: String,
    /// Product
    pub product_id: u64,
    /// Block of the transfer
    pub block_number: u64,
    /// Transaction hash
    pub tx_hash: HashBytes,
    /// Log index within the block
    pub log_index: u64,
    /// Share sender
    pub sender: AddressBytes,
    /// Share receiver
    pub receiver: AddressBytes,
    /// Shares transferred
    pub value: U256Bytes,
}

/// Row of `vault_share_prices`
#[derive(Debug, Clone, Row, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharePriceRow {
    /// Chain name
    pub chain: String,
    /// Product
    pub product_id: u64,
    /// Sampled block
    pub block_number: u64,
    /// Block timestamp in seconds
    pub block_ts: u64,
    /// `getPricePerFullShare()` at that block
    pub price_per_full_share: U256Bytes,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn status_row_conversion() {
        let status = ImportStatus {
            product_id: ProductId(3),
            contract_created_at_block: 10,
            contract_created_date: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
            chain_latest_block_number: 900,
            covered_ranges: vec![BlockRange { from: 10, to: 900 }],
            to_retry: vec![BlockRange { from: 20, to: 30 }, BlockRange { from: 50, to: 50 }],
            last_import_date: None,
        };
        let row = ImportStatusRow::new(&status, "transfers", 7);
        assert_eq!(row.to_retry, vec![(20, 30), (50, 50)]);
        assert_eq!(row.version, 7);
        assert_eq!(ImportStatus::try_from(row).unwrap(), status);
    }

    #[test]
    fn rejects_inverted_ranges() {
        let row = ImportStatusRow {
            import_kind: "transfers".to_owned(),
            product_id: 1,
            contract_created_at_block: 0,
            contract_created_date: 0,
            chain_latest_block_number: 0,
            covered_ranges: vec![(5, 1)],
            to_retry: vec![],
            last_import_date: None,
            version: 1,
        };
        assert!(ImportStatus::try_from(row).is_err());
    }
}
