use chrono::{DateTime, Utc};
use primitives::{
    BlockRange, ProductId,
    range::{exclude_many_from_many, merge_ranges},
};
use serde::{Deserialize, Serialize};

/// Where and when a product's contract was deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractCreation {
    /// Deployment block
    pub block_number: u64,
    /// Deployment time
    pub datetime: DateTime<Utc>,
}

/// Outcome of one attempt to import `range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeReport {
    /// Attempted range
    pub range: BlockRange,
    /// Whether the data of the whole range was fetched and stored
    pub success: bool,
    /// Chain head known when the attempt was planned
    pub latest_block_number: u64,
}

/// Import progress of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStatus {
    /// Product
    pub product_id: ProductId,
    /// Deployment block of the product contract
    pub contract_created_at_block: u64,
    /// Deployment time of the product contract
    pub contract_created_date: DateTime<Utc>,
    /// Highest chain head seen in a report, never decreases
    pub chain_latest_block_number: u64,
    /// Ranges attempted at least once, merged
    pub covered_ranges: Vec<BlockRange>,
    /// Ranges whose last attempt failed, merged
    pub to_retry: Vec<BlockRange>,
    /// Time of the last merge
    pub last_import_date: Option<DateTime<Utc>>,
}

impl ImportStatus {
    /// A product nothing was imported for yet.
    pub const fn new(product_id: ProductId, creation: ContractCreation) -> Self {
        Self {
            product_id,
            contract_created_at_block: creation.block_number,
            contract_created_date: creation.datetime,
            chain_latest_block_number: creation.block_number,
            covered_ranges: Vec::new(),
            to_retry: Vec::new(),
            last_import_date: None,
        }
    }

    /// Merge `reports` into the status.
    ///
    /// Every attempted range becomes covered. Successful ranges leave the retry
    /// list before failed ones join it, so the outcome of one call does not
    /// depend on the order of `reports`.
    pub fn apply_reports(&mut self, reports: &[RangeReport], now: DateTime<Utc>) {
        let mut covered = self.covered_ranges.clone();
        covered.extend(reports.iter().map(|report| report.range));
        self.covered_ranges = merge_ranges(&covered);

        let succeeded: Vec<_> =
            reports.iter().filter(|report| report.success).map(|report| report.range).collect();
        let mut to_retry = exclude_many_from_many(&self.to_retry, &succeeded);
        to_retry.extend(reports.iter().filter(|report| !report.success).map(|report| report.range));
        self.to_retry = merge_ranges(&to_retry);

        if let Some(latest) = reports.iter().map(|report| report.latest_block_number).max() {
            self.chain_latest_block_number = self.chain_latest_block_number.max(latest);
        }
        self.last_import_date = Some(now);
    }
}
