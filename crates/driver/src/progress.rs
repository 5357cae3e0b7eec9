use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use import_status::ImportStatus;
use primitives::{
    Chain, ProductId,
    range::{intersect_many, total_length},
};
use runtime::ProgressSource;
use serde::Serialize;
use serde_json::{Value, json};

/// Import progress of one product for one importer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductProgress {
    /// Importer kind
    pub importer: &'static str,
    /// Product
    pub product_id: ProductId,
    /// Product chain
    pub chain: Chain,
    /// First block of the product history
    pub contract_created_at_block: u64,
    /// Last chain head the product was imported against
    pub chain_latest_block_number: u64,
    /// Blocks attempted at least once
    pub covered_blocks: u64,
    /// Blocks imported successfully
    pub imported_blocks: u64,
    /// Number of ranges waiting for a retry
    pub to_retry: usize,
    /// Share of the history imported, between 0 and 1
    pub completion: f64,
    /// Time of the last status update
    pub last_import_date: Option<DateTime<Utc>>,
}

impl ProductProgress {
    fn new(importer: &'static str, chain: Chain, status: &ImportStatus) -> Self {
        let covered_blocks = total_length(&status.covered_ranges);
        let failed_blocks = status
            .covered_ranges
            .iter()
            .map(|range| total_length(&intersect_many(&status.to_retry, range)))
            .sum::<u64>();
        let imported_blocks = covered_blocks.saturating_sub(failed_blocks);
        let history = status
            .chain_latest_block_number
            .saturating_sub(status.contract_created_at_block)
            .saturating_add(1);

        Self {
            importer,
            product_id: status.product_id,
            chain,
            contract_created_at_block: status.contract_created_at_block,
            chain_latest_block_number: status.chain_latest_block_number,
            covered_blocks,
            imported_blocks,
            to_retry: status.to_retry.len(),
            completion: (imported_blocks as f64 / history as f64).min(1.0),
            last_import_date: status.last_import_date,
        }
    }
}

/// Latest known progress of every imported product, shared with the health server.
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    entries: Arc<DashMap<(&'static str, ProductId), ProductProgress>>,
}

impl ProgressBoard {
    /// Empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the statuses of `importer` on `chain`.
    pub fn update(&self, importer: &'static str, chain: Chain, statuses: &[ImportStatus]) {
        for status in statuses {
            self.entries
                .insert((importer, status.product_id), ProductProgress::new(importer, chain, status));
        }
    }

    /// Every entry, by importer then product.
    pub fn snapshot(&self) -> Vec<ProductProgress> {
        let mut entries: Vec<_> = self.entries.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by_key(|entry| (entry.importer, entry.product_id));
        entries
    }
}

impl ProgressSource for ProgressBoard {
    fn progress(&self) -> Value {
        let products = self.snapshot();
        let with_retries = products.iter().filter(|product| product.to_retry > 0).count();
        json!({
            "products": products,
            "total": products.len(),
            "with_retries": with_retries,
        })
    }
}
