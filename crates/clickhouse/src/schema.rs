/// Table schema definition
#[derive(Debug)]
pub struct TableSchema {
    /// Table name
    pub name: &'static str,
    /// Column definitions
    pub columns: &'static str,
    /// Table engine
    pub engine: &'static str,
    /// Sorting key, also the deduplication key of replacing tables
    pub order_by: &'static str,
}

/// Import progress, one live row per importer and product; the highest `version` wins.
pub const IMPORT_STATUS: TableSchema = TableSchema {
    name: "import_status",
    columns: "import_kind LowCardinality(String),
             product_id UInt64,
             contract_created_at_block UInt64,
             contract_created_date DateTime64(3, 'UTC'),
             chain_latest_block_number UInt64,
             covered_ranges Array(Tuple(UInt64, UInt64)),
             to_retry Array(Tuple(UInt64, UInt64)),
             last_import_date Nullable(DateTime64(3, 'UTC')),
             version UInt64",
    engine: "ReplacingMergeTree(version)",
    order_by: "import_kind, product_id",
};

/// Vault share token transfers. Re-imported ranges replace their rows.
pub const VAULT_TRANSFERS: TableSchema = TableSchema {
    name: "vault_transfers",
    columns: "chain LowCardinality(String),
             product_id UInt64,
             block_number UInt64,
             tx_hash FixedString(32),
             log_index UInt64,
             sender FixedString(20),
             receiver FixedString(20),
             value UInt256,
             inserted_at DateTime64(3) DEFAULT now64()",
    engine: "ReplacingMergeTree(inserted_at)",
    order_by: "product_id, block_number, tx_hash, log_index",
};

/// Sampled `getPricePerFullShare()` values.
pub const VAULT_SHARE_PRICES: TableSchema = TableSchema {
    name: "vault_share_prices",
    columns: "chain LowCardinality(String),
             product_id UInt64,
             block_number UInt64,
             block_ts UInt64,
             price_per_full_share UInt256,
             inserted_at DateTime64(3) DEFAULT now64()",
    engine: "ReplacingMergeTree(inserted_at)",
    order_by: "product_id, block_number",
};

/// Every table, in creation order
pub const TABLE_SCHEMAS: &[TableSchema] = &[IMPORT_STATUS, VAULT_TRANSFERS, VAULT_SHARE_PRICES];
