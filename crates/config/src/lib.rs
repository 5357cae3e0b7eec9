//! Vaultscope configuration
use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use primitives::Chain;
use url::Url;

/// Per-chain RPC configuration file
pub mod chains;

pub use chains::{CallDelay, ChainConfig, ChainRegistry, ExplorerConfig, RpcLimitations};

/// Clickhouse database configuration options
#[derive(Debug, Clone, Parser)]
pub struct ClickhouseOpts {
    /// Clickhouse URL
    #[clap(long = "clickhouse-url", env = "CLICKHOUSE_URL", default_value = "http://localhost:8123")]
    pub url: Url,
    /// Clickhouse database
    #[clap(long = "clickhouse-db", env = "CLICKHOUSE_DB", default_value = "vaultscope")]
    pub db: String,
    /// Clickhouse username
    #[clap(long = "clickhouse-username", env = "CLICKHOUSE_USERNAME", default_value = "default")]
    pub username: String,
    /// Clickhouse password
    #[clap(long = "clickhouse-password", env = "CLICKHOUSE_PASSWORD", default_value = "")]
    pub password: String,
}

/// Import scheduling and batching options
#[derive(Debug, Clone, Parser)]
pub struct ImportOpts {
    /// Path to the JSON chains configuration
    #[clap(long, env = "CHAINS_CONFIG_PATH")]
    pub chains_config: PathBuf,
    /// Path to the JSON list of products to import
    #[clap(long, env = "PRODUCTS_PATH")]
    pub products: PathBuf,
    /// Only import these chains (comma separated). Defaults to every configured chain.
    #[clap(long, env = "IMPORT_CHAINS", value_delimiter = ',')]
    pub chains: Vec<Chain>,
    /// Seconds between two import cycles of a chain
    #[clap(long, env = "IMPORT_POLL_INTERVAL_SECS", default_value = "300")]
    pub poll_interval_secs: u64,
    /// Maximum number of single-product queries per product and cycle
    #[clap(long, env = "IMPORT_MAX_QUERIES_PER_PRODUCT", default_value = "10")]
    pub max_queries_per_product: usize,
    /// Re-import the full history, ignoring covered and retry ranges
    #[clap(long, env = "IMPORT_IGNORE_STATE")]
    pub ignore_import_state: bool,
    /// Maximum time import reports are buffered before being merged
    #[clap(long, env = "IMPORT_STATUS_FLUSH_INTERVAL_MS", default_value = "5000")]
    pub status_flush_interval_ms: u64,
    /// Number of buffered import reports that forces a merge
    #[clap(long, env = "IMPORT_STATUS_FLUSH_MAX_REPORTS", default_value = "500")]
    pub status_flush_max_reports: usize,
    /// Run a single import cycle per chain and exit
    #[clap(long, env = "RUN_ONCE")]
    pub run_once: bool,
}

/// CLI options for vaultscope
#[derive(Debug, Clone, Parser)]
pub struct Opts {
    /// Clickhouse database configuration
    #[clap(flatten)]
    pub clickhouse: ClickhouseOpts,

    /// Import configuration
    #[clap(flatten)]
    pub import: ImportOpts,

    /// Address of the health and progress server
    #[clap(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    pub health_addr: SocketAddr,

    /// Keep import status in memory and log imported data instead of writing it
    #[clap(long, env = "DRY_RUN")]
    pub dry_run: bool,

    /// If set, drop & re-create all tables (local/dev only)
    #[clap(long)]
    pub reset_db: bool,
}
