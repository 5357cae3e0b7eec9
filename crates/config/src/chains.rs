//! Per-chain RPC configuration loaded from a JSON file.

use std::{collections::BTreeMap, fmt, path::Path};

use alloy_primitives::Address;
use eyre::{Context, Result, bail, eyre};
use primitives::Chain;
use serde::{Deserialize, Serialize};
use url::Url;

/// Minimum delay to keep between two calls to the same endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawCallDelay", into = "RawCallDelay")]
pub enum CallDelay {
    /// No throttling and no locking at all
    NoLimit,
    /// Wait at least this many milliseconds between calls
    Millis(u64),
}

impl CallDelay {
    /// The configured delay, `None` for [`CallDelay::NoLimit`].
    pub const fn as_millis(&self) -> Option<u64> {
        match self {
            Self::NoLimit => None,
            Self::Millis(ms) => Some(*ms),
        }
    }
}

impl fmt::Display for CallDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLimit => f.write_str(NO_LIMIT),
            Self::Millis(ms) => write!(f, "{ms}ms"),
        }
    }
}

const NO_LIMIT: &str = "no-limit";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawCallDelay {
    Millis(u64),
    Keyword(String),
}

impl TryFrom<RawCallDelay> for CallDelay {
    type Error = String;

    fn try_from(raw: RawCallDelay) -> Result<Self, Self::Error> {
        match raw {
            RawCallDelay::Millis(ms) => Ok(Self::Millis(ms)),
            RawCallDelay::Keyword(keyword) if keyword == NO_LIMIT => Ok(Self::NoLimit),
            RawCallDelay::Keyword(other) => {
                Err(format!("expected a number of milliseconds or \"{NO_LIMIT}\", got {other:?}"))
            }
        }
    }
}

impl From<CallDelay> for RawCallDelay {
    fn from(delay: CallDelay) -> Self {
        match delay {
            CallDelay::NoLimit => Self::Keyword(NO_LIMIT.to_owned()),
            CallDelay::Millis(ms) => Self::Millis(ms),
        }
    }
}

/// What a chain's RPC endpoints can and cannot do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcLimitations {
    /// Minimum delay between two calls to the same RPC endpoint
    pub min_delay_between_calls: CallDelay,
    /// Maximum number of contract addresses in one batched query
    pub max_addresses_per_query: usize,
    /// Maximum number of blocks spanned by one query
    pub max_block_span_per_query: u64,
    /// Whether a state read on the block of a write observes that write
    #[serde(default)]
    pub state_change_visible_on_same_block: bool,
    /// Whether multicall3 `getCurrentBlockTimestamp` works on this chain
    #[serde(default)]
    pub can_read_multicall_block_timestamp: bool,
}

/// Block explorer (Etherscan compatible) settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// API base url, e.g. `https://api.polygonscan.com/api`
    pub url: Url,
    /// API key, if the explorer requires one
    #[serde(default)]
    pub api_key: Option<String>,
    /// Minimum delay between two explorer calls
    #[serde(default = "default_explorer_delay")]
    pub min_delay_between_calls: CallDelay,
    /// Serve historical logs from the explorer instead of the RPC
    #[serde(default)]
    pub use_for_logs: bool,
}

const fn default_explorer_delay() -> CallDelay {
    CallDelay::Millis(1_000)
}

const fn default_work_concurrency() -> usize {
    4
}

const fn default_sample_block_step() -> u64 {
    1_000
}

/// Everything the importer needs to know about one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain identifier
    pub chain: Chain,
    /// RPC endpoints, used round-robin
    pub rpc_endpoints: Vec<Url>,
    /// RPC capabilities and rate limits
    pub limitations: RpcLimitations,
    /// Multicall3 deployment, `None` if the chain has none
    #[serde(default)]
    pub multicall_address: Option<Address>,
    /// Block explorer, used for contract creation lookups and as a log source
    #[serde(default)]
    pub explorer: Option<ExplorerConfig>,
    /// Maximum number of in-flight queries for this chain
    #[serde(default = "default_work_concurrency")]
    pub work_concurrency: usize,
    /// Share prices are sampled on blocks that are a multiple of this step
    #[serde(default = "default_sample_block_step")]
    pub sample_block_step: u64,
}

impl ChainConfig {
    fn validate(&self) -> Result<()> {
        if self.rpc_endpoints.is_empty() {
            bail!("chain {} has no rpc endpoints", self.chain);
        }
        if self.limitations.max_addresses_per_query == 0 {
            bail!("chain {}: max_addresses_per_query must be at least 1", self.chain);
        }
        if self.limitations.max_block_span_per_query == 0 {
            bail!("chain {}: max_block_span_per_query must be at least 1", self.chain);
        }
        if self.work_concurrency == 0 {
            bail!("chain {}: work_concurrency must be at least 1", self.chain);
        }
        if self.sample_block_step == 0 {
            bail!("chain {}: sample_block_step must be at least 1", self.chain);
        }
        Ok(())
    }

    /// Whether historical logs come from the explorer.
    pub fn logs_from_explorer(&self) -> bool {
        self.explorer.as_ref().is_some_and(|explorer| explorer.use_for_logs)
    }
}

#[derive(Deserialize)]
struct ChainsFile {
    chains: Vec<ChainConfig>,
}

/// All configured chains, keyed by chain.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<Chain, ChainConfig>,
}

impl ChainRegistry {
    /// Build a registry from already parsed configurations.
    pub fn new(configs: impl IntoIterator<Item = ChainConfig>) -> Result<Self> {
        let mut chains = BTreeMap::new();
        for config in configs {
            config.validate()?;
            let chain = config.chain;
            if chains.insert(chain, config).is_some() {
                bail!("chain {chain} is configured twice");
            }
        }
        Ok(Self { chains })
    }

    /// Parse a `{ "chains": [...] }` document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: ChainsFile = serde_json::from_str(json).wrap_err("invalid chains config")?;
        Self::new(file.chains)
    }

    /// Load and parse the chains file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read chains config {}", path.display()))?;
        Self::from_json_str(&json)
    }

    /// Configuration of `chain`.
    pub fn get(&self, chain: Chain) -> Result<&ChainConfig> {
        self.chains.get(&chain).ok_or_else(|| eyre!("chain {chain} is not configured"))
    }

    /// Configured chains in a stable order.
    pub fn chains(&self) -> impl Iterator<Item = Chain> + '_ {
        self.chains.keys().copied()
    }
}
