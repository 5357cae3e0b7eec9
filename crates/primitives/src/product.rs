//! Identifiers for the products whose history is imported and the chains they live on.

use std::{fmt, str::FromStr};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable key of a product across runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ProductId(pub u64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ProductId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Unknown chain name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown chain: {0}")]
pub struct UnknownChain(pub String);

macro_rules! chains {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// EVM chains the importer knows about.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(rename_all = "lowercase")]
        #[allow(missing_docs)]
        pub enum Chain {
            $($variant),+
        }

        impl Chain {
            /// Every known chain.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Lowercase chain name, as used in configuration and storage.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl FromStr for Chain {
            type Err = UnknownChain;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    other => Err(UnknownChain(other.to_owned())),
                }
            }
        }
    };
}

chains! {
    Arbitrum => "arbitrum",
    Aurora => "aurora",
    Avax => "avax",
    Base => "base",
    Bsc => "bsc",
    Canto => "canto",
    Celo => "celo",
    Cronos => "cronos",
    Ethereum => "ethereum",
    Fantom => "fantom",
    Fuse => "fuse",
    Harmony => "harmony",
    Heco => "heco",
    Kava => "kava",
    Linea => "linea",
    Mantle => "mantle",
    Metis => "metis",
    Moonbeam => "moonbeam",
    Moonriver => "moonriver",
    Optimism => "optimism",
    Polygon => "polygon",
    Zkevm => "zkevm",
    Zksync => "zksync",
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of contract a product is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    /// Auto-compounding vault with a share token and a price per full share
    StandardVault,
    /// Governance vault paying rewards, no share price
    GovVault,
    /// Boost staking contract
    Boost,
}

impl ProductKind {
    /// Whether the contract exposes `getPricePerFullShare()`.
    pub const fn has_share_price(&self) -> bool {
        matches!(self, Self::StandardVault)
    }
}

/// A contract whose history is imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Stable product key
    pub id: ProductId,
    /// Chain the contract is deployed on
    pub chain: Chain,
    /// Contract kind
    pub kind: ProductKind,
    /// Contract address
    pub contract_address: Address,
    /// Human readable name, only used in logs
    #[serde(default)]
    pub name: String,
}
