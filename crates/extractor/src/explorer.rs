use alloy::primitives::{Address, B256, Bytes};
use config::ExplorerConfig;
use network::classify::is_no_records_found;
use primitives::{BlockRange, Chain};
use reqwest::Client as HttpClient;
use serde::{Deserialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::RawLog;

/// Explorer API failure.
#[derive(Debug, Error)]
pub enum ExplorerError {
    /// Transport or HTTP status error
    #[error("explorer request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The API answered with an error status
    #[error("explorer error: {message}: {result}")]
    Api {
        /// Status message
        message: String,
        /// Error details sent in place of the result
        result: String,
    },
    /// The answer could not be interpreted
    #[error("invalid explorer response: {0}")]
    Decode(String),
}

/// Contract deployment as reported by an explorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractCreationInfo {
    /// Deployment block
    pub block_number: u64,
    /// Deployment timestamp in seconds, when the explorer reports it
    pub timestamp: Option<u64>,
    /// Deployment transaction
    pub transaction_hash: B256,
}

#[derive(Deserialize)]
struct ApiResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreationEntry {
    tx_hash: B256,
    block_number: Option<String>,
    timestamp: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    address: Address,
    topics: Vec<Option<B256>>,
    data: Bytes,
    block_number: String,
    transaction_hash: B256,
    log_index: String,
}

/// Client for an Etherscan compatible block explorer API.
#[derive(Debug, Clone)]
pub struct ExplorerClient {
    http: HttpClient,
    chain: Chain,
    url: Url,
    api_key: Option<String>,
}

impl ExplorerClient {
    /// Create a client for `chain`'s explorer.
    pub fn new(chain: Chain, config: &ExplorerConfig) -> Self {
        Self {
            http: HttpClient::new(),
            chain,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// Chain served by this explorer.
    pub const fn chain(&self) -> Chain {
        self.chain
    }

    async fn query<T: DeserializeOwned + Default>(
        &self,
        params: &[(&str, String)],
    ) -> Result<T, ExplorerError> {
        let mut request = self.http.get(self.url.clone()).query(params);
        if let Some(api_key) = &self.api_key {
            request = request.query(&[("apikey", api_key)]);
        }
        let response: ApiResponse = request.send().await?.error_for_status()?.json().await?;

        if response.status == "1" {
            return serde_json::from_value(response.result)
                .map_err(|err| ExplorerError::Decode(err.to_string()));
        }

        let result = match response.result {
            serde_json::Value::String(text) => text,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        if is_no_records_found(&response.message) || is_no_records_found(&result) {
            debug!(chain = %self.chain, "explorer returned no records");
            return Ok(T::default());
        }
        Err(ExplorerError::Api { message: response.message, result })
    }

    /// Deployment of `address`, `None` if the explorer doesn't know the contract.
    pub async fn contract_creation(
        &self,
        address: Address,
    ) -> Result<Option<ContractCreationInfo>, ExplorerError> {
        let entries: Vec<CreationEntry> = self
            .query(&[
                ("module", "contract".to_owned()),
                ("action", "getcontractcreation".to_owned()),
                ("contractaddresses", address.to_string()),
            ])
            .await?;
        let Some(entry) = entries.into_iter().next() else { return Ok(None) };

        let block_number = entry
            .block_number
            .as_deref()
            .ok_or_else(|| ExplorerError::Decode(format!("no creation block for {address}")))
            .and_then(parse_number)?;
        let timestamp = entry.timestamp.as_deref().map(parse_number).transpose()?;

        Ok(Some(ContractCreationInfo {
            block_number,
            timestamp,
            transaction_hash: entry.tx_hash,
        }))
    }

    /// Logs with signature `topic0` emitted by `address` within `range`.
    pub async fn get_logs(
        &self,
        address: Address,
        range: BlockRange,
        topic0: B256,
    ) -> Result<Vec<RawLog>, ExplorerError> {
        let entries: Vec<LogEntry> = self
            .query(&[
                ("module", "logs".to_owned()),
                ("action", "getLogs".to_owned()),
                ("address", address.to_string()),
                ("fromBlock", range.from.to_string()),
                ("toBlock", range.to.to_string()),
                ("topic0", topic0.to_string()),
            ])
            .await?;

        entries
            .into_iter()
            .map(|entry| -> Result<RawLog, ExplorerError> {
                Ok(RawLog {
                    address: entry.address,
                    block_number: parse_number(&entry.block_number)?,
                    transaction_hash: entry.transaction_hash,
                    log_index: parse_number(&entry.log_index)?,
                    topics: entry.topics.into_iter().flatten().collect(),
                    data: entry.data,
                })
            })
            .collect()
    }
}

/// Explorers mix decimal and `0x` prefixed hex quantities; a bare `0x` is zero.
fn parse_number(value: &str) -> Result<u64, ExplorerError> {
    let parsed = match value.strip_prefix("0x") {
        Some("") => Ok(0),
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| ExplorerError::Decode(format!("invalid number {value:?}: {err}")))
}
