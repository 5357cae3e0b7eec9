use std::fmt;

use async_trait::async_trait;
use clickhouse::{ClickhouseWriter, SharePriceRow, VaultTransferRow};
use eyre::{Result, WrapErr};
use tracing::{debug, info};

use crate::records::{ImportedRecord, RecordData};

/// Destination of imported records.
#[async_trait]
pub trait DataSink: Send + Sync + fmt::Debug {
    /// Store `records`. Either all of them are stored or the call fails.
    async fn write(&self, records: &[ImportedRecord]) -> Result<()>;
}

/// Stores records in the `vault_transfers` and `vault_share_prices` tables.
#[derive(Debug, Clone)]
pub struct ClickhouseSink {
    writer: ClickhouseWriter,
}

impl ClickhouseSink {
    /// Sink writing through `writer`.
    pub const fn new(writer: ClickhouseWriter) -> Self {
        Self { writer }
    }
}

fn rows(records: &[ImportedRecord]) -> (Vec<VaultTransferRow>, Vec<SharePriceRow>) {
    let mut transfers = Vec::new();
    let mut prices = Vec::new();
    for record in records {
        let chain = record.chain.as_str().to_owned();
        match &record.data {
            RecordData::Transfer { transaction_hash, log_index, from, to, value } => {
                transfers.push(VaultTransferRow {
                    chain,
                    product_id: record.product_id.0,
                    block_number: record.block_number,
                    tx_hash: (*transaction_hash).into(),
                    log_index: *log_index,
                    sender: (*from).into(),
                    receiver: (*to).into(),
                    value: (*value).into(),
                });
            }
            RecordData::SharePrice { block_timestamp, price_per_full_share } => {
                prices.push(SharePriceRow {
                    chain,
                    product_id: record.product_id.0,
                    block_number: record.block_number,
                    block_ts: *block_timestamp,
                    price_per_full_share: (*price_per_full_share).into(),
                });
            }
        }
    }
    (transfers, prices)
}

#[async_trait]
impl DataSink for ClickhouseSink {
    async fn write(&self, records: &[ImportedRecord]) -> Result<()> {
        let (transfers, prices) = rows(records);
        self.writer.insert_transfers(&transfers).await.wrap_err("Failed to store transfers")?;
        self.writer.insert_share_prices(&prices).await.wrap_err("Failed to store share prices")
    }
}

/// Dry run sink: logs what would be stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl DataSink for LoggingSink {
    async fn write(&self, records: &[ImportedRecord]) -> Result<()> {
        let transfers =
            records.iter().filter(|record| matches!(record.data, RecordData::Transfer { .. })).count();
        info!(transfers, share_prices = records.len() - transfers, "Dry run, records not stored");
        for record in records {
            debug!(product = %record.product_id, block = record.block_number, data = ?record.data, "Record");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, B256, U256};
    use clickhouse_rs::test::{Mock, handlers};
    use primitives::{Chain, ProductId};
    use url::Url;

    use super::*;

    fn records() -> Vec<ImportedRecord> {
        vec![
            ImportedRecord {
                product_id: ProductId(1),
                chain: Chain::Polygon,
                block_number: 10,
                data: RecordData::Transfer {
                    transaction_hash: B256::repeat_byte(3),
                    log_index: 4,
                    from: Address::ZERO,
                    to: Address::repeat_byte(5),
                    value: U256::from(6),
                },
            },
            ImportedRecord {
                product_id: ProductId(2),
                chain: Chain::Polygon,
                block_number: 20,
                data: RecordData::SharePrice {
                    block_timestamp: 1_700_000_000,
                    price_per_full_share: U256::from(10).pow(U256::from(18)),
                },
            },
        ]
    }

    #[test]
    fn splits_records_by_table() {
        let (transfers, prices) = rows(&records());
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].chain, "polygon");
        assert_eq!(transfers[0].log_index, 4);
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].product_id, 2);
        assert_eq!(<U256 as From<_>>::from(prices[0].price_per_full_share), U256::from(10).pow(U256::from(18)));
    }

    #[tokio::test]
    async fn clickhouse_sink_inserts_both_tables() {
        let mock = Mock::new();
        let transfers = mock.add(handlers::record::<VaultTransferRow>());
        let prices = mock.add(handlers::record::<SharePriceRow>());
        let url = Url::parse(mock.url()).unwrap();
        let sink = ClickhouseSink::new(ClickhouseWriter::new(
            url,
            "db".to_owned(),
            "user".into(),
            "pass".into(),
        ));

        sink.write(&records()).await.unwrap();

        let transfers: Vec<VaultTransferRow> = transfers.collect().await;
        let prices: Vec<SharePriceRow> = prices.collect().await;
        assert_eq!(transfers[0].block_number, 10);
        assert_eq!(prices[0].block_ts, 1_700_000_000);
    }
}
