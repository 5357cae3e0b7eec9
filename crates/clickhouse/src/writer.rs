//! Schema management and batched inserts of imported vault data

use clickhouse::{Client, Row};
use derive_more::Debug;
use eyre::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::{
    models::{SharePriceRow, VaultTransferRow},
    schema::{TABLE_SCHEMAS, TableSchema, VAULT_SHARE_PRICES, VAULT_TRANSFERS},
};

/// `ClickHouse` writer client for vaultscope (data insertion and migrations)
#[derive(Clone, Debug)]
pub struct ClickhouseWriter {
    /// Base client
    #[debug(skip)]
    base: Client,
    /// Database name
    db_name: String,
}

impl ClickhouseWriter {
    /// Create a new `ClickHouse` writer client
    pub fn new(url: Url, db_name: String, username: String, password: String) -> Self {
        let client = Client::default()
            .with_url(url)
            .with_database(db_name.clone())
            .with_user(username)
            .with_password(password);

        Self { base: client, db_name }
    }

    /// Create a table with the given schema
    async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (
                {}
            ) ENGINE = {}
            ORDER BY ({})",
            self.db_name, schema.name, schema.columns, schema.engine, schema.order_by
        );

        self.base
            .query(&query)
            .execute()
            .await
            .wrap_err_with(|| format!("Failed to create {} table", schema.name))
    }

    /// Drop a table if it exists
    async fn drop_table(&self, table_name: &str) -> Result<()> {
        self.base
            .query(&format!("DROP TABLE IF EXISTS {}.{}", self.db_name, table_name))
            .execute()
            .await
            .wrap_err_with(|| format!("Failed to drop {table_name} table"))
    }

    /// Create the database and every table, dropping them first if `reset`
    pub async fn init_db(&self, reset: bool) -> Result<()> {
        self.base
            .query(&format!("CREATE DATABASE IF NOT EXISTS {}", self.db_name))
            .execute()
            .await
            .wrap_err("Failed to create database")?;

        if reset {
            for schema in TABLE_SCHEMAS {
                self.drop_table(schema.name).await?;
            }
            info!(db_name = %self.db_name, "Database reset complete");
        }

        for schema in TABLE_SCHEMAS {
            self.create_table(schema).await?;
        }
        Ok(())
    }

    async fn insert_rows<R: Row + Serialize>(&self, table: &str, rows: &[R]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut insert = self.base.insert(table)?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await.wrap_err_with(|| format!("Failed to insert into {table}"))?;
        debug!(table, rows = rows.len(), "Inserted rows");
        Ok(())
    }

    /// Insert share token transfers
    pub async fn insert_transfers(&self, rows: &[VaultTransferRow]) -> Result<()> {
        self.insert_rows(VAULT_TRANSFERS.name, rows).await
    }

    /// Insert sampled share prices
    pub async fn insert_share_prices(&self, rows: &[SharePriceRow]) -> Result<()> {
        self.insert_rows(VAULT_SHARE_PRICES.name, rows).await
    }
}
