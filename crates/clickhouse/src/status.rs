use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use clickhouse::Client;
use derive_more::Debug;
use eyre::{Context, Result};
use import_status::{ImportStatus, ImportStatusRepository};
use primitives::ProductId;
use url::Url;

use crate::{models::ImportStatusRow, schema::IMPORT_STATUS};

/// Import statuses of one importer, stored in a `ReplacingMergeTree`.
///
/// Every save appends a row with a higher version; reads use `FINAL` so only
/// the latest row of each product is returned.
#[derive(Clone, Debug)]
pub struct ClickhouseImportStatusRepository {
    #[debug(skip)]
    base: Client,
    db_name: String,
    import_kind: String,
}

impl ClickhouseImportStatusRepository {
    /// Repository over the `import_kind` rows of the `import_status` table of `db_name`.
    pub fn new(
        url: Url,
        db_name: String,
        username: String,
        password: String,
        import_kind: impl Into<String>,
    ) -> Self {
        let client = Client::default()
            .with_url(url)
            .with_database(db_name.clone())
            .with_user(username)
            .with_password(password);
        Self { base: client, db_name, import_kind: import_kind.into() }
    }

    fn select(&self, filter: &str) -> String {
        format!(
            "SELECT ?fields FROM {}.{} FINAL WHERE import_kind = ? AND {filter} ORDER BY product_id",
            self.db_name, IMPORT_STATUS.name
        )
    }
}

/// Nanoseconds since the epoch, increasing across saves of one process.
fn next_version() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[async_trait]
impl ImportStatusRepository for ClickhouseImportStatusRepository {
    async fn load(&self, product_id: ProductId) -> Result<Option<ImportStatus>> {
        let row = self
            .base
            .query(&self.select("product_id = ?"))
            .bind(&self.import_kind)
            .bind(product_id.0)
            .fetch_optional::<ImportStatusRow>()
            .await
            .wrap_err_with(|| format!("Failed to load import status of {product_id}"))?;
        row.map(ImportStatus::try_from).transpose()
    }

    async fn load_many(&self, product_ids: &[ProductId]) -> Result<Vec<ImportStatus>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<u64> = product_ids.iter().map(|id| id.0).collect();
        let rows = self
            .base
            .query(&self.select("has(?, product_id)"))
            .bind(&self.import_kind)
            .bind(ids)
            .fetch_all::<ImportStatusRow>()
            .await
            .wrap_err("Failed to load import statuses")?;
        rows.into_iter().map(ImportStatus::try_from).collect()
    }

    async fn save(&self, status: &ImportStatus) -> Result<()> {
        let row = ImportStatusRow::new(status, &self.import_kind, next_version());
        let mut insert = self.base.insert(IMPORT_STATUS.name)?;
        insert.write(&row).await?;
        insert
            .end()
            .await
            .wrap_err_with(|| format!("Failed to save import status of {}", status.product_id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use clickhouse::test::{Mock, handlers};
    use primitives::BlockRange;

    use super::*;

    fn repository(mock: &Mock) -> ClickhouseImportStatusRepository {
        let url = Url::parse(mock.url()).unwrap();
        ClickhouseImportStatusRepository::new(
            url,
            "db".to_owned(),
            "user".into(),
            "pass".into(),
            "transfers",
        )
    }

    fn status() -> ImportStatus {
        ImportStatus {
            product_id: ProductId(12),
            contract_created_at_block: 1_000,
            contract_created_date: Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap(),
            chain_latest_block_number: 5_000,
            covered_ranges: vec![BlockRange { from: 1_000, to: 5_000 }],
            to_retry: vec![BlockRange { from: 2_000, to: 2_100 }],
            last_import_date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn load_decodes_row() {
        let mock = Mock::new();
        mock.add(handlers::provide(vec![ImportStatusRow::new(&status(), "transfers", 1)]));

        let loaded = repository(&mock).load(ProductId(12)).await.unwrap();
        assert_eq!(loaded, Some(status()));
    }

    #[tokio::test]
    async fn load_missing_product() {
        let mock = Mock::new();
        mock.add(handlers::provide(Vec::<ImportStatusRow>::new()));

        assert_eq!(repository(&mock).load(ProductId(12)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_appends_versioned_row() {
        let mock = Mock::new();
        let ctl = mock.add(handlers::record::<ImportStatusRow>());

        repository(&mock).save(&status()).await.unwrap();

        let rows: Vec<ImportStatusRow> = ctl.collect().await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].version > 0);
        assert_eq!(rows[0].import_kind, "transfers");
        assert_eq!(ImportStatus::try_from(rows[0].clone()).unwrap(), status());
    }

    #[tokio::test]
    async fn load_many_without_ids_skips_query() {
        let mock = Mock::new();
        assert!(repository(&mock).load_many(&[]).await.unwrap().is_empty());
    }
}
