use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use eyre::Result;
use primitives::ProductId;

use crate::ImportStatus;

/// Durable storage of [`ImportStatus`] rows.
#[async_trait]
pub trait ImportStatusRepository: Send + Sync + fmt::Debug {
    /// Status of `product_id`, `None` if nothing was stored yet.
    async fn load(&self, product_id: ProductId) -> Result<Option<ImportStatus>>;

    /// Stored statuses among `product_ids`, missing ones are skipped.
    async fn load_many(&self, product_ids: &[ProductId]) -> Result<Vec<ImportStatus>>;

    /// Insert or replace the status of `status.product_id`.
    async fn save(&self, status: &ImportStatus) -> Result<()>;
}

/// Repository kept in process memory, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryImportStatusRepository {
    rows: DashMap<ProductId, ImportStatus>,
}

impl InMemoryImportStatusRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImportStatusRepository for InMemoryImportStatusRepository {
    async fn load(&self, product_id: ProductId) -> Result<Option<ImportStatus>> {
        Ok(self.rows.get(&product_id).map(|row| row.clone()))
    }

    async fn load_many(&self, product_ids: &[ProductId]) -> Result<Vec<ImportStatus>> {
        Ok(product_ids.iter().filter_map(|id| self.rows.get(id).map(|row| row.clone())).collect())
    }

    async fn save(&self, status: &ImportStatus) -> Result<()> {
        self.rows.insert(status.product_id, status.clone());
        Ok(())
    }
}
