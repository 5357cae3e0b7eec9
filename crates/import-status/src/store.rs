use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use eyre::{Result, WrapErr, eyre};
use primitives::{Product, ProductId};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{ContractCreation, ImportStatus, ImportStatusRepository, RangeReport};

/// Source of a product's contract deployment block and time.
#[async_trait]
pub trait ContractCreationLookup: Send + Sync {
    /// Deployment of `product`'s contract.
    async fn contract_creation(&self, product: &Product) -> Result<ContractCreation>;
}

/// Read and merge access to import statuses.
///
/// Every mutation of one product runs under that product's lock, so
/// concurrent merges for the same product are applied one after the other.
pub struct ImportStatusStore {
    repository: Arc<dyn ImportStatusRepository>,
    locks: DashMap<ProductId, Arc<Mutex<()>>>,
}

impl fmt::Debug for ImportStatusStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportStatusStore")
            .field("repository", &self.repository)
            .field("locked_products", &self.locks.len())
            .finish()
    }
}

impl ImportStatusStore {
    /// Store backed by `repository`.
    pub fn new(repository: Arc<dyn ImportStatusRepository>) -> Self {
        Self { repository, locks: DashMap::new() }
    }

    fn lock(&self, product_id: ProductId) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(product_id).or_default())
    }

    /// Current status of `product_id`.
    pub async fn get(&self, product_id: ProductId) -> Result<Option<ImportStatus>> {
        self.repository
            .load(product_id)
            .await
            .wrap_err_with(|| format!("failed to load import status of product {product_id}"))
    }

    /// Current statuses of the stored products among `product_ids`.
    pub async fn get_many(&self, product_ids: &[ProductId]) -> Result<Vec<ImportStatus>> {
        self.repository.load_many(product_ids).await.wrap_err("failed to load import statuses")
    }

    /// Status of `product`, created from its contract deployment if missing.
    pub async fn ensure_exists(
        &self,
        product: &Product,
        lookup: &dyn ContractCreationLookup,
    ) -> Result<ImportStatus> {
        let lock = self.lock(product.id);
        let _guard = lock.lock().await;

        if let Some(status) = self.get(product.id).await? {
            return Ok(status);
        }

        let creation = lookup.contract_creation(product).await.wrap_err_with(|| {
            format!("failed to find contract creation of product {}", product.id)
        })?;
        let status = ImportStatus::new(product.id, creation);
        self.repository.save(&status).await.wrap_err("failed to create import status")?;
        info!(
            product = %product.id,
            name = %product.name,
            chain = %product.chain,
            created_at_block = creation.block_number,
            "Created import status"
        );
        Ok(status)
    }

    /// Merge `reports` into the stored status of `product_id` and return the result.
    pub async fn apply_batch_result(
        &self,
        product_id: ProductId,
        reports: &[RangeReport],
    ) -> Result<ImportStatus> {
        let lock = self.lock(product_id);
        let _guard = lock.lock().await;

        let mut status = self
            .get(product_id)
            .await?
            .ok_or_else(|| eyre!("no import status for product {product_id}"))?;
        status.apply_reports(reports, Utc::now());
        self.repository
            .save(&status)
            .await
            .wrap_err_with(|| format!("failed to save import status of product {product_id}"))?;

        debug!(
            product = %product_id,
            reports = reports.len(),
            covered = status.covered_ranges.len(),
            to_retry = status.to_retry.len(),
            "Merged range reports"
        );
        Ok(status)
    }
}
