//! Vaultscope driver: runs the import cycles of every chain and importer.

use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};

use clickhouse::{ClickhouseImportStatusRepository, ClickhouseWriter};
use config::{ChainRegistry, Opts};
use extractor::{ExplorerClient, RpcPool};
use eyre::{Result, WrapErr, bail, eyre};
use import_status::{
    ImportStatusRepository, ImportStatusStore, InMemoryImportStatusRepository, ReportBuffer,
    ReportBufferConfig,
};
use network::{CallGateway, GatewayConfig};
use primitives::{Chain, Product, ProductId};
use tokio::{
    sync::broadcast,
    task::JoinSet,
    time::{self, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::{
    creation::ExplorerCreationLookup,
    importer::{ProductImporter, SharePriceImporter, TransferImporter},
    pipeline::{ImportJob, ImportPipeline, PipelineSettings, ProductImportOutcome},
    progress::ProgressBoard,
    sink::{ClickhouseSink, DataSink, LoggingSink},
};

/// Outcomes of one importer over one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImporterOutcome {
    /// Importer kind
    pub importer: &'static str,
    /// Per product outcomes
    pub products: Vec<ProductImportOutcome>,
}

/// Schedules import cycles.
#[derive(Debug)]
pub struct Driver {
    products: Arc<Vec<Product>>,
    jobs: Arc<Vec<ImportJob>>,
    pipelines: Vec<Arc<ImportPipeline>>,
    progress: ProgressBoard,
    poll_interval: Duration,
    run_once: bool,
}

/// Parse a JSON array of products, rejecting duplicate ids.
pub fn parse_products(json: &str) -> Result<Vec<Product>> {
    let products: Vec<Product> = serde_json::from_str(json).wrap_err("invalid products file")?;
    let mut seen = HashSet::with_capacity(products.len());
    if let Some(duplicate) = products.iter().find(|product| !seen.insert(product.id)) {
        bail!("product {} is listed more than once", duplicate.id);
    }
    Ok(products)
}

/// Read and parse the products file at `path`.
pub fn load_products(path: &Path) -> Result<Vec<Product>> {
    let json = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read products file {}", path.display()))?;
    parse_products(&json)
}

impl Driver {
    /// Build the driver from the command line options.
    pub async fn new(opts: Opts) -> Result<Self> {
        info!("Initializing driver");

        let registry = ChainRegistry::from_file(&opts.import.chains_config)?;
        let products = load_products(&opts.import.products)?;
        let chains: Vec<Chain> = if opts.import.chains.is_empty() {
            registry.chains().collect()
        } else {
            opts.import.chains.clone()
        };

        let sink: Arc<dyn DataSink> = if opts.dry_run {
            info!("Dry run: import statuses stay in memory, records are only logged");
            Arc::new(LoggingSink)
        } else {
            let writer = ClickhouseWriter::new(
                opts.clickhouse.url.clone(),
                opts.clickhouse.db.clone(),
                opts.clickhouse.username.clone(),
                opts.clickhouse.password.clone(),
            );
            writer.init_db(opts.reset_db).await.wrap_err("Failed to initialize ClickHouse")?;
            Arc::new(ClickhouseSink::new(writer))
        };

        let buffer_config = ReportBufferConfig {
            max_reports: opts.import.status_flush_max_reports,
            flush_interval: Duration::from_millis(opts.import.status_flush_interval_ms),
        };
        let importers: [Arc<dyn ProductImporter>; 2] =
            [Arc::new(TransferImporter), Arc::new(SharePriceImporter)];
        let jobs = importers
            .into_iter()
            .map(|importer| {
                let repository: Arc<dyn ImportStatusRepository> = if opts.dry_run {
                    Arc::new(InMemoryImportStatusRepository::new())
                } else {
                    Arc::new(ClickhouseImportStatusRepository::new(
                        opts.clickhouse.url.clone(),
                        opts.clickhouse.db.clone(),
                        opts.clickhouse.username.clone(),
                        opts.clickhouse.password.clone(),
                        importer.kind(),
                    ))
                };
                let store = Arc::new(ImportStatusStore::new(repository));
                let reports = ReportBuffer::spawn(Arc::clone(&store), buffer_config);
                ImportJob { importer, store, reports }
            })
            .collect();

        let settings = PipelineSettings {
            max_queries_per_product: opts.import.max_queries_per_product,
            ignore_import_state: opts.import.ignore_import_state,
            ..Default::default()
        };
        let gateway = CallGateway::in_process(GatewayConfig::default());
        let mut pipelines = Vec::with_capacity(chains.len());
        for chain in chains {
            let config = registry.get(chain)?.clone();
            let pool = RpcPool::from_config(&config)?;
            let explorer = config
                .explorer
                .as_ref()
                .map(|explorer| Arc::new(ExplorerClient::new(chain, explorer)));
            let lookup = Arc::new(ExplorerCreationLookup::new(
                &config,
                gateway.clone(),
                explorer.clone(),
                pool.clone(),
            ));
            info!(%chain, endpoints = pool.len(), explorer = explorer.is_some(), "Chain configured");
            pipelines.push(Arc::new(ImportPipeline::new(
                config,
                gateway.clone(),
                pool,
                explorer,
                lookup,
                Arc::clone(&sink),
                settings,
            )));
        }

        Ok(Self::from_parts(
            products,
            jobs,
            pipelines,
            Duration::from_secs(opts.import.poll_interval_secs),
            opts.import.run_once,
        ))
    }

    pub(crate) fn from_parts(
        products: Vec<Product>,
        jobs: Vec<ImportJob>,
        pipelines: Vec<Arc<ImportPipeline>>,
        poll_interval: Duration,
        run_once: bool,
    ) -> Self {
        let scheduled: HashSet<Chain> = pipelines.iter().map(|pipeline| pipeline.chain()).collect();
        let unscheduled = products.iter().filter(|product| !scheduled.contains(&product.chain)).count();
        if unscheduled > 0 {
            warn!(products = unscheduled, "Some products belong to chains that are not imported");
        }
        Self {
            products: Arc::new(products),
            jobs: Arc::new(jobs),
            pipelines,
            progress: ProgressBoard::new(),
            poll_interval,
            run_once,
        }
    }

    /// Progress board, updated after every cycle.
    pub fn progress(&self) -> ProgressBoard {
        self.progress.clone()
    }

    /// Import the outstanding ranges of the `products` living on `chain`, with every importer.
    pub async fn run_import_cycle(
        &self,
        chain: Chain,
        products: &[Product],
    ) -> Result<Vec<ImporterOutcome>> {
        let pipeline = self
            .pipelines
            .iter()
            .find(|pipeline| pipeline.chain() == chain)
            .ok_or_else(|| eyre!("chain {chain} is not configured for import"))?;
        Ok(import_chain(pipeline, &self.jobs, products, &self.progress).await)
    }

    /// Run one loop per chain until `shutdown` fires, or once per chain when
    /// configured to, then persist the buffered reports.
    pub async fn start_with_shutdown(self, shutdown: broadcast::Sender<()>) -> Result<()> {
        let Self { products, jobs, pipelines, progress, poll_interval, run_once } = self;
        info!(chains = pipelines.len(), products = products.len(), "Starting import loops");

        let mut tasks = JoinSet::new();
        for pipeline in pipelines {
            let (jobs, products, progress) =
                (Arc::clone(&jobs), Arc::clone(&products), progress.clone());
            let shutdown = shutdown.subscribe();
            tasks.spawn(async move {
                chain_loop(&pipeline, &jobs, &products, &progress, poll_interval, run_once, shutdown)
                    .await;
            });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                error!(%err, "Import loop crashed");
            }
        }

        match Arc::try_unwrap(jobs) {
            Ok(jobs) => {
                for job in jobs {
                    if let Err(err) = job.reports.close().await {
                        error!(importer = job.importer.kind(), err = %format!("{err:#}"), "Failed to persist range reports");
                    }
                }
            }
            Err(jobs) => {
                for job in jobs.iter() {
                    if let Err(err) = job.reports.flush().await {
                        error!(importer = job.importer.kind(), err = %format!("{err:#}"), "Failed to persist range reports");
                    }
                }
            }
        }
        info!("Import loops stopped");
        Ok(())
    }
}

async fn chain_loop(
    pipeline: &ImportPipeline,
    jobs: &[ImportJob],
    products: &[Product],
    progress: &ProgressBoard,
    poll_interval: Duration,
    run_once: bool,
    mut shutdown: broadcast::Receiver<()>,
) {
    let chain = pipeline.chain();
    let mut interval = time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(%chain, "Received shutdown signal, stopping import loop");
                return;
            }
            _ = interval.tick() => {}
        }
        tokio::select! {
            _ = shutdown.recv() => {
                info!(%chain, "Received shutdown signal, abandoning import cycle");
                return;
            }
            _ = import_chain(pipeline, jobs, products, progress) => {}
        }
        if run_once {
            return;
        }
    }
}

async fn import_chain(
    pipeline: &ImportPipeline,
    jobs: &[ImportJob],
    products: &[Product],
    progress: &ProgressBoard,
) -> Vec<ImporterOutcome> {
    let chain = pipeline.chain();
    let mut outcomes = Vec::with_capacity(jobs.len());
    for job in jobs {
        let importer = job.importer.kind();
        match pipeline.run_import_cycle(job, products).await {
            Ok(product_outcomes) => {
                let ids: Vec<ProductId> =
                    product_outcomes.iter().map(|outcome| outcome.product_id).collect();
                match job.store.get_many(&ids).await {
                    Ok(statuses) => progress.update(importer, chain, &statuses),
                    Err(err) => {
                        warn!(%chain, importer, err = %format!("{err:#}"), "Failed to refresh progress");
                    }
                }
                outcomes.push(ImporterOutcome { importer, products: product_outcomes });
            }
            Err(err) => {
                error!(%chain, importer, err = %format!("{err:#}"), "Import cycle failed");
            }
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, U256};
    use async_trait::async_trait;
    use chrono::DateTime;
    use config::CallDelay;
    use extractor::ChainReader;
    use import_status::{ContractCreation, ContractCreationLookup};
    use network::Endpoint;
    use primitives::ProductKind;

    use super::*;
    use crate::testing::{FakeReader, chain_config, transfer_log};

    #[derive(Debug)]
    struct Deployed;

    #[async_trait]
    impl ContractCreationLookup for Deployed {
        async fn contract_creation(&self, _product: &Product) -> Result<ContractCreation> {
            Ok(ContractCreation {
                block_number: 100,
                datetime: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
            })
        }
    }

    fn vault(id: u64, kind: ProductKind) -> Product {
        Product {
            id: ProductId(id),
            chain: Chain::Bsc,
            kind,
            contract_address: Address::repeat_byte(id as u8),
            name: format!("vault-{id}"),
        }
    }

    fn driver(products: Vec<Product>, run_once: bool) -> Driver {
        let mut reader = FakeReader::new(Chain::Bsc, 300);
        reader.logs = vec![transfer_log(vault(1, ProductKind::StandardVault).contract_address, 150, 5)];
        reader.prices.insert(vault(1, ProductKind::StandardVault).contract_address, U256::from(7));
        let reader: Arc<dyn ChainReader> = Arc::new(reader);
        let pool = RpcPool::new(
            Chain::Bsc,
            vec![(Endpoint::rpc(Chain::Bsc, 0, CallDelay::NoLimit), reader)],
        )
        .unwrap();

        let importers: [Arc<dyn ProductImporter>; 2] =
            [Arc::new(TransferImporter), Arc::new(SharePriceImporter)];
        let jobs = importers
            .into_iter()
            .map(|importer| {
                let store =
                    Arc::new(ImportStatusStore::new(Arc::new(InMemoryImportStatusRepository::new())));
                let reports = ReportBuffer::spawn(Arc::clone(&store), ReportBufferConfig::default());
                ImportJob { importer, store, reports }
            })
            .collect();
        let pipeline = ImportPipeline::new(
            chain_config(Chain::Bsc),
            CallGateway::in_process(GatewayConfig::default()),
            pool,
            None,
            Arc::new(Deployed),
            Arc::new(LoggingSink),
            PipelineSettings::default(),
        );
        Driver::from_parts(products, jobs, vec![Arc::new(pipeline)], Duration::from_secs(60), run_once)
    }

    #[test]
    fn parses_products() {
        let json = r#"[
            {"id": 1, "chain": "bsc", "kind": "standard_vault", "contract_address": "0x0101010101010101010101010101010101010101"},
            {"id": 2, "chain": "bsc", "kind": "gov_vault", "contract_address": "0x0202020202020202020202020202020202020202", "name": "gov"}
        ]"#;
        let products = parse_products(json).unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[1].kind, ProductKind::GovVault);
        assert!(products[0].name.is_empty());
    }

    #[test]
    fn rejects_duplicate_products() {
        let json = r#"[
            {"id": 1, "chain": "bsc", "kind": "boost", "contract_address": "0x0101010101010101010101010101010101010101"},
            {"id": 1, "chain": "polygon", "kind": "boost", "contract_address": "0x0202020202020202020202020202020202020202"}
        ]"#;
        let err = parse_products(json).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[tokio::test]
    async fn runs_every_importer_and_updates_progress() {
        let products =
            vec![vault(1, ProductKind::StandardVault), vault(2, ProductKind::GovVault)];
        let driver = driver(products.clone(), true);

        let outcomes = driver.run_import_cycle(Chain::Bsc, &products).await.unwrap();

        let importers: Vec<_> = outcomes.iter().map(|outcome| outcome.importer).collect();
        assert_eq!(importers, vec!["transfers", "share_prices"]);
        assert_eq!(outcomes[0].products.len(), 2);
        assert_eq!(outcomes[1].products.len(), 1);

        let keys: Vec<_> = driver
            .progress()
            .snapshot()
            .iter()
            .map(|entry| (entry.importer, entry.product_id.0, entry.imported_blocks))
            .collect();
        assert_eq!(keys, vec![("share_prices", 1, 201), ("transfers", 1, 201), ("transfers", 2, 201)]);
    }

    #[tokio::test]
    async fn unknown_chain_is_an_error() {
        let driver = driver(vec![], true);
        assert!(driver.run_import_cycle(Chain::Polygon, &[]).await.is_err());
    }

    #[tokio::test]
    async fn run_once_stops_after_one_cycle() {
        let driver = driver(vec![vault(1, ProductKind::StandardVault)], true);
        let progress = driver.progress();
        let (shutdown, _keep) = broadcast::channel(1);

        driver.start_with_shutdown(shutdown).await.unwrap();

        assert_eq!(progress.snapshot().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loops() {
        let driver = driver(vec![vault(1, ProductKind::StandardVault)], false);
        let progress = driver.progress();
        let (shutdown, _keep) = broadcast::channel(1);
        let sender = shutdown.clone();

        let handle = tokio::spawn(driver.start_with_shutdown(shutdown));
        time::sleep(Duration::from_secs(1)).await;
        sender.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(progress.snapshot().len(), 2);
    }
}
