use std::{fmt::Debug, sync::Mutex};

use alloy::primitives::U256;
use async_trait::async_trait;
use chrono::DateTime;
use config::CallDelay;
use extractor::ChainReader;
use eyre::bail;
use import_status::{
    ContractCreation, ImportStatusRepository, InMemoryImportStatusRepository, ReportBufferConfig,
};
use network::{BackoffConfig, GatewayConfig};
use primitives::ProductKind;

use super::*;
use crate::{
    importer::{SharePriceImporter, TransferImporter},
    records::RecordData,
    testing::{FakeReader, MULTICALL, chain_config, transfer_log},
};

const CREATED_AT: u64 = 100;
const HEAD: u64 = 1_000;

const fn r(from: u64, to: u64) -> BlockRange {
    Range { from, to }
}

fn vault(id: u64) -> Product {
    Product {
        id: ProductId(id),
        chain: Chain::Bsc,
        kind: ProductKind::StandardVault,
        contract_address: Address::repeat_byte(id as u8),
        name: format!("vault-{id}"),
    }
}

fn creation() -> ContractCreation {
    ContractCreation {
        block_number: CREATED_AT,
        datetime: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
    }
}

#[derive(Debug, Default)]
struct FixedCreation {
    unknown: Vec<ProductId>,
}

#[async_trait]
impl ContractCreationLookup for FixedCreation {
    async fn contract_creation(&self, product: &Product) -> Result<ContractCreation> {
        if self.unknown.contains(&product.id) {
            bail!("explorer does not know contract {}", product.contract_address);
        }
        Ok(creation())
    }
}

#[derive(Debug, Default)]
struct RecordingSink {
    records: Mutex<Vec<ImportedRecord>>,
    fail: bool,
}

impl RecordingSink {
    fn records(&self) -> Vec<ImportedRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSink for RecordingSink {
    async fn write(&self, records: &[ImportedRecord]) -> Result<()> {
        if self.fail {
            bail!("clickhouse unavailable");
        }
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
}

struct Setup {
    config: ChainConfig,
    settings: PipelineSettings,
    unknown: Vec<ProductId>,
    failing_sink: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            config: chain_config(Chain::Bsc),
            settings: PipelineSettings::default(),
            unknown: Vec::new(),
            failing_sink: false,
        }
    }
}

struct Harness {
    pipeline: ImportPipeline,
    job: ImportJob,
    repository: Arc<InMemoryImportStatusRepository>,
    reader: Arc<FakeReader>,
    sink: Arc<RecordingSink>,
}

impl Setup {
    fn build(self, reader: FakeReader, importer: Arc<dyn ProductImporter>) -> Harness {
        let reader = Arc::new(reader);
        let gateway = CallGateway::in_process(GatewayConfig {
            backoff: BackoffConfig { max_attempts: 2, ..Default::default() },
            ..Default::default()
        });
        let endpoint = Endpoint::rpc(Chain::Bsc, 0, CallDelay::NoLimit);
        let dyn_reader: Arc<dyn ChainReader> = reader.clone();
        let pool = RpcPool::new(Chain::Bsc, vec![(endpoint, dyn_reader)]).unwrap();
        let sink = Arc::new(RecordingSink { fail: self.failing_sink, ..Default::default() });
        let repository = Arc::new(InMemoryImportStatusRepository::new());
        let store = Arc::new(ImportStatusStore::new(repository.clone()));
        let reports = ReportBuffer::spawn(store.clone(), ReportBufferConfig::default());

        let pipeline = ImportPipeline::new(
            self.config,
            gateway,
            pool,
            None,
            Arc::new(FixedCreation { unknown: self.unknown }),
            sink.clone(),
            self.settings,
        );
        Harness { pipeline, job: ImportJob { importer, store, reports }, repository, reader, sink }
    }
}

impl Harness {
    async fn status(&self, id: u64) -> Option<ImportStatus> {
        self.job.store.get(ProductId(id)).await.unwrap()
    }

    async fn seed(&self, id: u64, covered: Vec<BlockRange>, to_retry: Vec<BlockRange>) {
        let mut status = ImportStatus::new(ProductId(id), creation());
        status.covered_ranges = covered;
        status.to_retry = to_retry;
        status.chain_latest_block_number = HEAD;
        self.repository.save(&status).await.unwrap();
    }
}

fn transfers() -> Arc<dyn ProductImporter> {
    Arc::new(TransferImporter)
}

fn outcome(id: u64, succeeded: Vec<BlockRange>, failed: Vec<BlockRange>) -> ProductImportOutcome {
    ProductImportOutcome { product_id: ProductId(id), succeeded_ranges: succeeded, failed_ranges: failed }
}

#[tokio::test]
async fn imports_an_address_batch() {
    let mut reader = FakeReader::new(Chain::Bsc, HEAD);
    let stranger = Address::repeat_byte(0x42);
    reader.logs = vec![
        transfer_log(vault(1).contract_address, 150, 1),
        transfer_log(vault(2).contract_address, 900, 2),
        transfer_log(stranger, 500, 3),
    ];
    let harness = Setup::default().build(reader, transfers());

    let outcomes =
        harness.pipeline.run_import_cycle(&harness.job, &[vault(2), vault(1)]).await.unwrap();

    assert_eq!(
        outcomes,
        vec![outcome(1, vec![r(100, 1_000)], vec![]), outcome(2, vec![r(100, 1_000)], vec![])]
    );
    assert_eq!(
        harness.reader.log_calls(),
        vec![(vec![vault(1).contract_address, vault(2).contract_address], r(100, 1_000))]
    );

    let records = harness.sink.records();
    let mut stored: Vec<_> =
        records.iter().map(|record| (record.product_id.0, record.block_number)).collect();
    stored.sort_unstable();
    assert_eq!(stored, vec![(1, 150), (2, 900)]);

    for id in [1, 2] {
        let status = harness.status(id).await.unwrap();
        assert_eq!(status.covered_ranges, vec![r(100, 1_000)]);
        assert!(status.to_retry.is_empty());
        assert_eq!(status.chain_latest_block_number, HEAD);
        assert!(status.last_import_date.is_some());
    }
}

#[tokio::test]
async fn batch_records_are_filtered_per_product() {
    let mut reader = FakeReader::new(Chain::Bsc, HEAD);
    reader.logs = vec![
        transfer_log(vault(1).contract_address, 200, 1),
        transfer_log(vault(1).contract_address, 700, 2),
        transfer_log(vault(2).contract_address, 200, 3),
    ];
    let harness = Setup::default().build(reader, transfers());
    harness.seed(1, vec![r(100, 500)], vec![]).await;

    let outcomes =
        harness.pipeline.run_import_cycle(&harness.job, &[vault(1), vault(2)]).await.unwrap();

    assert_eq!(harness.reader.log_calls().len(), 1);
    assert_eq!(
        outcomes,
        vec![outcome(1, vec![r(501, 1_000)], vec![]), outcome(2, vec![r(100, 1_000)], vec![])]
    );
    let mut stored: Vec<_> = harness
        .sink
        .records()
        .iter()
        .map(|record| (record.product_id.0, record.block_number))
        .collect();
    stored.sort_unstable();
    assert_eq!(stored, vec![(1, 700), (2, 200)]);
    assert_eq!(harness.status(1).await.unwrap().covered_ranges, vec![r(100, 1_000)]);
}

#[tokio::test(start_paused = true)]
async fn archive_node_errors_fail_once_and_queue_retries() {
    let mut reader = FakeReader::new(Chain::Bsc, HEAD);
    reader.log_error = Some("missing trie node 0x1234 (path )".to_owned());
    let harness = Setup::default().build(reader, transfers());

    let outcomes =
        harness.pipeline.run_import_cycle(&harness.job, &[vault(1), vault(2)]).await.unwrap();

    assert_eq!(harness.reader.log_calls().len(), 1);
    assert_eq!(
        outcomes,
        vec![outcome(1, vec![], vec![r(100, 1_000)]), outcome(2, vec![], vec![r(100, 1_000)])]
    );
    assert!(harness.sink.records().is_empty());
    for id in [1, 2] {
        let status = harness.status(id).await.unwrap();
        assert_eq!(status.covered_ranges, vec![r(100, 1_000)]);
        assert_eq!(status.to_retry, vec![r(100, 1_000)]);
    }
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried_then_reported() {
    let mut reader = FakeReader::new(Chain::Bsc, HEAD);
    reader.log_error = Some("connection reset by peer".to_owned());
    let harness = Setup::default().build(reader, transfers());

    let outcomes = harness.pipeline.run_import_cycle(&harness.job, &[vault(1)]).await.unwrap();

    assert_eq!(harness.reader.log_calls().len(), 2);
    assert_eq!(outcomes, vec![outcome(1, vec![], vec![r(100, 1_000)])]);
}

#[tokio::test]
async fn failed_ranges_are_retried() {
    let mut reader = FakeReader::new(Chain::Bsc, HEAD);
    reader.logs = vec![transfer_log(vault(1).contract_address, 250, 1)];
    let harness = Setup::default().build(reader, transfers());
    harness.seed(1, vec![r(100, 1_000)], vec![r(200, 300)]).await;

    let outcomes = harness.pipeline.run_import_cycle(&harness.job, &[vault(1)]).await.unwrap();

    assert_eq!(harness.reader.log_calls(), vec![(vec![vault(1).contract_address], r(200, 300))]);
    assert_eq!(outcomes, vec![outcome(1, vec![r(200, 300)], vec![])]);
    assert_eq!(harness.sink.records().len(), 1);
    assert!(harness.status(1).await.unwrap().to_retry.is_empty());
}

#[tokio::test]
async fn nothing_outstanding_issues_no_query() {
    let harness = Setup::default().build(FakeReader::new(Chain::Bsc, HEAD), transfers());
    harness.seed(1, vec![r(100, 1_000)], vec![]).await;

    let outcomes = harness.pipeline.run_import_cycle(&harness.job, &[vault(1)]).await.unwrap();

    assert!(harness.reader.log_calls().is_empty());
    assert_eq!(outcomes, vec![outcome(1, vec![], vec![])]);
}

#[tokio::test]
async fn too_large_responses_are_split() {
    let mut reader = FakeReader::new(Chain::Bsc, HEAD);
    reader.max_log_span = Some(300);
    reader.logs = vec![
        transfer_log(vault(1).contract_address, 150, 1),
        transfer_log(vault(1).contract_address, 900, 2),
    ];
    let harness = Setup::default().build(reader, transfers());

    let outcomes = harness.pipeline.run_import_cycle(&harness.job, &[vault(1)]).await.unwrap();

    let calls = harness.reader.log_calls();
    assert_eq!(calls.len(), 7);
    let mut accepted: Vec<_> =
        calls.iter().map(|(_, range)| *range).filter(|range| range.length() <= 300).collect();
    accepted.sort_by_key(|range| range.from);
    assert_eq!(accepted, vec![r(100, 325), r(326, 550), r(551, 775), r(776, 1_000)]);

    assert_eq!(outcomes, vec![outcome(1, vec![r(100, 1_000)], vec![])]);
    assert_eq!(harness.sink.records().len(), 2);
    assert!(harness.status(1).await.unwrap().to_retry.is_empty());
}

#[tokio::test]
async fn split_address_batches_never_query_without_addresses() {
    let mut reader = FakeReader::new(Chain::Bsc, HEAD);
    reader.max_log_span = Some(50);
    reader.logs = vec![
        transfer_log(vault(1).contract_address, 105, 1),
        transfer_log(vault(2).contract_address, 405, 2),
    ];
    let harness = Setup::default().build(reader, transfers());
    harness.seed(1, vec![r(111, 1_000)], vec![]).await;
    harness.seed(2, vec![r(100, 399), r(411, 1_000)], vec![]).await;

    harness.pipeline.run_import_cycle(&harness.job, &[vault(1), vault(2)]).await.unwrap();

    let calls = harness.reader.log_calls();
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|(addresses, _)| !addresses.is_empty()), "{calls:?}");
    assert_eq!(harness.sink.records().len(), 2);
    for id in [1, 2] {
        let status = harness.status(id).await.unwrap();
        assert_eq!(status.covered_ranges, vec![r(100, 1_000)]);
        assert!(status.to_retry.is_empty());
    }
}

#[tokio::test]
async fn splitting_stops_at_max_depth() {
    let mut reader = FakeReader::new(Chain::Bsc, HEAD);
    reader.max_log_span = Some(300);
    let setup = Setup {
        settings: PipelineSettings { max_bisect_depth: 1, ..Default::default() },
        ..Default::default()
    };
    let harness = setup.build(reader, transfers());

    let outcomes = harness.pipeline.run_import_cycle(&harness.job, &[vault(1)]).await.unwrap();

    assert_eq!(harness.reader.log_calls().len(), 3);
    assert_eq!(outcomes, vec![outcome(1, vec![], vec![r(100, 1_000)])]);
    assert_eq!(harness.status(1).await.unwrap().to_retry, vec![r(100, 1_000)]);
}

#[tokio::test]
async fn failed_writes_are_reported_as_failures() {
    let mut reader = FakeReader::new(Chain::Bsc, HEAD);
    reader.logs = vec![transfer_log(vault(1).contract_address, 150, 1)];
    let harness = Setup { failing_sink: true, ..Default::default() }.build(reader, transfers());

    let outcomes = harness.pipeline.run_import_cycle(&harness.job, &[vault(1)]).await.unwrap();

    assert_eq!(outcomes, vec![outcome(1, vec![], vec![r(100, 1_000)])]);
    assert_eq!(harness.status(1).await.unwrap().to_retry, vec![r(100, 1_000)]);
}

#[tokio::test]
async fn skips_products_it_cannot_import() {
    let harness = Setup { unknown: vec![ProductId(2)], ..Default::default() }
        .build(FakeReader::new(Chain::Bsc, HEAD), transfers());
    let other_chain = Product { chain: Chain::Polygon, ..vault(3) };

    let outcomes = harness
        .pipeline
        .run_import_cycle(&harness.job, &[vault(1), vault(2), other_chain])
        .await
        .unwrap();

    assert_eq!(outcomes, vec![outcome(1, vec![r(100, 1_000)], vec![])]);
    assert_eq!(harness.reader.log_calls(), vec![(vec![vault(1).contract_address], r(100, 1_000))]);
    assert!(harness.status(2).await.is_none());
    assert!(harness.status(3).await.is_none());
}

#[tokio::test]
async fn products_created_after_head_wait() {
    let harness = Setup::default().build(FakeReader::new(Chain::Bsc, 50), transfers());

    let outcomes = harness.pipeline.run_import_cycle(&harness.job, &[vault(1)]).await.unwrap();

    assert!(outcomes.is_empty());
    assert!(harness.reader.log_calls().is_empty());
    assert_eq!(harness.status(1).await.unwrap().covered_ranges, vec![]);
}

#[tokio::test]
async fn share_prices_through_multicall() {
    let mut reader = FakeReader::new(Chain::Bsc, 300);
    reader.prices.insert(vault(1).contract_address, U256::from(1_000));
    reader.prices.insert(vault(2).contract_address, U256::from(2_000));
    let harness = Setup::default().build(reader, Arc::new(SharePriceImporter));

    let outcomes =
        harness.pipeline.run_import_cycle(&harness.job, &[vault(1), vault(2)]).await.unwrap();

    assert_eq!(
        outcomes,
        vec![outcome(1, vec![r(100, 300)], vec![]), outcome(2, vec![r(100, 300)], vec![])]
    );
    let calls = harness.reader.eth_calls();
    assert_eq!(calls.len(), 6);
    assert!(calls.iter().all(|(to, _)| *to == MULTICALL));

    let mut prices: Vec<_> = harness
        .sink
        .records()
        .into_iter()
        .map(|record| match record.data {
            RecordData::SharePrice { price_per_full_share, block_timestamp } => {
                assert_eq!(block_timestamp, FakeReader::timestamp_of(record.block_number));
                (record.product_id.0, record.block_number, price_per_full_share)
            }
            other => panic!("unexpected record {other:?}"),
        })
        .collect();
    prices.sort_unstable();
    assert_eq!(prices.len(), 6);
    assert_eq!(prices[0], (1, 100, U256::from(1_100)));
    assert_eq!(prices[5], (2, 300, U256::from(2_300)));
}

#[tokio::test]
async fn one_query_per_vault_without_multicall() {
    let mut reader = FakeReader::new(Chain::Bsc, 300);
    reader.prices.insert(vault(1).contract_address, U256::from(1_000));
    reader.prices.insert(vault(2).contract_address, U256::from(2_000));
    let mut config = chain_config(Chain::Bsc);
    config.multicall_address = None;
    let harness = Setup { config, ..Default::default() }.build(reader, Arc::new(SharePriceImporter));

    harness.pipeline.run_import_cycle(&harness.job, &[vault(1), vault(2)]).await.unwrap();

    let calls = harness.reader.eth_calls();
    assert_eq!(calls.len(), 6);
    assert!(calls.iter().all(|(to, _)| *to != MULTICALL));
    assert_eq!(harness.sink.records().len(), 6);
}

#[test]
fn attempt_states_only_move_forward() {
    use AttemptState::*;
    assert!(Pending.can_become(Dispatched));
    assert!(Dispatched.can_become(Succeeded));
    assert!(Dispatched.can_become(Failed));
    assert!(!Pending.can_become(Succeeded));
    assert!(!Succeeded.can_become(Failed));
    assert!(!Failed.can_become(Dispatched));
}

#[test]
fn split_queries_keep_members_with_needs() {
    let member = |id: u64, filter| Member {
        product_id: ProductId(id),
        contract: vault(id).contract_address,
        filter,
    };
    let query = Query {
        members: vec![
            member(1, PostFilterRanges::NoFilter),
            member(2, PostFilterRanges::Ranges(vec![r(100, 200)])),
        ],
        range: r(100, 1_000),
    };

    let right = query.restricted_to(r(551, 1_000));
    assert_eq!(right.members.len(), 1);
    assert_eq!(right.needs(&right.members[0]), vec![r(551, 1_000)]);

    let left = query.restricted_to(r(100, 550));
    assert_eq!(left.members.len(), 2);
    assert_eq!(left.needs(&left.members[1]), vec![r(100, 200)]);
}
