//! One import cycle of one chain: plan the outstanding ranges, run the planned
//! queries, store what they return and report every attempted range.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use alloy::primitives::Address;
use config::ChainConfig;
use derive_more::Debug;
use extractor::{ExplorerClient, RpcPool};
use eyre::{Result, WrapErr, eyre};
use futures::{FutureExt, StreamExt, future::BoxFuture, stream};
use import_status::{
    ContractCreationLookup, ImportStatus, ImportStatusStore, RangeReport, ReportBuffer,
};
use network::{CallGateway, Endpoint, GatewayError, classify::is_response_too_large};
use optimizer::{
    OptimizerOptions, PostFilterRanges, ProductRangeState, QueryOptimizerOutput, optimize_queries,
};
use primitives::{
    BlockRange, Chain, Product, ProductId, Range,
    range::{bisect, intersect_many, merge_ranges},
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    importer::{FetchTarget, ProductImporter},
    records::{FetchedRecord, ImportedRecord},
    sink::DataSink,
};

/// An importer with the import statuses it maintains.
#[derive(Debug)]
pub struct ImportJob {
    /// What is imported
    pub importer: Arc<dyn ProductImporter>,
    /// Import statuses of this importer
    pub store: Arc<ImportStatusStore>,
    /// Buffer merging range reports into `store`
    pub reports: ReportBuffer,
}

/// Knobs shared by every chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Single product queries per product and cycle
    pub max_queries_per_product: usize,
    /// Re-import whole histories
    pub ignore_import_state: bool,
    /// How many times a query rejected as too large may be halved
    pub max_bisect_depth: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { max_queries_per_product: 10, ignore_import_state: false, max_bisect_depth: 8 }
    }
}

/// Lifecycle of one query attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Planned, not sent yet
    Pending,
    /// Sent through the gateway
    Dispatched,
    /// Data fetched and stored
    Succeeded,
    /// Fetching or storing failed, the ranges will be retried
    Failed,
}

impl AttemptState {
    /// Whether an attempt in this state may move to `next`.
    pub const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Dispatched) | (Self::Dispatched, Self::Succeeded | Self::Failed)
        )
    }
}

/// What one cycle did for a product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductImportOutcome {
    /// Product
    pub product_id: ProductId,
    /// Ranges fetched and stored, merged
    pub succeeded_ranges: Vec<BlockRange>,
    /// Ranges queued for retry, merged
    pub failed_ranges: Vec<BlockRange>,
}

#[derive(Debug, Clone)]
struct Member {
    product_id: ProductId,
    contract: Address,
    filter: PostFilterRanges<u64>,
}

/// A planned query, its members in plan order.
#[derive(Debug)]
struct Query {
    members: Vec<Member>,
    range: BlockRange,
}

impl Query {
    fn needs(&self, member: &Member) -> Vec<BlockRange> {
        intersect_many(&member.filter.ranges(self.range), &self.range)
    }

    /// The part of this query within `range`, members without needs there dropped.
    fn restricted_to(&self, range: BlockRange) -> Self {
        let members = self
            .members
            .iter()
            .filter(|member| !intersect_many(&self.needs(member), &range).is_empty())
            .cloned()
            .collect();
        Self { members, range }
    }
}

struct Attempt {
    range: BlockRange,
    state: AttemptState,
}

impl Attempt {
    const fn new(range: BlockRange) -> Self {
        Self { range, state: AttemptState::Pending }
    }

    fn advance(&mut self, next: AttemptState) {
        debug_assert!(self.state.can_become(next), "{:?} -> {next:?}", self.state);
        trace!(range = %self.range, from = ?self.state, to = ?next, "Query attempt");
        self.state = next;
    }
}

enum Fetched {
    Records(Vec<FetchedRecord>),
    TooLarge(String),
}

/// Finished attempt for one product.
struct AttemptReport {
    product_id: ProductId,
    ranges: Vec<BlockRange>,
    succeeded: bool,
}

/// Runs import cycles for one chain.
#[derive(Debug)]
pub struct ImportPipeline {
    config: ChainConfig,
    gateway: CallGateway,
    pool: RpcPool,
    explorer: Option<(Endpoint, Arc<ExplorerClient>)>,
    #[debug(skip)]
    lookup: Arc<dyn ContractCreationLookup>,
    sink: Arc<dyn DataSink>,
    settings: PipelineSettings,
}

impl ImportPipeline {
    /// Pipeline for the chain of `config`.
    pub fn new(
        config: ChainConfig,
        gateway: CallGateway,
        pool: RpcPool,
        explorer: Option<Arc<ExplorerClient>>,
        lookup: Arc<dyn ContractCreationLookup>,
        sink: Arc<dyn DataSink>,
        settings: PipelineSettings,
    ) -> Self {
        let explorer = config.explorer.as_ref().zip(explorer).map(|(settings, client)| {
            (Endpoint::explorer(config.chain, settings.min_delay_between_calls), client)
        });
        Self { config, gateway, pool, explorer, lookup, sink, settings }
    }

    /// Chain served by this pipeline.
    pub const fn chain(&self) -> Chain {
        self.config.chain
    }

    /// Import the outstanding ranges of `products` with `job`'s importer.
    ///
    /// Products of other chains or that the importer does not handle are
    /// ignored. A failed query never aborts the cycle, its ranges are
    /// reported as failed and retried by a later cycle. Reports are merged
    /// before this returns.
    pub async fn run_import_cycle(
        &self,
        job: &ImportJob,
        products: &[Product],
    ) -> Result<Vec<ProductImportOutcome>> {
        let importer = job.importer.as_ref();
        let products: Vec<&Product> = products
            .iter()
            .filter(|product| product.chain == self.config.chain && importer.accepts(product))
            .collect();
        if products.is_empty() {
            return Ok(Vec::new());
        }

        let head = self.latest_block_number().await?;
        let statuses = self.ensure_statuses(job, &products).await;
        let states: Vec<_> = statuses
            .iter()
            .filter_map(|status| {
                let full_range = Range::new(status.contract_created_at_block, head).ok()?;
                Some(ProductRangeState {
                    obj_key: status.product_id,
                    full_range,
                    covered_ranges: status.covered_ranges.clone(),
                    to_retry: status.to_retry.clone(),
                })
            })
            .collect();

        let plan = optimize_queries(&states, &self.optimizer_options(importer))
            .wrap_err_with(|| format!("Failed to plan {} queries", importer.kind()))?;
        let by_id: HashMap<ProductId, &Product> =
            products.iter().map(|product| (product.id, *product)).collect();
        let queries = plan
            .into_iter()
            .map(|output| query(output, &by_id))
            .collect::<Result<Vec<_>>>()?;

        info!(
            chain = %self.config.chain,
            importer = importer.kind(),
            products = states.len(),
            queries = queries.len(),
            head,
            "Starting import cycle"
        );

        let reports: Vec<AttemptReport> = stream::iter(queries)
            .map(|query| self.execute(job, query, head, 0))
            .buffer_unordered(self.config.work_concurrency.max(1))
            .flat_map(stream::iter)
            .boxed()
            .collect()
            .await;

        if let Err(err) = job.reports.flush().await {
            error!(chain = %self.config.chain, importer = importer.kind(), err = %format!("{err:#}"), "Failed to persist range reports");
        }

        let outcomes = outcomes(&states, reports);
        let failed = outcomes.iter().filter(|outcome| !outcome.failed_ranges.is_empty()).count();
        info!(
            chain = %self.config.chain,
            importer = importer.kind(),
            products = outcomes.len(),
            products_with_failures = failed,
            "Import cycle done"
        );
        Ok(outcomes)
    }

    async fn latest_block_number(&self) -> Result<u64> {
        let (endpoint, reader) = self.pool.next();
        let reader = &reader;
        self.gateway
            .call_protected(&endpoint, move || reader.latest_block_number())
            .await
            .wrap_err_with(|| format!("Failed to fetch {} head", self.config.chain))
    }

    /// Statuses of `products` sorted by product, creating missing ones.
    async fn ensure_statuses(&self, job: &ImportJob, products: &[&Product]) -> Vec<ImportStatus> {
        let lookup = self.lookup.as_ref();
        let results: Vec<_> = stream::iter(products)
            .map(|product| async move { (*product, job.store.ensure_exists(product, lookup).await) })
            .buffer_unordered(self.config.work_concurrency.max(1))
            .boxed()
            .collect()
            .await;

        let mut statuses: Vec<_> = results
            .into_iter()
            .filter_map(|(product, result)| {
                result
                    .inspect_err(|err| {
                        warn!(product = %product.id, name = %product.name, err = %format!("{err:#}"), "Skipping product without import status");
                    })
                    .ok()
            })
            .collect();
        statuses.sort_by_key(|status| status.product_id);
        statuses
    }

    fn optimizer_options(&self, importer: &dyn ProductImporter) -> OptimizerOptions {
        let max_addresses = if importer.supports_address_batch(&self.config) {
            self.config.limitations.max_addresses_per_query
        } else {
            1
        };
        OptimizerOptions {
            ignore_import_state: self.settings.ignore_import_state,
            ..OptimizerOptions::new(
                max_addresses,
                self.config.limitations.max_block_span_per_query,
                self.settings.max_queries_per_product,
            )
        }
    }

    fn execute<'a>(
        &'a self,
        job: &'a ImportJob,
        query: Query,
        head: u64,
        depth: u32,
    ) -> BoxFuture<'a, Vec<AttemptReport>> {
        async move {
            // an empty address list matches every contract of the chain
            if query.members.is_empty() {
                trace!(range = %query.range, "No product needs this range, skipping query");
                return Vec::new();
            }
            let mut attempt = Attempt::new(query.range);
            let importer = job.importer.as_ref();
            let (rpc_endpoint, reader) = self.pool.next();
            let explorer = self.explorer.as_ref().filter(|_| importer.uses_explorer(&self.config));
            let endpoint = explorer.map_or(rpc_endpoint, |(endpoint, _)| *endpoint);
            let target = FetchTarget {
                config: &self.config,
                reader: reader.as_ref(),
                explorer: explorer.map(|(_, client)| client.as_ref()),
            };
            let contracts: Vec<Address> = query.members.iter().map(|member| member.contract).collect();

            attempt.advance(AttemptState::Dispatched);
            let (target, contracts, range) = (&target, contracts.as_slice(), query.range);
            let result = self
                .gateway
                .call_protected(&endpoint, move || fetch(importer, target, contracts, range))
                .await;

            let succeeded = match result {
                Ok(Fetched::Records(records)) => self.store(&query, records).await,
                Ok(Fetched::TooLarge(message)) => match self.halves(&query, depth) {
                    Some((left, right)) => {
                        debug!(chain = %self.config.chain, range = %query.range, depth, "Response too large, splitting query");
                        let (mut left, right) = futures::join!(
                            self.execute(job, left, head, depth + 1),
                            self.execute(job, right, head, depth + 1)
                        );
                        left.extend(right);
                        return left;
                    }
                    None => {
                        warn!(chain = %self.config.chain, range = %query.range, depth, %message, "Response too large and query cannot be split further");
                        false
                    }
                },
                Err(err) => {
                    self.log_failure(&query, &err);
                    false
                }
            };

            attempt.advance(if succeeded { AttemptState::Succeeded } else { AttemptState::Failed });
            self.report(job, &query, head, succeeded).await
        }
        .boxed()
    }

    fn halves(&self, query: &Query, depth: u32) -> Option<(Query, Query)> {
        if depth >= self.settings.max_bisect_depth {
            return None;
        }
        let (left, right) = bisect(query.range).ok()?;
        Some((query.restricted_to(left), query.restricted_to(right)))
    }

    /// Attribute `records` to the query's products and store them.
    async fn store(&self, query: &Query, records: Vec<FetchedRecord>) -> bool {
        let mut members: HashMap<Address, Vec<&Member>> = HashMap::new();
        for member in &query.members {
            members.entry(member.contract).or_default().push(member);
        }

        let mut imported = Vec::with_capacity(records.len());
        for record in records {
            if !query.range.contains_value(record.block_number) {
                continue;
            }
            let Some(owners) = members.get(&record.contract) else {
                trace!(contract = %record.contract, "Dropping record of an unqueried contract");
                continue;
            };
            for member in owners.iter().filter(|member| member.filter.accepts(record.block_number)) {
                imported.push(ImportedRecord {
                    product_id: member.product_id,
                    chain: self.config.chain,
                    block_number: record.block_number,
                    data: record.data.clone(),
                });
            }
        }

        if imported.is_empty() {
            return true;
        }
        match self.sink.write(&imported).await {
            Ok(()) => true,
            Err(err) => {
                error!(chain = %self.config.chain, range = %query.range, records = imported.len(), err = %format!("{err:#}"), "Failed to store records");
                false
            }
        }
    }

    async fn report(
        &self,
        job: &ImportJob,
        query: &Query,
        head: u64,
        succeeded: bool,
    ) -> Vec<AttemptReport> {
        let mut reports = Vec::with_capacity(query.members.len());
        for member in &query.members {
            let ranges = query.needs(member);
            for range in &ranges {
                let report = RangeReport { range: *range, success: succeeded, latest_block_number: head };
                if let Err(err) = job.reports.push(member.product_id, report).await {
                    error!(product = %member.product_id, range = %range, %err, "Failed to queue range report");
                }
            }
            reports.push(AttemptReport { product_id: member.product_id, ranges, succeeded });
        }
        reports
    }

    fn log_failure(&self, query: &Query, err: &GatewayError) {
        let products: Vec<_> = query.members.iter().map(|member| member.product_id.0).collect();
        if err.is_archive_node_needed() {
            error!(
                chain = %self.config.chain,
                range = %query.range,
                ?products,
                %err,
                "Endpoint lacks historical state, configure an archive node for this chain"
            );
        } else {
            warn!(chain = %self.config.chain, range = %query.range, ?products, %err, "Query failed, ranges queued for retry");
        }
    }
}

async fn fetch(
    importer: &dyn ProductImporter,
    target: &FetchTarget<'_>,
    contracts: &[Address],
    range: BlockRange,
) -> Result<Fetched> {
    match importer.fetch(target, contracts, range).await {
        Ok(records) => Ok(Fetched::Records(records)),
        Err(err) => {
            let message = format!("{err:#}");
            if is_response_too_large(&message) { Ok(Fetched::TooLarge(message)) } else { Err(err) }
        }
    }
}

fn query(
    output: QueryOptimizerOutput<ProductId, u64>,
    products: &HashMap<ProductId, &Product>,
) -> Result<Query> {
    let member = |product_id: ProductId, filter| -> Result<Member> {
        let product =
            products.get(&product_id).ok_or_else(|| eyre!("planned unknown product {product_id}"))?;
        Ok(Member { product_id, contract: product.contract_address, filter })
    };
    match output {
        QueryOptimizerOutput::JsonRpcBatch { obj_key, range } => {
            Ok(Query { members: vec![member(obj_key, PostFilterRanges::NoFilter)?], range })
        }
        QueryOptimizerOutput::AddressBatch { obj_keys: _, range, post_filters } => {
            let members = post_filters
                .into_iter()
                .map(|post_filter| member(post_filter.obj_key, post_filter.filter))
                .collect::<Result<_>>()?;
            Ok(Query { members, range })
        }
    }
}

fn outcomes(
    states: &[ProductRangeState<ProductId, u64>],
    reports: Vec<AttemptReport>,
) -> Vec<ProductImportOutcome> {
    let mut outcomes: BTreeMap<ProductId, ProductImportOutcome> = states
        .iter()
        .map(|state| {
            (state.obj_key, ProductImportOutcome { product_id: state.obj_key, ..Default::default() })
        })
        .collect();
    for report in reports {
        let outcome = outcomes.entry(report.product_id).or_insert_with(|| ProductImportOutcome {
            product_id: report.product_id,
            ..Default::default()
        });
        let ranges =
            if report.succeeded { &mut outcome.succeeded_ranges } else { &mut outcome.failed_ranges };
        ranges.extend(report.ranges);
    }
    outcomes
        .into_values()
        .map(|mut outcome| {
            outcome.succeeded_ranges = merge_ranges(&outcome.succeeded_ranges);
            outcome.failed_ranges = merge_ranges(&outcome.failed_ranges);
            outcome
        })
        .collect()
}

#[cfg(test)]
mod tests;
