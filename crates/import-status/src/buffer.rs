//! Reports are sent from many concurrent queries. Merging each of them on its
//! own would read and write the product's status once per report, so the
//! buffer groups them per product and merges each group in one call.

use std::{collections::BTreeMap, mem, sync::Arc, time::Duration};

use eyre::{Result, WrapErr, bail, eyre};
use primitives::ProductId;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error};

use crate::{ImportStatusStore, RangeReport};

const CHANNEL_CAPACITY: usize = 1_024;

/// When buffered reports are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportBufferConfig {
    /// Buffered report count that triggers a merge
    pub max_reports: usize,
    /// Longest time a report stays buffered
    pub flush_interval: Duration,
}

impl Default for ReportBufferConfig {
    fn default() -> Self {
        Self { max_reports: 500, flush_interval: Duration::from_secs(5) }
    }
}

enum Command {
    Report(ProductId, RangeReport),
    Flush(oneshot::Sender<usize>),
}

/// Handle to the background task merging range reports into the store.
#[derive(Debug)]
pub struct ReportBuffer {
    sender: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl ReportBuffer {
    /// Start the merge task.
    pub fn spawn(store: Arc<ImportStatusStore>, config: ReportBufferConfig) -> Self {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(run(store, config, receiver));
        Self { sender, task }
    }

    /// Queue a report of `product_id`.
    pub async fn push(&self, product_id: ProductId, report: RangeReport) -> Result<()> {
        self.sender
            .send(Command::Report(product_id, report))
            .await
            .map_err(|_| eyre!("report buffer is closed"))
    }

    /// Merge everything queued so far and wait for it.
    ///
    /// Fails if some reports could not be persisted; they stay buffered and are
    /// retried on the next flush.
    pub async fn flush(&self) -> Result<()> {
        let (done, flushed) = oneshot::channel();
        self.sender.send(Command::Flush(done)).await.map_err(|_| eyre!("report buffer is closed"))?;
        let still_pending = flushed.await.wrap_err("report buffer stopped during flush")?;
        if still_pending > 0 {
            bail!("{still_pending} range reports could not be persisted");
        }
        Ok(())
    }

    /// Stop accepting reports, merge the queued ones and wait for the task to end.
    pub async fn close(self) -> Result<()> {
        let Self { sender, task } = self;
        drop(sender);
        task.await.wrap_err("report buffer task failed")
    }
}

#[derive(Default)]
struct Pending {
    reports: BTreeMap<ProductId, Vec<RangeReport>>,
    count: usize,
}

impl Pending {
    fn push(&mut self, product_id: ProductId, report: RangeReport) {
        self.reports.entry(product_id).or_default().push(report);
        self.count += 1;
    }

    /// Merge every product's reports, keeping those that failed to persist.
    async fn flush(&mut self, store: &ImportStatusStore) {
        if self.count == 0 {
            return;
        }
        let flushed = self.count;
        for (product_id, reports) in mem::take(&mut self.reports) {
            if let Err(err) = store.apply_batch_result(product_id, &reports).await {
                error!(product = %product_id, reports = reports.len(), err = %err, "Failed to merge range reports");
                self.reports.insert(product_id, reports);
            }
        }
        self.count = self.reports.values().map(Vec::len).sum();
        debug!(reports = flushed - self.count, kept = self.count, "Flushed range reports");
    }
}

async fn run(
    store: Arc<ImportStatusStore>,
    config: ReportBufferConfig,
    mut receiver: mpsc::Receiver<Command>,
) {
    let mut pending = Pending::default();
    let mut ticker =
        time::interval_at(Instant::now() + config.flush_interval, config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = receiver.recv() => match command {
                Some(Command::Report(product_id, report)) => {
                    pending.push(product_id, report);
                    if pending.count >= config.max_reports {
                        pending.flush(&store).await;
                    }
                }
                Some(Command::Flush(done)) => {
                    pending.flush(&store).await;
                    let _ = done.send(pending.count);
                }
                None => {
                    pending.flush(&store).await;
                    if pending.count > 0 {
                        error!(reports = pending.count, "Dropping range reports that could not be persisted");
                    }
                    break;
                }
            },
            _ = ticker.tick() => pending.flush(&store).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use primitives::BlockRange;

    use super::*;
    use crate::{
        ContractCreation, ImportStatus, ImportStatusRepository, InMemoryImportStatusRepository,
    };

    #[derive(Debug, Default)]
    struct FlakyRepository {
        inner: InMemoryImportStatusRepository,
        failing: AtomicBool,
    }

    #[async_trait]
    impl ImportStatusRepository for FlakyRepository {
        async fn load(&self, product_id: ProductId) -> Result<Option<ImportStatus>> {
            self.inner.load(product_id).await
        }

        async fn load_many(&self, product_ids: &[ProductId]) -> Result<Vec<ImportStatus>> {
            self.inner.load_many(product_ids).await
        }

        async fn save(&self, status: &ImportStatus) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                bail!("database unavailable");
            }
            self.inner.save(status).await
        }
    }

    async fn setup(products: &[u64]) -> (Arc<FlakyRepository>, Arc<ImportStatusStore>) {
        let repository = Arc::new(FlakyRepository::default());
        for id in products {
            let creation = ContractCreation { block_number: 0, datetime: Utc::now() };
            repository.save(&ImportStatus::new(ProductId(*id), creation)).await.unwrap();
        }
        let store = Arc::new(ImportStatusStore::new(repository.clone()));
        (repository, store)
    }

    const fn report(from: u64, to: u64, success: bool) -> RangeReport {
        RangeReport { range: BlockRange { from, to }, success, latest_block_number: 10_000 }
    }

    async fn covered(store: &ImportStatusStore, id: u64) -> Vec<BlockRange> {
        store.get(ProductId(id)).await.unwrap().unwrap().covered_ranges
    }

    fn config(max_reports: usize) -> ReportBufferConfig {
        ReportBufferConfig { max_reports, flush_interval: Duration::from_secs(60) }
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_flush_merges_per_product() {
        let (_, store) = setup(&[1, 2]).await;
        let buffer = ReportBuffer::spawn(store.clone(), config(100));

        buffer.push(ProductId(1), report(0, 9, true)).await.unwrap();
        buffer.push(ProductId(2), report(0, 4, false)).await.unwrap();
        buffer.push(ProductId(1), report(10, 19, true)).await.unwrap();
        assert!(covered(&store, 1).await.is_empty());

        buffer.flush().await.unwrap();
        assert_eq!(covered(&store, 1).await, vec![BlockRange { from: 0, to: 19 }]);
        let second = store.get(ProductId(2)).await.unwrap().unwrap();
        assert_eq!(second.to_retry, vec![BlockRange { from: 0, to: 4 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_when_full() {
        let (_, store) = setup(&[1]).await;
        let buffer = ReportBuffer::spawn(store.clone(), config(2));

        buffer.push(ProductId(1), report(0, 9, true)).await.unwrap();
        buffer.push(ProductId(1), report(20, 29, true)).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            covered(&store, 1).await,
            vec![BlockRange { from: 0, to: 9 }, BlockRange { from: 20, to: 29 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_interval() {
        let (_, store) = setup(&[1]).await;
        let buffer = ReportBuffer::spawn(store.clone(), config(100));

        buffer.push(ProductId(1), report(0, 9, true)).await.unwrap();
        time::sleep(Duration::from_secs(30)).await;
        assert!(covered(&store, 1).await.is_empty());

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(covered(&store, 1).await, vec![BlockRange { from: 0, to: 9 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_queue() {
        let (_, store) = setup(&[1]).await;
        let buffer = ReportBuffer::spawn(store.clone(), config(100));

        buffer.push(ProductId(1), report(5, 6, false)).await.unwrap();
        buffer.close().await.unwrap();

        let status = store.get(ProductId(1)).await.unwrap().unwrap();
        assert_eq!(status.to_retry, vec![BlockRange { from: 5, to: 6 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_merges_are_kept_for_next_flush() {
        let (repository, store) = setup(&[1]).await;
        let buffer = ReportBuffer::spawn(store.clone(), config(100));

        repository.failing.store(true, Ordering::SeqCst);
        buffer.push(ProductId(1), report(0, 9, false)).await.unwrap();
        assert!(buffer.flush().await.is_err());

        repository.failing.store(false, Ordering::SeqCst);
        buffer.flush().await.unwrap();
        let status = store.get(ProductId(1)).await.unwrap().unwrap();
        assert_eq!(status.to_retry, vec![BlockRange { from: 0, to: 9 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_product_does_not_block_others() {
        let (_, store) = setup(&[1]).await;
        let buffer = ReportBuffer::spawn(store.clone(), config(100));

        buffer.push(ProductId(1), report(0, 9, true)).await.unwrap();
        buffer.push(ProductId(99), report(0, 9, true)).await.unwrap();
        assert!(buffer.flush().await.is_err());
        assert_eq!(covered(&store, 1).await, vec![BlockRange { from: 0, to: 9 }]);
    }
}
