//! Vaultscope driver: product importers, the per-chain import pipeline, data
//! sinks and the scheduling loop.

mod creation;
pub mod driver;
pub mod importer;
pub mod pipeline;
pub mod progress;
pub mod records;
pub mod sink;

#[cfg(test)]
mod testing;

pub use creation::ExplorerCreationLookup;
pub use driver::{Driver, ImporterOutcome, load_products, parse_products};
pub use importer::{FetchTarget, ProductImporter, SharePriceImporter, TransferImporter};
pub use pipeline::{
    AttemptState, ImportJob, ImportPipeline, PipelineSettings, ProductImportOutcome,
};
pub use progress::{ProductProgress, ProgressBoard};
pub use records::{FetchedRecord, ImportedRecord, RecordData};
pub use sink::{ClickhouseSink, DataSink, LoggingSink};
