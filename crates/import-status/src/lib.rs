//! Per-product import progress: which block ranges were attempted and which
//! must be attempted again.

mod buffer;
mod repository;
mod status;
mod store;

pub use buffer::{ReportBuffer, ReportBufferConfig};
pub use repository::{ImportStatusRepository, InMemoryImportStatusRepository};
pub use status::{ContractCreation, ImportStatus, RangeReport};
pub use store::{ContractCreationLookup, ImportStatusStore};
