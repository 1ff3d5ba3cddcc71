//! Storage layer: the DuckDB-backed document corpus and posting index.

mod error;
pub use error::StoreError;

mod duck;
pub use duck::{CorpusCounts, DuckStore, ImportSummary, LabelSeed};
