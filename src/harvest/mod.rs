//! Per-article repository link extraction.

mod sources;
mod worker;

pub use sources::{ArticleHarvester, ArticleOutcome};
pub use worker::{run_extraction_pass, ArticleWorker, ExtractionSummary};
