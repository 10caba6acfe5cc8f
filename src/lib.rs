//! Single-page scraper for university and scholarship catalog pages.
//!
//! One invocation fetches one URL and turns it into an [`OutputRecord`],
//! or a typed failure. Nothing is shared between invocations except the
//! read-only rule table.

pub mod catalog;
pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod mapper;
pub mod normalizer;
pub mod pipeline;

mod error;
mod utils;

pub use catalog::OutputRecord;
pub use config::ScrapeConfig;
pub use error::{ConfigError, ErrorKind, FailureCategory, RuleError, ScrapeError};
pub use extractor::{Extractor, Field, RuleSet, RuleSpec};
pub use fetcher::{Fetcher, HttpFetcher, RawDocument};
pub use pipeline::{Pipeline, PipelineState, ScrapeOutcome, ScrapeRequest, ScrapeResult};

/// Scrapes `url` with default limits and the built-in rules.
/// Any failure, including a bad URL, is reported as `None`.
pub async fn scrape_url(url: &str) -> Option<OutputRecord> {
    let pipeline = Pipeline::new(&ScrapeConfig::default()).ok()?;
    pipeline.scrape_url(url).await
}
