use crate::{
    catalog::{self, OutputRecord},
    config::ScrapeConfig,
    error::{ConfigError, ErrorKind, ScrapeError},
    extractor::{Extractor, RuleSet},
    fetcher::{Fetcher, HttpFetcher, RawDocument},
    mapper::Mapper,
    normalizer,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> ScrapeRequest {
        ScrapeRequest { url: url.into() }
    }

    /// Accepts absolute `http`/`https` URLs with a host and nothing else.
    pub fn validate(&self) -> Result<Url, ScrapeError> {
        let invalid = |reason: &str| ScrapeError::InvalidUrl {
            url: self.url.clone(),
            reason: reason.to_string(),
        };

        let url = Url::parse(self.url.trim()).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(&format!("scheme `{}` is not allowed", url.scheme())));
        }
        match url.host_str() {
            Some(host) if !host.is_empty() => Ok(url),
            _ => Err(invalid("missing host")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScrapeResult {
    Success(OutputRecord),
    Failure { kind: ErrorKind, message: String },
}

impl ScrapeResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ScrapeResult::Success(_))
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ScrapeResult::Success(_) => None,
            ScrapeResult::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn into_record(self) -> Option<OutputRecord> {
        match self {
            ScrapeResult::Success(record) => Some(record),
            ScrapeResult::Failure { .. } => None,
        }
    }
}

impl From<Result<OutputRecord, ScrapeError>> for ScrapeResult {
    fn from(result: Result<OutputRecord, ScrapeError>) -> Self {
        match result {
            Ok(record) => ScrapeResult::Success(record),
            Err(err) => ScrapeResult::Failure {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Fetching,
    Normalizing,
    Extracting,
    Validating,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed)
    }
}

/// States visited by one invocation, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Trace(Vec<PipelineState>);

impl Trace {
    fn new() -> Trace {
        Trace(vec![PipelineState::Idle])
    }

    fn current(&self) -> PipelineState {
        self.0.last().copied().unwrap_or(PipelineState::Idle)
    }

    /// Moves strictly forward; terminal states are final.
    fn advance(&mut self, next: PipelineState) {
        let current = self.current();
        if current.is_terminal() || next <= current {
            warn!("Ignoring transition {:?} -> {:?}", current, next);
            return;
        }
        debug!("{:?} -> {:?}", current, next);
        self.0.push(next);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeOutcome {
    pub result: ScrapeResult,
    pub states: Vec<PipelineState>,
}

/// Fetch → normalize → extract → validate, under one deadline.
pub struct Pipeline<F = HttpFetcher> {
    fetcher: F,
    extractor: Extractor,
    mapper: Mapper,
    timeout: Duration,
}

impl Pipeline<HttpFetcher> {
    /// HTTP pipeline with the built-in catalog rules.
    pub fn new(config: &ScrapeConfig) -> Result<Self, ConfigError> {
        Self::with_rules(config, catalog::rules())
    }

    pub fn with_rules(config: &ScrapeConfig, rules: Arc<RuleSet>) -> Result<Self, ConfigError> {
        Pipeline::with_fetcher(HttpFetcher::new(config)?, rules, config)
    }
}

impl<F: Fetcher> Pipeline<F> {
    pub fn with_fetcher(
        fetcher: F,
        rules: Arc<RuleSet>,
        config: &ScrapeConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Pipeline {
            fetcher,
            extractor: Extractor::new(rules, config.max_rule_input),
            mapper: Mapper::new(config.max_field_len),
            timeout: config.pipeline_timeout,
        })
    }

    pub async fn scrape(&self, request: &ScrapeRequest) -> ScrapeResult {
        self.scrape_traced(request).await.result
    }

    /// Record on success, `None` on any failure.
    pub async fn scrape_url(&self, url: &str) -> Option<OutputRecord> {
        self.scrape(&ScrapeRequest::new(url)).await.into_record()
    }

    pub async fn scrape_traced(&self, request: &ScrapeRequest) -> ScrapeOutcome {
        let mut trace = Trace::new();
        let deadline = Instant::now() + self.timeout;

        let result = self.run(request, deadline, &mut trace).await;
        match &result {
            Ok(record) => {
                trace.advance(PipelineState::Succeeded);
                info!(
                    "Scraped {} ({} fields)",
                    request.url,
                    record.field_count()
                );
            }
            Err(err) => {
                trace.advance(PipelineState::Failed);
                warn!("Failed to scrape {}: {}", request.url, err);
            }
        }

        ScrapeOutcome {
            result: result.into(),
            states: trace.0,
        }
    }

    async fn run(
        &self,
        request: &ScrapeRequest,
        deadline: Instant,
        trace: &mut Trace,
    ) -> Result<OutputRecord, ScrapeError> {
        let url = request.validate()?;

        trace.advance(PipelineState::Fetching);
        // Dropping the fetch future on timeout aborts the request.
        let raw = match time::timeout_at(deadline, self.fetcher.fetch(&url, deadline)).await {
            Ok(raw) => raw?,
            Err(_) => return Err(ScrapeError::Timeout(format!("fetching {}", url))),
        };

        let extractor = self.extractor.clone();
        let mapper = self.mapper;
        let source_url = request.url.trim().to_string();
        let task = tokio::task::spawn_blocking(move || {
            let mut reached = Vec::new();
            let result = process(raw, &extractor, &mapper, &source_url, &mut reached);
            (result, reached)
        });

        let (result, reached) = match time::timeout_at(deadline, task).await {
            Ok(Ok(done)) => done,
            Ok(Err(err)) => {
                return Err(ScrapeError::Decode(format!(
                    "processing {} aborted: {}",
                    url, err
                )))
            }
            Err(_) => return Err(ScrapeError::Timeout(format!("processing {}", url))),
        };
        for state in reached {
            trace.advance(state);
        }
        result
    }
}

/// The synchronous stages. The parsed tree lives and dies in here.
pub fn process(
    raw: RawDocument,
    extractor: &Extractor,
    mapper: &Mapper,
    source_url: &str,
    reached: &mut Vec<PipelineState>,
) -> Result<OutputRecord, ScrapeError> {
    reached.push(PipelineState::Normalizing);
    let doc = normalizer::normalize(raw)?;

    reached.push(PipelineState::Extracting);
    let record = extractor.extract(&doc);
    debug!("Extracted {} raw fields from {}", record.len(), source_url);

    reached.push(PipelineState::Validating);
    mapper.map(record, source_url)
}
