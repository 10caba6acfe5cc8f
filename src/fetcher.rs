use crate::{
    config::ScrapeConfig,
    error::{ConfigError, ScrapeError},
    utils,
};
use chrono::{DateTime, FixedOffset};
use reqwest::{header::CONTENT_TYPE, redirect, Client, Url};
use tokio::time::{self, Instant};
use tracing::debug;

/// A fetched response, before any decoding.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Final URL after redirects.
    pub url: Url,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<FixedOffset>,
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieves `url`, giving up once `deadline` has passed.
    async fn fetch(&self, url: &Url, deadline: Instant) -> Result<RawDocument, ScrapeError>;
}

pub struct HttpFetcher {
    client: Client,
    timeout: time::Duration,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &ScrapeConfig) -> Result<HttpFetcher, ConfigError> {
        config.validate()?;
        let client = Client::builder()
            .redirect(redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(HttpFetcher {
            client,
            timeout: config.fetch_timeout,
            max_body_bytes: config.max_body_bytes,
        })
    }

    async fn fetch_body(&self, url: &Url) -> Result<RawDocument, ScrapeError> {
        debug!("Visit {}", url);
        let mut response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        let final_url = response.url().clone();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url: final_url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        let mut body = BodyBuffer::new(self.max_body_bytes);
        if let Some(len) = response.content_length() {
            body.expect_len(len)?;
        }
        while let Some(chunk) = response.chunk().await? {
            body.push(&chunk)?;
        }

        debug!(
            "Fetched {} ({}, {} bytes)",
            final_url,
            status.as_u16(),
            body.len()
        );

        Ok(RawDocument {
            url: final_url,
            status_code: status.as_u16(),
            content_type,
            body: body.into_inner(),
            fetched_at: utils::get_now(),
        })
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, deadline: Instant) -> Result<RawDocument, ScrapeError> {
        let deadline = deadline.min(Instant::now() + self.timeout);
        // Dropping the request future on timeout closes its connection.
        match time::timeout_at(deadline, self.fetch_body(url)).await {
            Ok(result) => result,
            Err(_) => Err(ScrapeError::Timeout(format!("fetching {}", url))),
        }
    }
}

/// Accumulates a response body, refusing to grow past `limit` bytes.
#[derive(Debug)]
pub(crate) struct BodyBuffer {
    bytes: Vec<u8>,
    limit: usize,
}

impl BodyBuffer {
    pub(crate) fn new(limit: usize) -> BodyBuffer {
        BodyBuffer {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Fails early on a declared length; the streamed length is still checked.
    pub(crate) fn expect_len(&mut self, len: u64) -> Result<(), ScrapeError> {
        if len > self.limit as u64 {
            return Err(ScrapeError::TooLarge { limit: self.limit });
        }
        self.bytes.reserve(len as usize);
        Ok(())
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) -> Result<(), ScrapeError> {
        if self.bytes.len() + chunk.len() > self.limit {
            return Err(ScrapeError::TooLarge { limit: self.limit });
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}
