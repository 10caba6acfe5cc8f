use crate::error::ConfigError;
use std::{env, str::FromStr, time::Duration};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PIPELINE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_MAX_REDIRECTS: usize = 5;
pub const DEFAULT_MAX_FIELD_LEN: usize = 2000;
pub const DEFAULT_MAX_RULE_INPUT: usize = 64 * 1024;

/// Limits applied to a single scrape invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeConfig {
    /// Deadline for the network part: DNS, connect, TLS, headers and body.
    pub fetch_timeout: Duration,
    /// Deadline for the whole invocation. The fetch never outlives it.
    pub pipeline_timeout: Duration,
    pub max_body_bytes: usize,
    pub max_redirects: usize,
    /// Maximum length of an output field, in characters.
    pub max_field_len: usize,
    /// Maximum number of bytes any single extraction rule looks at.
    pub max_rule_input: usize,
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            pipeline_timeout: DEFAULT_PIPELINE_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_field_len: DEFAULT_MAX_FIELD_LEN,
            max_rule_input: DEFAULT_MAX_RULE_INPUT,
            user_agent: format!("catalog-scraper/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ScrapeConfig {
    /// Defaults overridden by `SCRAPER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = ScrapeConfig::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "SCRAPER_FETCH_TIMEOUT_MS")? {
            config.fetch_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SCRAPER_TIMEOUT_MS")? {
            config.pipeline_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "SCRAPER_MAX_BODY_BYTES")? {
            config.max_body_bytes = n;
        }
        if let Some(n) = parse_var(&lookup, "SCRAPER_MAX_REDIRECTS")? {
            config.max_redirects = n;
        }
        if let Some(n) = parse_var(&lookup, "SCRAPER_MAX_FIELD_LEN")? {
            config.max_field_len = n;
        }
        if let Some(n) = parse_var(&lookup, "SCRAPER_MAX_RULE_INPUT")? {
            config.max_rule_input = n;
        }
        if let Some(agent) = lookup("SCRAPER_USER_AGENT") {
            config.user_agent = agent;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::Zero("fetch_timeout"));
        }
        if self.pipeline_timeout.is_zero() {
            return Err(ConfigError::Zero("pipeline_timeout"));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Zero("max_body_bytes"));
        }
        if self.max_rule_input == 0 {
            return Err(ConfigError::Zero("max_rule_input"));
        }
        // Room for at least one character plus the truncation marker.
        if self.max_field_len < 2 {
            return Err(ConfigError::InvalidValue {
                name: "max_field_len",
                value: self.max_field_len.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(None),
    }
}
