use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScrapeError {
    #[error("Invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Response body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Cannot decode document: {0}")]
    Decode(String),

    #[error("No usable fields extracted from {0}")]
    Validation(String),
}

impl ScrapeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrapeError::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            ScrapeError::Network(_) | ScrapeError::Status { .. } => ErrorKind::Network,
            ScrapeError::Timeout(_) => ErrorKind::Timeout,
            ScrapeError::TooLarge { .. } => ErrorKind::TooLarge,
            ScrapeError::Decode(_) => ErrorKind::Decode,
            ScrapeError::Validation(_) => ErrorKind::Validation,
        }
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScrapeError::Timeout(err.to_string())
        } else {
            ScrapeError::Network(err.to_string())
        }
    }
}

/// Failure taxonomy carried by [`crate::ScrapeResult::Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    Network,
    Timeout,
    TooLarge,
    Decode,
    Validation,
}

/// Coarse grouping of [`ErrorKind`] for callers that only report
/// what went wrong, never why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    BadInput,
    Unreachable,
    NothingExtractable,
}

impl ErrorKind {
    pub fn category(self) -> FailureCategory {
        match self {
            ErrorKind::InvalidUrl => FailureCategory::BadInput,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::TooLarge => {
                FailureCategory::Unreachable
            }
            ErrorKind::Decode | ErrorKind::Validation => FailureCategory::NothingExtractable,
        }
    }

    /// Whether repeating the whole invocation later may succeed.
    /// Nothing inside the pipeline acts on this.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Timeout)
    }
}

impl FailureCategory {
    pub fn public_message(self) -> &'static str {
        match self {
            FailureCategory::BadInput => "The given URL is not a valid http(s) address",
            FailureCategory::Unreachable => "The page could not be retrieved",
            FailureCategory::NothingExtractable => "No information could be extracted from the page",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value `{value}` for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Cannot build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Cannot read rule file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Rules(#[from] RuleError),
}

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Invalid selector `{css}`: {reason}")]
    Selector { css: String, reason: String },

    #[error("Invalid pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid meta key `{0}`")]
    MetaKey(String),

    #[error("Rule for {0} has nothing to match")]
    Empty(String),

    #[error("Malformed rule table: {0}")]
    Json(#[from] serde_json::Error),
}
