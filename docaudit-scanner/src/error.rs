use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Invalid job configuration: {0}")]
    ScopeConfig(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Per-URL fetch failure. Always recovered inside the crawl loop.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// A run history or page/edge log write failed.
#[derive(Error, Debug)]
#[error("{operation} failed: {message}")]
pub struct PersistenceError {
    pub operation: &'static str,
    pub message: String,
}

impl PersistenceError {
    pub fn new(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self {
            operation,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CrawlError>;
