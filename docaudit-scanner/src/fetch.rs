//! The fetch capability used by the crawl loop.

use crate::classify::is_html_content_type;
use crate::error::{FetchError, Result};
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const USER_AGENT: &str = concat!("docaudit/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedPage {
    pub fn is_html(&self) -> bool {
        is_html_content_type(self.content_type.as_deref())
    }
}

pub trait Fetcher {
    fn fetch(&self, url: &Url) -> impl Future<Output = std::result::Result<FetchedPage, FetchError>> + Send;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(10)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<FetchedPage, FetchError> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(FetchError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().is_none() {
            return Err(FetchError::InvalidUrl(format!("{} has no host", url)));
        }

        debug!("Fetching {}", url);
        let response = self.client.get(url.clone()).send().await?;

        let status_code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        // Non-HTML bodies are never parsed, so they are not downloaded either
        let body = if is_html_content_type(content_type.as_deref()) {
            response.text().await?
        } else {
            String::new()
        };

        Ok(FetchedPage {
            status_code,
            content_type,
            body,
        })
    }
}
