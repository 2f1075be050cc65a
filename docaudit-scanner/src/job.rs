use crate::classify::DEFAULT_KEYWORDS;
use crate::error::{CrawlError, Result};
use crate::scope::{ScopeFilter, domain_of};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_PAGE_LIMIT: usize = 999;

/// Immutable description of a crawl job, as stored in the job catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlJobDefinition {
    pub job_type: String,
    pub seed_url: String,
    /// Restrict the crawl to the seed's domain.
    pub single_domain: bool,
    pub subpath: Option<String>,
    pub page_limit: usize,
    pub run_daily: bool,
    pub keywords: Vec<String>,
}

impl CrawlJobDefinition {
    pub fn new(job_type: impl Into<String>, seed_url: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            seed_url: seed_url.into(),
            single_domain: true,
            subpath: None,
            page_limit: DEFAULT_PAGE_LIMIT,
            run_daily: false,
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn with_subpath(mut self, subpath: impl Into<String>) -> Self {
        self.subpath = Some(subpath.into());
        self
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit;
        self
    }

    pub fn with_single_domain(mut self, single_domain: bool) -> Self {
        self.single_domain = single_domain;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_run_daily(mut self, run_daily: bool) -> Self {
        self.run_daily = run_daily;
        self
    }

    /// Check the definition and derive the crawl scope from it.
    pub fn validate(&self) -> Result<CrawlScope> {
        if self.job_type.trim().is_empty() {
            return Err(CrawlError::ScopeConfig("job type is empty".to_string()));
        }

        let seed_url = self.seed_url.trim();
        if seed_url.is_empty() {
            return Err(CrawlError::ScopeConfig(format!(
                "job '{}' has no seed URL",
                self.job_type
            )));
        }

        let mut seed = Url::parse(seed_url).map_err(|e| {
            CrawlError::ScopeConfig(format!("seed URL '{}' is invalid: {}", seed_url, e))
        })?;
        seed.set_fragment(None);

        if !matches!(seed.scheme(), "http" | "https") {
            return Err(CrawlError::ScopeConfig(format!(
                "seed URL '{}' must use http or https",
                seed_url
            )));
        }

        if let Some(subpath) = &self.subpath
            && !subpath.starts_with('/')
        {
            return Err(CrawlError::ScopeConfig(format!(
                "subpath '{}' must start with '/'",
                subpath
            )));
        }

        if self.subpath.is_some() && !self.single_domain {
            return Err(CrawlError::ScopeConfig(format!(
                "job '{}' sets a subpath but follows any domain; a subpath needs the domain restriction",
                self.job_type
            )));
        }

        if self.page_limit == 0 {
            return Err(CrawlError::ScopeConfig("page limit must be at least 1".to_string()));
        }

        let filter = if self.single_domain {
            let domain = domain_of(&seed).ok_or_else(|| {
                CrawlError::ScopeConfig(format!("seed URL '{}' has no host", seed_url))
            })?;
            ScopeFilter::new(Some(domain), self.subpath.clone())
        } else {
            ScopeFilter::unrestricted()
        };

        Ok(CrawlScope {
            seed,
            filter,
            page_limit: self.page_limit,
        })
    }
}

/// A validated job: where to start, what may be followed, when to stop.
#[derive(Debug, Clone)]
pub struct CrawlScope {
    pub seed: Url,
    pub filter: ScopeFilter,
    pub page_limit: usize,
}
