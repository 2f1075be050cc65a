//! Domain and subpath restriction for discovered links.
//!
//! Domains are compared on their last two labels, so `docs.example.com` and
//! `www.example.com` are the same site. Multi-label public suffixes are not
//! special-cased: `a.co.uk` and `b.co.uk` also compare equal. The subpath is
//! a plain string prefix of the URL path, so `/docs` also admits
//! `/docs-archive`.

use url::{Host, Url};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    domain: Option<String>,
    subpath: Option<String>,
}

impl ScopeFilter {
    pub fn new(domain: Option<String>, subpath: Option<String>) -> Self {
        Self { domain, subpath }
    }

    /// A filter that admits every absolute URL.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn subpath(&self) -> Option<&str> {
        self.subpath.as_deref()
    }

    pub fn allows(&self, url: &Url) -> bool {
        in_scope(url, self.domain.as_deref(), self.subpath.as_deref())
    }
}

/// Decide whether `url` may be crawled. Without a target domain every URL is
/// in scope and the subpath is not consulted.
pub fn in_scope(url: &Url, target_domain: Option<&str>, subpath_prefix: Option<&str>) -> bool {
    let Some(target_domain) = target_domain else {
        return true;
    };

    let Some(host) = url.host() else {
        return false;
    };

    if !same_domain(&host, target_domain) {
        return false;
    }

    match subpath_prefix {
        Some(prefix) => url.path().starts_with(prefix),
        None => true,
    }
}

/// Host of `url`, the natural target domain for a seed.
pub fn domain_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_string())
}

/// The last two dot-separated labels of a host name, lower-cased.
pub fn second_level_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        format!("{}.{}", labels[labels.len() - 2], labels[labels.len() - 1])
    } else {
        host
    }
}

fn same_domain(host: &Host<&str>, target_domain: &str) -> bool {
    match host {
        Host::Domain(name) => second_level_domain(name) == second_level_domain(target_domain),
        // IP literals have no domain hierarchy to reduce
        Host::Ipv4(addr) => addr.to_string() == target_domain,
        Host::Ipv6(addr) => {
            let target = target_domain.trim_start_matches('[').trim_end_matches(']');
            addr.to_string() == target
        }
    }
}
