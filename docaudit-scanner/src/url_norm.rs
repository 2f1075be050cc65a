//! URL canonicalization and scheme-insensitive identity.

use tracing::debug;
use url::{Position, Url};

/// Resolve a link target against the page it was found on.
///
/// The fragment is removed before resolution; a target that is empty once the
/// fragment is gone (`""`, `"#top"`) is discarded. Targets the URL parser
/// cannot resolve at all are discarded too. Unusual but well-formed targets
/// such as `mailto:` are kept and left for the fetch step to reject.
pub fn normalize(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    let target = href.split('#').next().unwrap_or_default();
    if target.is_empty() {
        return None;
    }

    match base.join(target) {
        Ok(mut resolved) => {
            resolved.set_fragment(None);
            Some(resolved)
        }
        Err(e) => {
            debug!("Dropping unresolvable link '{}' on {}: {}", href, base, e);
            None
        }
    }
}

/// Key under which a URL is deduplicated. `http` and `https` URLs share a key
/// when everything after the scheme matches.
pub fn identity_key(url: &Url) -> String {
    match url.scheme() {
        "http" | "https" => url[Position::AfterScheme..].to_string(),
        _ => url.as_str().to_string(),
    }
}

/// True when both URLs denote the same resource, ignoring http/https.
pub fn same_identity(a: &Url, b: &Url) -> bool {
    identity_key(a) == identity_key(b)
}
