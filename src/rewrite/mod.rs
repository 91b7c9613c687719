pub mod classify;
pub mod css;
pub mod html;
pub mod urlcodec;

pub use classify::Classification;

use url::Url;

/// The (origin, path) pair the codec uses as the stable prefix for every
/// rewritten URL. Derived from the inbound request so the proxy stays
/// host-relocatable; never hardcoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyIdentity {
    pub origin: String,
    pub path: String,
}

impl ProxyIdentity {
    pub fn new(origin: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            path: path.into(),
        }
    }

    /// The proxy endpoint without a query string.
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.origin, self.path)
    }
}

/// Read-only state threaded through every rewrite call for one response.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    pub identity: ProxyIdentity,
    /// Raw query string of the inbound request; operator parameters in it
    /// are preserved across every rewritten link.
    pub inbound_query: String,
    /// The target URL relative references resolve against.
    pub base_url: Url,
    /// Path of the overlay script endpoint on this proxy.
    pub overlay_path: String,
}

impl RewriteContext {
    /// Resolve a raw reference against the base URL and encode it as a
    /// proxy-relative URL. `None` means "rewrite not applied": the value is
    /// skippable, or it did not resolve to a valid absolute URL.
    pub fn rewrite_url(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if urlcodec::is_skippable(raw) {
            return None;
        }
        let absolute = self.base_url.join(raw).ok()?;
        Some(urlcodec::encode(
            &self.identity,
            &self.inbound_query,
            absolute.as_str(),
        ))
    }

    pub fn overlay_url(&self) -> String {
        format!("{}{}", self.identity.origin, self.overlay_path)
    }
}
