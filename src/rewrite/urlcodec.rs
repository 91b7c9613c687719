//! Mapping between absolute target URLs and proxy-relative URLs.
//!
//! Encoding keeps the proxy's own path and carries the target under a
//! reserved query parameter, preserving the operator parameters that
//! configure the overlay downstream. Decoding recovers the target from the
//! reserved parameter, falling back to a remembered origin.

use url::{form_urlencoded, Url};

use super::ProxyIdentity;

/// Reserved query parameter carrying the encoded target URL.
pub const TARGET_PARAM: &str = "u";

/// Operator parameters that must survive every rewritten link. Interpreted
/// by the overlay, opaque to the rewriting engine.
pub const PRESERVED_PARAMS: &[&str] = &[
    "name", "n", "persist", "forceHTML", "delay", "tries", "interval", "xp", "sel", "old", "ww",
    "snapshot", "svg",
];

/// URL forms that must never be rewritten.
pub fn is_skippable(url: &str) -> bool {
    url.is_empty()
        || url.starts_with("data:")
        || url.starts_with("blob:")
        || url.starts_with("about:")
        || url.starts_with("javascript:")
        || url.starts_with('#')
}

/// Build a proxy-relative URL for an absolute target.
///
/// Stable for a given input, and idempotent: a URL that already points at
/// the proxy's own origin is returned unchanged.
pub fn encode(identity: &ProxyIdentity, inbound_query: &str, absolute: &str) -> String {
    if absolute.starts_with(&identity.origin) {
        return absolute.to_string();
    }

    let mut query = form_urlencoded::Serializer::new(String::new());
    for (key, value) in form_urlencoded::parse(inbound_query.as_bytes()) {
        if PRESERVED_PARAMS.contains(&key.as_ref()) {
            query.append_pair(&key, &value);
        }
    }
    query.append_pair(TARGET_PARAM, absolute);

    format!("{}?{}", identity.endpoint(), query.finish())
}

/// Extract the reserved target parameter from a raw query string.
pub fn target_param(query: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TARGET_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// Recover the absolute target for an inbound request: the reserved
/// parameter if present, otherwise the request's own path and query resolved
/// against a previously remembered origin.
pub fn decode(query: &str, path_and_query: &str, remembered_origin: Option<&Url>) -> Option<Url> {
    if let Some(raw) = target_param(query) {
        return Url::parse(&raw).ok();
    }
    remembered_origin?.join(path_and_query).ok()
}
