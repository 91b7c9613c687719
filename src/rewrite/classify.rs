//! Per-response handling decision: transform as a document, rewrite as a
//! stylesheet, or pass through untouched.
//!
//! Upstream servers mislabel generated assets often enough that the declared
//! media type cannot be trusted alone; URL shape is a second signal. The
//! priority order below is tuned against real upstream quirks (generated
//! stylesheets served without an extension in particular) and must not be
//! reordered.

use axum::http::{header, HeaderMap};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// How a response body will be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Document,
    Stylesheet,
    Opaque,
}

impl Classification {
    /// Media type to declare on the outbound response. `None` keeps the
    /// upstream value (subject to the assembler's fixups).
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Classification::Document => Some("text/html; charset=utf-8"),
            Classification::Stylesheet => Some("text/css; charset=utf-8"),
            Classification::Opaque => None,
        }
    }
}

static CSS_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.css(\?|$)").unwrap()
});

static OPAQUE_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(js|json|xml|txt|woff2?|ttf|otf|eot|svg|png|jpe?g|gif|webp|ico|pdf|zip|mp4|mp3|webm|ogg)(\?|$)").unwrap()
});

const OPAQUE_CONTENT_TYPES: &[&str] = &[
    "application/javascript",
    "text/javascript",
    "application/json",
    "font/",
    "application/font",
    "image/",
    "video/",
    "audio/",
    "application/pdf",
    "application/zip",
    "application/octet-stream",
    "text/plain",
    "application/xml",
    "text/xml",
];

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

/// The request is a top-level navigation, not a subresource fetch.
fn is_top_level_document(request_headers: &HeaderMap) -> bool {
    header_value(request_headers, "sec-fetch-dest") == "document"
}

/// Decide how to handle one upstream response. Pure function of its inputs.
pub fn classify(
    target: &Url,
    upstream_headers: &HeaderMap,
    request_headers: &HeaderMap,
    force_html: bool,
) -> Classification {
    let url = target.as_str().to_ascii_lowercase();
    let content_type = header_value(upstream_headers, header::CONTENT_TYPE.as_str()).to_ascii_lowercase();

    // Stylesheet signals come first: generated stylesheets are the dominant
    // mislabeling case (font providers serving css without an extension).
    if content_type.contains("text/css") {
        return Classification::Stylesheet;
    }
    if CSS_EXTENSION.is_match(&url)
        || url.contains("fonts.googleapis.com/css")
        || url.contains("/css?")
    {
        return Classification::Stylesheet;
    }

    if OPAQUE_EXTENSION.is_match(&url) {
        return Classification::Opaque;
    }

    if OPAQUE_CONTENT_TYPES.iter().any(|t| content_type.contains(t)) {
        return Classification::Opaque;
    }

    if content_type.contains("text/html") || content_type.contains("application/xhtml") {
        return Classification::Document;
    }

    // forceHTML is honored only for top-level navigations; forcing it on a
    // subresource fetch would corrupt non-navigational fragments.
    if force_html && is_top_level_document(request_headers) {
        return Classification::Document;
    }

    let accept = header_value(request_headers, header::ACCEPT.as_str()).to_ascii_lowercase();
    if accept.contains("text/html") && is_top_level_document(request_headers) {
        return Classification::Document;
    }

    Classification::Opaque
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn css_content_type_wins_regardless_of_extension() {
        let decision = classify(
            &url("https://cdn.example/bundle"),
            &headers(&[("content-type", "text/css; charset=utf-8")]),
            &HeaderMap::new(),
            false,
        );
        assert_eq!(decision, Classification::Stylesheet);
    }

    #[test]
    fn css_extension_wins_over_wrong_content_type() {
        let decision = classify(
            &url("https://cdn.example/site.css?v=3"),
            &headers(&[("content-type", "text/plain")]),
            &HeaderMap::new(),
            false,
        );
        assert_eq!(decision, Classification::Stylesheet);
    }

    #[test]
    fn font_provider_stylesheet_endpoint_without_extension() {
        let decision = classify(
            &url("https://fonts.googleapis.com/css?family=Roboto"),
            &HeaderMap::new(),
            &HeaderMap::new(),
            false,
        );
        assert_eq!(decision, Classification::Stylesheet);
    }

    #[test]
    fn png_extension_is_opaque_regardless_of_declared_type() {
        let decision = classify(
            &url("https://example.com/logo.png"),
            &headers(&[("content-type", "text/html")]),
            &HeaderMap::new(),
            false,
        );
        assert_eq!(decision, Classification::Opaque);
    }

    #[test]
    fn woff2_is_opaque() {
        let decision = classify(
            &url("https://example.com/font.woff2"),
            &headers(&[("content-type", "application/font-woff2")]),
            &HeaderMap::new(),
            false,
        );
        assert_eq!(decision, Classification::Opaque);
    }

    #[test]
    fn html_content_type_is_a_document() {
        let decision = classify(
            &url("https://example.com/page"),
            &headers(&[("content-type", "text/html; charset=utf-8")]),
            &HeaderMap::new(),
            false,
        );
        assert_eq!(decision, Classification::Document);
    }

    #[test]
    fn force_html_requires_top_level_navigation() {
        let target = url("https://example.com/fragment");
        let upstream = HeaderMap::new();

        let subresource = classify(&target, &upstream, &HeaderMap::new(), true);
        assert_eq!(subresource, Classification::Opaque);

        let top_level = classify(
            &target,
            &upstream,
            &headers(&[("sec-fetch-dest", "document")]),
            true,
        );
        assert_eq!(top_level, Classification::Document);
    }

    #[test]
    fn accept_negotiation_only_for_top_level() {
        let target = url("https://example.com/page");
        let upstream = HeaderMap::new();

        let subresource = classify(
            &target,
            &upstream,
            &headers(&[("accept", "text/html,*/*")]),
            false,
        );
        assert_eq!(subresource, Classification::Opaque);

        let top_level = classify(
            &target,
            &upstream,
            &headers(&[("accept", "text/html,*/*"), ("sec-fetch-dest", "document")]),
            false,
        );
        assert_eq!(top_level, Classification::Document);
    }

    #[test]
    fn default_is_opaque() {
        let decision = classify(
            &url("https://example.com/mystery"),
            &HeaderMap::new(),
            &HeaderMap::new(),
            false,
        );
        assert_eq!(decision, Classification::Opaque);
    }
}
