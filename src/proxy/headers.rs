//! Outbound header policy: what is stripped, what is forced, what is added.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use url::Url;

/// Security headers that must never reach the client; the proxied page would
/// refuse to run under them.
const STRIPPED_SECURITY_HEADERS: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
];

/// Proxy-identifying headers removed from the upstream request so the
/// upstream does not reject it as foreign.
const PROXY_IDENTIFYING_HEADERS: &[&str] = &[
    "host",
    "forwarded",
    "x-forwarded-for",
    "x-forwarded-proto",
    "x-forwarded-host",
    "x-real-ip",
];

// Helper function to identify hop-by-hop headers
pub fn is_hop_by_hop_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers for the upstream fetch: the inbound headers minus hop-by-hop and
/// proxy-identifying ones, with referer/origin pointing at the target's own
/// origin.
pub fn outbound_request_headers(inbound: &HeaderMap, target: &Url) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound.iter() {
        if is_hop_by_hop_header(name) || PROXY_IDENTIFYING_HEADERS.contains(&name.as_str()) {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }

    let origin = target.origin().ascii_serialization();
    if let Ok(value) = HeaderValue::from_str(&format!("{}/", origin)) {
        headers.insert(header::REFERER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&origin) {
        headers.insert(header::ORIGIN, value);
    }

    headers
}

/// Copy upstream response headers, dropping hop-by-hop headers, restrictive
/// security headers, and the content-length (bodies are re-framed after
/// decompression or rewriting).
pub fn copy_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.iter() {
        if is_hop_by_hop_header(name)
            || STRIPPED_SECURITY_HEADERS.contains(&name.as_str())
            || name == header::CONTENT_LENGTH
            || name == header::CONTENT_ENCODING
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Permissive cross-origin headers applied to every response.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-credentials",
        HeaderValue::from_static("true"),
    );
}

/// Resource-policy headers and media-type fixups for opaque assets.
/// Images and fonts need cross-origin resource policy for canvas/WebGL use;
/// font and SVG media types are corrected by URL extension because some
/// upstreams mislabel them.
pub fn apply_resource_policy(headers: &mut HeaderMap, target: &Url) {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let url = target.as_str().to_ascii_lowercase();

    if content_type.contains("image/") {
        headers.insert(
            "cross-origin-resource-policy",
            HeaderValue::from_static("cross-origin"),
        );
        headers.insert("timing-allow-origin", HeaderValue::from_static("*"));
    }

    let fontish = content_type.contains("font")
        || content_type.contains("woff")
        || content_type.contains("ttf")
        || content_type.contains("otf")
        || content_type.contains("eot");
    if fontish {
        headers.insert(
            "cross-origin-resource-policy",
            HeaderValue::from_static("cross-origin"),
        );
        let forced = if url.contains(".woff2") {
            Some("font/woff2")
        } else if url.contains(".woff") {
            Some("font/woff")
        } else if url.contains(".ttf") {
            Some("font/ttf")
        } else if url.contains(".otf") {
            Some("font/otf")
        } else if url.contains(".eot") {
            Some("application/vnd.ms-fontobject")
        } else {
            None
        };
        if let Some(forced) = forced {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(forced));
        }
    }

    if content_type.contains("svg") || url.contains(".svg") {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("image/svg+xml"),
        );
        headers.insert(
            "cross-origin-resource-policy",
            HeaderValue::from_static("cross-origin"),
        );
    }
}

/// Direct answer to a CORS preflight.
pub fn preflight_response() -> Response {
    (
        [
            ("access-control-allow-origin", "*"),
            ("access-control-allow-methods", "GET, POST, PUT, DELETE, OPTIONS"),
            ("access-control-allow-headers", "*"),
            ("access-control-max-age", "86400"),
        ],
        "",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn security_headers_are_stripped_from_responses() {
        let mut upstream = HeaderMap::new();
        upstream.insert("content-security-policy", HeaderValue::from_static("default-src 'self'"));
        upstream.insert("x-frame-options", HeaderValue::from_static("DENY"));
        upstream.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        upstream.insert(header::CONTENT_LENGTH, HeaderValue::from_static("100"));

        let out = copy_response_headers(&upstream);
        assert!(out.get("content-security-policy").is_none());
        assert!(out.get("x-frame-options").is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(out.get(header::CONTENT_TYPE).unwrap(), "text/html");
    }

    #[test]
    fn upstream_request_masquerades_as_same_origin() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("proxy.example"));
        inbound.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        inbound.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

        let out = outbound_request_headers(&inbound, &url("https://example.com/page"));
        assert!(out.get(header::HOST).is_none());
        assert!(out.get("x-forwarded-for").is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert_eq!(out.get(header::REFERER).unwrap(), "https://example.com/");
        assert_eq!(out.get(header::ORIGIN).unwrap(), "https://example.com");
        assert_eq!(out.get(header::ACCEPT).unwrap(), "text/html");
    }

    #[test]
    fn woff2_gets_forced_media_type_and_resource_policy() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/font-woff2"),
        );
        apply_resource_policy(&mut headers, &url("https://cdn.example/a.woff2"));
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "font/woff2");
        assert_eq!(
            headers.get("cross-origin-resource-policy").unwrap(),
            "cross-origin"
        );
    }

    #[test]
    fn images_get_timing_and_resource_policy() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        apply_resource_policy(&mut headers, &url("https://example.com/a.png"));
        assert_eq!(headers.get("timing-allow-origin").unwrap(), "*");
        assert_eq!(
            headers.get("cross-origin-resource-policy").unwrap(),
            "cross-origin"
        );
    }

    #[test]
    fn cors_is_permissive() {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers);
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(headers.get("access-control-allow-headers").unwrap(), "*");
    }
}
