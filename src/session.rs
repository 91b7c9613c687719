//! Origin memory: a short-lived cookie remembering the upstream origin, so
//! proxy-relative requests that arrive without an explicit target parameter
//! can still resolve.

use axum::http::{header, HeaderMap};
use std::time::Duration;
use url::Url;

/// Read the remembered upstream origin from the inbound cookie header.
pub fn remembered_origin(headers: &HeaderMap, cookie_name: &str) -> Option<Url> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in raw.split(';') {
        let part = part.trim();
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        if name == cookie_name {
            let decoded = urlencoding::decode(value).ok()?;
            return Url::parse(&decoded).ok();
        }
    }
    None
}

/// Build the Set-Cookie value remembering `origin` for `ttl`.
pub fn remember_origin(origin: &str, cookie_name: &str, ttl: Duration) -> String {
    format!(
        "{}={}; Path=/; Secure; HttpOnly; SameSite=Lax; Max-Age={}",
        cookie_name,
        urlencoding::encode(origin),
        ttl.as_secs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn roundtrip() {
        let cookie = remember_origin("https://example.com", "__pt", Duration::from_secs(1800));
        assert!(cookie.starts_with("__pt=https%3A%2F%2Fexample.com"));
        assert!(cookie.contains("Max-Age=1800"));
        assert!(cookie.contains("HttpOnly"));

        let mut headers = HeaderMap::new();
        let pair = cookie.split(';').next().unwrap().to_string();
        headers.insert(header::COOKIE, HeaderValue::from_str(&pair).unwrap());
        let origin = remembered_origin(&headers, "__pt").unwrap();
        assert_eq!(origin.as_str(), "https://example.com/");
    }

    #[test]
    fn other_cookies_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("session=abc; __pt=https%3A%2F%2Fexample.com; theme=dark"),
        );
        assert!(remembered_origin(&headers, "__pt").is_some());
        assert!(remembered_origin(&headers, "__missing").is_none());
    }

    #[test]
    fn garbage_cookie_value_is_none() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("__pt=not-a-url"));
        assert!(remembered_origin(&headers, "__pt").is_none());
    }
}
