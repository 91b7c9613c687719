use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Usage text served when no target URL can be resolved.
pub const USAGE: &str = "\
Rewriting reverse proxy

Usage: /?u=<URL>&name=<name>

Parameters:
  u (required)    - Target URL (URL encoded)
  name (required) - Replacement text

Optional:
  sel       - CSS selector for element
  xp        - XPath for element
  old       - Text to find/replace globally
  ww        - Whole word match (1)
  delay     - Delay in ms (default 300)
  tries     - Retry attempts (default 900)
  interval  - Retry interval ms (default 100)
  persist   - Keep origin cookie (1)
  forceHTML - Force HTML processing (1)
  snapshot  - Freeze after replace (1)

Example:
  /?u=https%3A%2F%2Fexample.com&name=John&sel=.username
";

/// Application-wide error types
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("no target URL could be resolved")]
    MissingTarget,

    #[error("invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] axum::http::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingTarget => StatusCode::BAD_REQUEST,
            ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // The delivered surface is plain text: a usage message for
        // resolution failures, a diagnostic line for everything else.
        let body = match &self {
            ProxyError::MissingTarget => USAGE.to_string(),
            other => format!("Proxy error: {}\n", other),
        };

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_target_is_a_usage_message() {
        let response = ProxyError::MissingTarget.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_failures_are_bad_gateway() {
        assert_eq!(
            ProxyError::Upstream("connection refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::UpstreamTimeout("deadline".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
