use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, uri::Uri, HeaderMap, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, info, instrument, warn};
use url::{form_urlencoded, Url};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::rewrite::{classify, css, html, urlcodec, Classification, ProxyIdentity, RewriteContext};
use crate::runtime;
use crate::session;

use super::headers;

/// Chunks buffered on each side of the markup transformer. Both channels are
/// bounded so a slow client backpressures the upstream read.
const TRANSFORM_CHANNEL_DEPTH: usize = 16;

/// The rewriting proxy engine: resolves targets, fetches them, and assembles
/// the rewritten response.
pub struct RewritingProxy {
    config: Arc<Config>,
    http_client: reqwest::Client,
    overlay_body: String,
}

#[derive(Clone)]
struct AppState {
    proxy: Arc<RewritingProxy>,
}

impl RewritingProxy {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.upstream.request_timeout)
            .connect_timeout(config.upstream.connect_timeout)
            .pool_max_idle_per_host(config.upstream.pool_max_idle_per_host)
            .user_agent(config.upstream.user_agent.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let overlay_body = runtime::overlay_script(&config.overlay);

        Ok(Self {
            config: Arc::new(config),
            http_client,
            overlay_body,
        })
    }

    /// Start the proxy server.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let app_state = AppState {
            proxy: self.clone(),
        };

        let app = Router::new()
            .route(&self.config.overlay.script_path, get(overlay_handler))
            .fallback(proxy_handler)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(std::time::Duration::from_secs(60)))
                    .into_inner(),
            )
            .with_state(app_state);

        let addr = format!(
            "{}:{}",
            self.config.server.host, self.config.server.port
        );
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ProxyError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

        info!("Rewriting proxy listening on {}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| ProxyError::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Process a single proxied request.
    #[instrument(skip(self, req), fields(request_id, method, target))]
    pub async fn handle_request(&self, req: Request) -> Result<Response> {
        let request_id = Uuid::new_v4().to_string();
        let method = req.method().to_string();

        tracing::Span::current()
            .record("request_id", request_id.as_str())
            .record("method", method.as_str());

        if req.method() == Method::OPTIONS {
            return Ok(headers::preflight_response());
        }

        let (parts, body) = req.into_parts();

        let target = resolve_target(
            &parts.uri,
            &parts.headers,
            &self.config.session.cookie_name,
        )?;
        tracing::Span::current().record("target", target.as_str());
        debug!("Request {} resolved target {}", request_id, target);

        let body_bytes = if parts.method == Method::GET || parts.method == Method::HEAD {
            Bytes::new()
        } else {
            body.collect()
                .await
                .map_err(|e| ProxyError::Internal(format!("Failed to read request body: {}", e)))?
                .to_bytes()
        };

        let mut upstream_req = self
            .http_client
            .request(parts.method.clone(), target.clone())
            .headers(headers::outbound_request_headers(&parts.headers, &target));
        if !body_bytes.is_empty() {
            upstream_req = upstream_req.body(body_bytes);
        }

        let upstream = upstream_req.send().await.map_err(|e| {
            if e.is_timeout() {
                ProxyError::UpstreamTimeout(e.to_string())
            } else {
                ProxyError::Upstream(e.to_string())
            }
        })?;

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();

        let query = parts.uri.query().unwrap_or("");
        let force_html = query_flag(query, "forceHTML");
        let classification = classify::classify(&target, &upstream_headers, &parts.headers, force_html);
        debug!(
            "Request {} upstream {} classified {:?}",
            request_id, status, classification
        );

        let ctx = RewriteContext {
            identity: proxy_identity(&parts.headers, &parts.uri, &self.config),
            inbound_query: query.to_string(),
            base_url: target.clone(),
            overlay_path: self.config.overlay.script_path.clone(),
        };

        let mut response_headers = headers::copy_response_headers(&upstream_headers);
        headers::apply_cors(&mut response_headers);
        if let Some(content_type) = classification.content_type() {
            response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        let body = match classification {
            Classification::Document => {
                let cookie = session::remember_origin(
                    &target.origin().ascii_serialization(),
                    &self.config.session.cookie_name,
                    self.config.session.ttl,
                );
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    response_headers.append(header::SET_COOKIE, value);
                }
                self.transform_document(ctx, upstream)
            }
            Classification::Stylesheet => {
                let text = upstream
                    .text()
                    .await
                    .map_err(|e| ProxyError::Upstream(e.to_string()))?;
                let rewritten = css::rewrite_css_urls(&text, &ctx);
                response_headers.insert(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("public, max-age=31536000"),
                );
                Body::from(rewritten)
            }
            Classification::Opaque => {
                headers::apply_resource_policy(&mut response_headers, &target);
                Body::from_stream(upstream.bytes_stream())
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    /// Stream the upstream body through the markup transformer.
    ///
    /// The transformer is synchronous, so it runs on a blocking thread fed by
    /// a bounded channel; the response body drains the output channel. When
    /// the client goes away the body is dropped, the output channel closes,
    /// and both tasks unwind through closed-channel sends.
    fn transform_document(&self, ctx: RewriteContext, upstream: reqwest::Response) -> Body {
        let (in_tx, in_rx) = mpsc::channel::<Bytes>(TRANSFORM_CHANNEL_DEPTH);
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(TRANSFORM_CHANNEL_DEPTH);

        tokio::spawn(async move {
            let mut stream = upstream.bytes_stream();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        if in_tx.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Upstream body read failed mid-stream: {}", e);
                        break;
                    }
                }
            }
        });

        tokio::task::spawn_blocking(move || {
            if let Err(e) = html::transform_channel(&ctx, in_rx, out_tx) {
                warn!("Document transform aborted: {}", e);
            }
        });

        Body::from_stream(ReceiverStream::new(out_rx).map(Ok::<_, Infallible>))
    }
}

/// Resolve the upstream target for an inbound request: the reserved query
/// parameter if present, otherwise the request path against the remembered
/// origin cookie.
fn resolve_target(uri: &Uri, request_headers: &HeaderMap, cookie_name: &str) -> Result<Url> {
    let query = uri.query().unwrap_or("");
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let remembered = session::remembered_origin(request_headers, cookie_name);

    match urlcodec::decode(query, path_and_query, remembered.as_ref()) {
        Some(target) => Ok(target),
        None => match urlcodec::target_param(query) {
            Some(raw) => Err(ProxyError::InvalidTarget(raw)),
            None => Err(ProxyError::MissingTarget),
        },
    }
}

/// The proxy's own (origin, path) as the client sees it, reconstructed from
/// forwarding headers so rewritten URLs survive deployment behind TLS
/// terminators.
fn proxy_identity(request_headers: &HeaderMap, uri: &Uri, config: &Config) -> ProxyIdentity {
    let scheme = request_headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let fallback_host = format!("{}:{}", config.server.host, config.server.port);
    let host = request_headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&fallback_host);
    ProxyIdentity::new(format!("{}://{}", scheme, host), uri.path().to_string())
}

fn query_flag(query: &str, name: &str) -> bool {
    form_urlencoded::parse(query.as_bytes()).any(|(key, value)| key == name && value == "1")
}

async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    match state.proxy.handle_request(req).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Request failed: {}", e);
            e.into_response()
        }
    }
}

async fn overlay_handler(State(state): State<AppState>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        state.proxy.overlay_body.clone(),
    )
        .into_response()
}
