//! HTTP/HTTPS reverse-proxy handler.
//!
//! # Responsibilities
//! - Build the Axum router for a proxy listener
//! - Resolve every request against the table that is current right now
//! - Forward to the picked target through a pooled client
//! - Map upstream failures to 502 and header timeouts to 504
//! - Write one access log line per request when enabled

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderName, HeaderValue, Request, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{ListenConfig, ProxySettings};
use crate::http::access_log::{AccessLog, Entry};
use crate::http::request::{
    add_forward_headers, request_host, strip_hop_by_hop, upstream_path, ForwardInfo, RequestIdLayer,
};
use crate::http::upstream::UpstreamClients;
use crate::lifecycle::RuntimeContext;
use crate::observability::metrics;
use crate::routing::{MatchStrategy, PickStrategy, Target};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct ProxyState {
    ctx: Arc<RuntimeContext>,
    clients: UpstreamClients,
    settings: Arc<ProxySettings>,
    access_log: Option<Arc<AccessLog>>,
    pick: PickStrategy,
    matcher: MatchStrategy,
    tls: bool,
    local_port: u16,
}

impl ProxyState {
    /// Shared state for all proxy listeners; one connection pool per
    /// verification mode.
    pub fn new(ctx: Arc<RuntimeContext>, settings: &ProxySettings, pick: PickStrategy, matcher: MatchStrategy) -> Self {
        Self {
            ctx,
            clients: UpstreamClients::new(settings),
            settings: Arc::new(settings.clone()),
            access_log: None,
            pick,
            matcher,
            tls: false,
            local_port: 0,
        }
    }

    pub fn with_access_log(mut self, access_log: Option<Arc<AccessLog>>) -> Self {
        self.access_log = access_log;
        self
    }

    /// Copy of the state bound to one listener.
    pub fn for_listener(&self, tls: bool, local_port: u16) -> Self {
        Self {
            tls,
            local_port,
            ..self.clone()
        }
    }
}

/// Build the router for one proxy listener.
#[allow(deprecated)]
pub fn proxy_router(state: ProxyState, listen: &ListenConfig) -> Router {
    let request_id = Some(state.settings.request_id_header.as_str())
        .filter(|h| !h.is_empty())
        .and_then(|h| HeaderName::from_bytes(h.as_bytes()).ok());

    let mut router = Router::new()
        .route("/", any(proxy_handler))
        .route("/{*path}", any(proxy_handler))
        .with_state(state);

    if let Some(limit) = listen.write_timeout() {
        router = router.layer(TimeoutLayer::new(limit));
    }
    if let Some(header) = request_id {
        router = router.layer(RequestIdLayer::new(header));
    }
    router.layer(TraceLayer::new_for_http())
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let Some(access_log) = state.access_log.clone() else {
        return forward(&state, peer, request, start).await.0;
    };

    let time = OffsetDateTime::now_utc();
    let host = request_host(&request);
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();
    let headers = request.headers().clone();

    let (response, target) = forward(&state, peer, request, start).await;
    let body_size = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    access_log.record(&Entry {
        peer,
        time,
        method: &method,
        uri: &uri,
        version,
        host: &host,
        tls: state.tls,
        headers: &headers,
        status: response.status().as_u16(),
        body_size,
        elapsed: start.elapsed(),
        upstream: target.as_deref(),
    });
    response
}

async fn forward(
    state: &ProxyState,
    peer: SocketAddr,
    request: Request<Body>,
    start: Instant,
) -> (Response, Option<Arc<Target>>) {
    let host = request_host(&request);
    let trace = request
        .headers()
        .get("trace")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let target = state
        .ctx
        .table()
        .lookup(&host, request.uri().path(), &trace, state.pick, state.matcher);
    let Some(target) = target else {
        metrics::record_not_found();
        tracing::debug!(host = %host, path = %request.uri().path(), "no route");
        let status = StatusCode::from_u16(state.settings.noroute_status).unwrap_or(StatusCode::NOT_FOUND);
        return (status.into_response(), None);
    };

    let (mut parts, body) = request.into_parts();
    let path = upstream_path(&parts.uri, target.strip_path.as_deref());
    parts.uri = match Uri::try_from(format!("{}://{}{}", target.url.scheme(), target.addr, path)) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(target = %target.url, error = %e, "cannot build upstream uri");
            return (StatusCode::BAD_GATEWAY.into_response(), Some(target));
        }
    };
    parts.version = Version::HTTP_11;

    strip_hop_by_hop(&mut parts.headers);
    if !parts.headers.contains_key(header::HOST) {
        if let Ok(value) = HeaderValue::from_str(&host) {
            parts.headers.insert(header::HOST, value);
        }
    }
    let info = ForwardInfo {
        peer,
        local_port: state.local_port,
        tls: state.tls,
    };
    add_forward_headers(&mut parts.headers, &info, &state.settings);

    let client = state.clients.pick(target.tls_skip_verify);
    let upstream = client.request(Request::from_parts(parts, body));
    let result = match state.settings.response_header_timeout() {
        Some(limit) => match tokio::time::timeout(limit, upstream).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(target = %target.url, timeout = ?limit, "upstream response header timeout");
                metrics::record_request(&target.service, 504, start);
                return (StatusCode::GATEWAY_TIMEOUT.into_response(), Some(target));
            }
        },
        None => upstream.await,
    };

    let response = match result {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            metrics::record_request(&target.service, parts.status.as_u16(), start);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::warn!(target = %target.url, error = %e, "upstream request failed");
            metrics::record_request(&target.service, 502, start);
            StatusCode::BAD_GATEWAY.into_response()
        }
    };
    (response, Some(target))
}
