//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) into a configured header
//! - Extract routing-relevant information (host)
//! - Prepare the request for forwarding: hop-by-hop headers, forwarded
//!   headers, path rewrite
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - An ID already present on the request is kept

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, Uri};
use std::net::SocketAddr;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use uuid::Uuid;

use crate::config::ProxySettings;

/// Layer that sets a request ID header when it is missing.
#[derive(Debug, Clone)]
pub struct RequestIdLayer {
    header: HeaderName,
}

impl RequestIdLayer {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService {
            inner,
            header: self.header.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestIdService<S> {
    inner: S,
    header: HeaderName,
}

impl<S, B> Service<Request<B>> for RequestIdService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        if !req.headers().contains_key(&self.header) {
            if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
                req.headers_mut().insert(self.header.clone(), value);
            }
        }
        self.inner.call(req)
    }
}

/// Host the request was addressed to: the Host header, else the URI authority.
pub fn request_host<B>(req: &Request<B>) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
];

/// Remove headers that only apply to a single connection.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    for name in HOP_BY_HOP.iter().copied().chain(listed.iter().map(String::as_str)) {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

/// Connection facts needed for forwarded headers.
#[derive(Debug, Clone, Copy)]
pub struct ForwardInfo {
    pub peer: SocketAddr,
    pub local_port: u16,
    pub tls: bool,
}

/// Add `X-Forwarded-*`, `Forwarded` and the optional configured headers.
pub fn add_forward_headers(headers: &mut HeaderMap, info: &ForwardInfo, settings: &ProxySettings) {
    let ip = info.peer.ip().to_string();
    let proto = if info.tls { "https" } else { "http" };

    let xff = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(prev) => format!("{prev}, {ip}"),
        None => ip.clone(),
    };
    set(headers, "x-forwarded-for", &xff);
    if !headers.contains_key("x-forwarded-proto") {
        set(headers, "x-forwarded-proto", proto);
    }
    if !headers.contains_key("x-forwarded-port") {
        set(headers, "x-forwarded-port", &info.local_port.to_string());
    }
    if !headers.contains_key("x-real-ip") {
        set(headers, "x-real-ip", &ip);
    }

    let mut forwarded = format!("for={ip}; proto={proto}");
    if !settings.local_ip.is_empty() {
        forwarded.push_str(&format!("; by={}", settings.local_ip));
    }
    set(headers, "forwarded", &forwarded);

    if !settings.client_ip_header.is_empty() {
        set(headers, &settings.client_ip_header, &ip);
    }
    if info.tls && !settings.tls_header.is_empty() {
        set(headers, &settings.tls_header, &settings.tls_header_value);
    }
}

fn set(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::debug!(header = name, "skipping invalid header"),
    }
}

/// Path and query sent upstream, with the `strip` prefix removed.
pub fn upstream_path(uri: &Uri, strip: Option<&str>) -> String {
    let mut path = uri.path();
    if let Some(prefix) = strip {
        if let Some(rest) = path.strip_prefix(prefix) {
            path = rest;
        }
    }
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    match uri.query() {
        Some(q) => format!("{path}?{q}"),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn host_from_header_or_authority() {
        let req = Request::builder()
            .uri("/x")
            .header("Host", "example.com:9999")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_host(&req), "example.com:9999");

        let req = Request::builder()
            .uri("http://other.com/x")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_host(&req), "other.com");
    }

    #[test]
    fn strips_connection_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-secret"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert("accept", HeaderValue::from_static("*/*"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("accept"));
    }

    #[test]
    fn forward_headers() {
        let settings = ProxySettings {
            local_ip: "10.0.0.9".into(),
            client_ip_header: "X-Client-IP".into(),
            tls_header: "X-TLS".into(),
            tls_header_value: "on".into(),
            ..ProxySettings::default()
        };
        let info = ForwardInfo {
            peer: "192.168.1.5:4000".parse().unwrap(),
            local_port: 9999,
            tls: true,
        };
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.1.1.1"));
        add_forward_headers(&mut headers, &info, &settings);

        assert_eq!(headers["x-forwarded-for"], "1.1.1.1, 192.168.1.5");
        assert_eq!(headers["x-forwarded-proto"], "https");
        assert_eq!(headers["x-forwarded-port"], "9999");
        assert_eq!(headers["forwarded"], "for=192.168.1.5; proto=https; by=10.0.0.9");
        assert_eq!(headers["x-client-ip"], "192.168.1.5");
        assert_eq!(headers["x-tls"], "on");
    }

    #[test]
    fn strip_prefix_keeps_query() {
        let uri: Uri = "/api/users?id=1".parse().unwrap();
        assert_eq!(upstream_path(&uri, Some("/api")), "/users?id=1");
        assert_eq!(upstream_path(&uri, Some("/other")), "/api/users?id=1");
        assert_eq!(upstream_path(&"/api".parse().unwrap(), Some("/api")), "/");
        assert_eq!(upstream_path(&uri, None), "/api/users?id=1");
    }

    #[tokio::test]
    async fn request_id_layer_sets_missing_header() {
        use std::convert::Infallible;
        use tower::ServiceExt;

        let inner = tower::service_fn(|req: Request<Body>| async move {
            Ok::<_, Infallible>(req.headers().get("x-request-id").cloned())
        });
        let svc = RequestIdLayer::new(HeaderName::from_static("x-request-id")).layer(inner);

        let id = svc
            .clone()
            .oneshot(Request::new(Body::empty()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id.to_str().unwrap().len(), 36);

        let kept = svc
            .oneshot(
                Request::builder()
                    .header("x-request-id", "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(kept.unwrap(), "abc");
    }
}
