use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::str::FromStr;

/// Access mode of the admin listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ro" => Ok(AccessMode::ReadOnly),
            "rw" => Ok(AccessMode::ReadWrite),
            other => Err(format!("invalid access mode {other:?}")),
        }
    }
}

/// Rejects anything but reads when the listener is read-only.
pub async fn access_guard(
    State(access): State<AccessMode>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let read = matches!(*request.method(), Method::GET | Method::HEAD | Method::OPTIONS);
    if access == AccessMode::ReadOnly && !read {
        tracing::debug!(method = %request.method(), path = %request.uri().path(), "admin write refused");
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(next.run(request).await)
}
