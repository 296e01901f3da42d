use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::registry::RegistryError;
use crate::routing::{self, RouteInfo, COMMANDS};

#[derive(Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub title: String,
    pub ready: bool,
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn get_version(State(state): State<AdminState>) -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        title: state.config.ui.title.clone(),
        ready: state.ctx.is_ready(),
    })
}

pub async fn get_config(State(state): State<AdminState>) -> Response {
    let mut config = (*state.config).clone();
    if !config.registry.consul.token.is_empty() {
        config.registry.consul.token = "<redacted>".to_string();
    }
    Json(config).into_response()
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteInfo>> {
    Json(state.ctx.table().routes())
}

pub async fn get_commands() -> &'static str {
    COMMANDS
}

pub async fn get_manual(State(state): State<AdminState>) -> Response {
    match state.backend.read_manual().await {
        Ok(text) => text.into_response(),
        Err(e) => registry_error(e),
    }
}

/// Replace the manual overrides. The text is syntax-checked before it is
/// stored; the reload loop picks it up through the manual watch.
pub async fn put_manual(State(state): State<AdminState>, body: String) -> Response {
    if let Err(e) = routing::parser::parse(&body) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
    match state.backend.write_manual(&body).await {
        Ok(()) => {
            tracing::info!(bytes = body.len(), "manual overrides updated");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => registry_error(e),
    }
}

fn registry_error(e: RegistryError) -> Response {
    let status = match e {
        RegistryError::ReadOnly => StatusCode::CONFLICT,
        _ => StatusCode::BAD_GATEWAY,
    };
    tracing::warn!(error = %e, "manual overrides request failed");
    (status, e.to_string()).into_response()
}
