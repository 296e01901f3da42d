//! Administrative interface.
//!
//! # Routes
//! ```text
//! GET  /health        liveness, used by the registry health check
//! GET  /api/version
//! GET  /api/config    effective configuration, secrets redacted
//! GET  /api/routes    current table
//! GET  /api/commands  directive help text
//! GET  /api/manual    manual overrides
//! PUT  /api/manual    replace manual overrides (rw only)
//! ```

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::lifecycle::RuntimeContext;
use crate::registry::Backend;
use self::auth::access_guard;
use self::handlers::*;

pub use auth::AccessMode;

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub ctx: Arc<RuntimeContext>,
    pub config: Arc<ProxyConfig>,
    pub backend: Arc<dyn Backend>,
}

pub fn admin_router(state: AdminState, access: AccessMode) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/version", get(get_version))
        .route("/api/config", get(get_config))
        .route("/api/routes", get(get_routes))
        .route("/api/commands", get(get_commands))
        .route("/api/manual", get(get_manual).put(put_manual))
        .layer(middleware::from_fn_with_state(access, access_guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
