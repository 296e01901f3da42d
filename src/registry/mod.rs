//! Service discovery backends.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     registry.backend → BackendKind (unknown kind is fatal, no retry)
//!     → retry.rs (construct + register until deadline or shutdown)
//!     → Arc<dyn Backend>
//!
//! Running:
//!     backend.watch_services() ─┐
//!                               ├→ reload loop (most recent value wins)
//!     backend.watch_manual()  ──┘
//! ```
//!
//! # Design Decisions
//! - Notification sources are `watch` channels: level triggered, no queue
//! - A watcher task lives as long as its receiver; dropping it stops polling
//! - Deregistration is best effort

pub mod consul;
pub mod file;
pub mod retry;
pub mod static_routes;

use async_trait::async_trait;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::RegistryConfig;
use crate::lifecycle::RuntimeContext;

pub use consul::ConsulBackend;
pub use file::FileBackend;
pub use retry::register_with_retry;
pub use static_routes::StaticBackend;

/// Errors from a registry backend.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown registry backend {0:?}")]
    UnknownBackend(String),

    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("file watch failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("registry rejected request: {0}")]
    Rejected(String),

    #[error("manual overrides are read-only for this backend")]
    ReadOnly,

    #[error("registry did not answer before the deadline")]
    Unresponsive,

    #[error("registration timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("registration aborted by shutdown")]
    Aborted,
}

/// A discovery backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Register this instance. Called until it succeeds or the deadline passes.
    async fn register(&self) -> Result<(), RegistryError>;

    async fn deregister(&self) -> Result<(), RegistryError>;

    async fn read_manual(&self) -> Result<String, RegistryError>;

    async fn write_manual(&self, text: &str) -> Result<(), RegistryError>;

    /// Discovered route directives. Each new snapshot replaces the last.
    fn watch_services(&self) -> watch::Receiver<String>;

    /// Manual override directives.
    fn watch_manual(&self) -> watch::Receiver<String>;
}

/// Enumerated backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    Static,
    Consul,
}

impl FromStr for BackendKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(BackendKind::File),
            "static" => Ok(BackendKind::Static),
            "consul" => Ok(BackendKind::Consul),
            other => Err(RegistryError::UnknownBackend(other.to_string())),
        }
    }
}

/// Construct a backend handle. Does not contact anything.
pub fn create_backend(kind: BackendKind, config: &RegistryConfig) -> Result<Arc<dyn Backend>, RegistryError> {
    Ok(match kind {
        BackendKind::File => Arc::new(FileBackend::new(&config.file)),
        BackendKind::Static => Arc::new(StaticBackend::new(&config.static_routes.routes)),
        BackendKind::Consul => Arc::new(ConsulBackend::new(&config.consul)?),
    })
}

/// Select, construct and register the configured backend.
pub async fn init_backend(
    ctx: &RuntimeContext,
    config: &RegistryConfig,
) -> Result<Arc<dyn Backend>, RegistryError> {
    let kind: BackendKind = config.backend.parse()?;
    tracing::info!(backend = %config.backend, "connecting to registry");
    register_with_retry(ctx, config.timeout(), config.retry(), || async move {
        create_backend(kind, config)
    })
    .await
}

/// Poll `fetch` until every receiver of `tx` is gone.
///
/// `fetch` gets the last index and returns the next index and snapshot,
/// which lets blocking queries resume where they left off. Errors are
/// logged and retried after `pause`.
pub(crate) async fn poll_into<F, Fut>(tx: watch::Sender<String>, what: &'static str, pause: Duration, mut fetch: F)
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<(u64, String), RegistryError>>,
{
    let mut index = 0;
    let mut first = true;
    loop {
        let result = tokio::select! {
            result = fetch(index) => result,
            _ = tx.closed() => break,
        };
        match result {
            Ok((next, snapshot)) => {
                index = if next < index { 0 } else { next };
                if first {
                    tx.send_replace(snapshot);
                    first = false;
                } else {
                    tx.send_if_modified(|current| {
                        if *current == snapshot {
                            return false;
                        }
                        *current = snapshot;
                        true
                    });
                }
            }
            Err(e) => {
                tracing::warn!(source = what, error = %e, "registry watch failed");
                index = 0;
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = tx.closed() => break,
                }
            }
        }
    }
    tracing::debug!(source = what, "registry watch stopped");
}
