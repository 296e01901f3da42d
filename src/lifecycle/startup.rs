//! Startup orchestration.
//!
//! # Sequence
//! ```text
//! profiler → metrics → registry (retry loop) → admin listener
//!     → reload loop → wait for the first table → proxy listeners
//!     → wait for shutdown, a unit failure or a reload panic
//!     → shutdown coordinator
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last, once a table exists
//! - Every exit path after registration runs the shutdown coordinator

use std::sync::Arc;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};

use crate::admin::AccessMode;
use crate::config::{ConfigError, ProxyConfig};
use crate::http::AccessLog;
use crate::lifecycle::{RuntimeContext, ShutdownCoordinator};
use crate::net::{ListenerError, Supervisor};
use crate::observability::{init_metrics, MetricsError, ProfileError, Profiler};
use crate::registry::{init_backend, Backend, RegistryError};
use crate::reload::{watch_backend, RoutesFormat};
use crate::routing::{MatchStrategy, PickStrategy};

/// Fatal conditions surfaced while starting or serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid setting: {0}")]
    Setting(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("reload loop panicked")]
    ReloadPanicked(#[source] JoinError),
}

/// Run the proxy until shutdown is requested on `ctx` or a fatal error
/// occurs. Signal handling is installed by the caller.
pub async fn run(ctx: Arc<RuntimeContext>, config: ProxyConfig) -> Result<(), StartupError> {
    let config = Arc::new(config);
    let pick: PickStrategy = config.proxy.strategy.parse().map_err(StartupError::Setting)?;
    let matcher: MatchStrategy = config.proxy.matcher.parse().map_err(StartupError::Setting)?;
    let access: AccessMode = config.ui.access.parse().map_err(StartupError::Setting)?;
    let access_log = AccessLog::from_config(&config.log)
        .map_err(|e| StartupError::Setting(e.to_string()))?
        .map(Arc::new);
    let drain = config.proxy.shutdown_wait();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting");
    let profiler = Profiler::start(&config.profile)?;
    init_metrics(&config.metrics)?;

    let backend = match init_backend(&ctx, &config.registry).await {
        Ok(backend) => backend,
        Err(e) => {
            ShutdownCoordinator::new(ctx, drain).with_profiler(profiler).run().await;
            return Err(e.into());
        }
    };

    let mut supervisor = Supervisor::new(ctx.clone(), config.clone(), pick, matcher).with_access_log(access_log);
    let result = serve(&ctx, &config, &mut supervisor, backend.clone(), access).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "fatal error, shutting down");
    }

    ShutdownCoordinator::new(ctx, drain)
        .with_supervisor(supervisor)
        .with_profiler(profiler)
        .with_backend(backend)
        .run()
        .await;
    result
}

async fn serve(
    ctx: &Arc<RuntimeContext>,
    config: &ProxyConfig,
    supervisor: &mut Supervisor,
    backend: Arc<dyn Backend>,
    access: AccessMode,
) -> Result<(), StartupError> {
    supervisor.start_admin(backend.clone(), access)?;

    let format = RoutesFormat::from_config(&config.log.routes_format);
    let reload = tokio::spawn(watch_backend(
        ctx.clone(),
        backend.watch_services(),
        backend.watch_manual(),
        format,
    ));
    let reload_failed = reload_panic(reload);
    tokio::pin!(reload_failed);

    tracing::info!("waiting for first routing table");
    tokio::select! {
        _ = ctx.wait_ready() => {}
        _ = ctx.wait_shutdown() => return Ok(()),
        e = supervisor.failed() => return Err(e.into()),
        e = &mut reload_failed => return Err(e),
    }

    let addrs = supervisor.start_listeners()?;
    tracing::info!(listeners = addrs.len(), "serving");

    tokio::select! {
        _ = ctx.wait_shutdown() => Ok(()),
        e = supervisor.failed() => Err(e.into()),
        e = &mut reload_failed => Err(e),
    }
}

/// Resolves only if the reload loop panicked. A loop that returns because
/// its sources closed or shutdown began leaves the current table in place.
async fn reload_panic(reload: JoinHandle<()>) -> StartupError {
    match reload.await {
        Err(e) if e.is_panic() => StartupError::ReloadPanicked(e),
        _ => std::future::pending().await,
    }
}
