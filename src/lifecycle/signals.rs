//! OS signal handling.
//!
//! # Responsibilities
//! - Listen for SIGINT and SIGTERM for the whole process lifetime
//! - Turn every signal into a shutdown request
//!
//! # Design Decisions
//! - Signals may arrive more than once; only the first flips the flag,
//!   later ones are logged and otherwise ignored

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::lifecycle::RuntimeContext;

/// Spawn the signal listener.
pub fn spawn(ctx: Arc<RuntimeContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let signal = wait_for_signal().await;
            if ctx.request_shutdown() {
                tracing::info!(signal, "shutdown requested");
            } else {
                tracing::info!(signal, "shutdown already in progress");
            }
        }
    })
}

async fn wait_for_signal() -> &'static str {
    tokio::select! {
        _ = ctrl_c() => "SIGINT",
        () = term_signal() => "SIGTERM",
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for SIGINT");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn term_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn term_signal() {
    std::future::pending::<()>().await;
}
