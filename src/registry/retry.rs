//! Registration retry loop.
//!
//! Attempting → Succeeded | Exhausted (deadline) | Aborted (shutdown).
//! The deadline and the shutdown flag are checked after each sleep, so a
//! shutdown during startup is honoured within one retry interval. A single
//! attempt never outlives the deadline and is dropped as soon as shutdown
//! is requested.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::lifecycle::RuntimeContext;
use crate::registry::{Backend, RegistryError};

/// Construct and register a backend until it works, the deadline passes or
/// shutdown is requested.
pub async fn register_with_retry<F, Fut>(
    ctx: &RuntimeContext,
    timeout: Duration,
    retry: Duration,
    mut connect: F,
) -> Result<Arc<dyn Backend>, RegistryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Arc<dyn Backend>, RegistryError>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let attempt = async {
            let backend = connect().await?;
            backend.register().await?;
            Ok::<_, RegistryError>(backend)
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        let result = tokio::select! {
            result = tokio::time::timeout(remaining, attempt) => result,
            _ = ctx.wait_shutdown() => {
                tracing::info!(attempts, "registration interrupted by shutdown");
                return Err(RegistryError::Aborted);
            }
        };
        let err = match result {
            Ok(Ok(backend)) => {
                tracing::info!(attempts, "registered with registry");
                return Ok(backend);
            }
            Ok(Err(e)) => e,
            Err(_) => RegistryError::Unresponsive,
        };

        tracing::warn!(attempt = attempts, error = %err, "registry not ready, retrying");
        sleep(retry).await;

        if Instant::now() > deadline {
            tracing::error!(attempts, timeout = ?timeout, "giving up on registry");
            return Err(RegistryError::Timeout { attempts });
        }
        if ctx.is_shutting_down() {
            return Err(RegistryError::Aborted);
        }
    }
}
