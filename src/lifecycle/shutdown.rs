//! Graceful shutdown coordination.
//!
//! The coordinator owns no sockets. It sequences:
//! ```text
//! set shutdown flag
//!     → supervisor: stop accepting, drain for `shutdown_wait`, force close
//!     → profiler: stop and flush
//!     → registry: deregister (best effort)
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::lifecycle::RuntimeContext;
use crate::net::Supervisor;
use crate::observability::Profiler;
use crate::registry::Backend;

pub struct ShutdownCoordinator {
    ctx: Arc<RuntimeContext>,
    drain: Duration,
    supervisor: Option<Supervisor>,
    profiler: Option<Profiler>,
    backend: Option<Arc<dyn Backend>>,
}

impl ShutdownCoordinator {
    pub fn new(ctx: Arc<RuntimeContext>, drain: Duration) -> Self {
        Self {
            ctx,
            drain,
            supervisor: None,
            profiler: None,
            backend: None,
        }
    }

    pub fn with_supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn with_profiler(mut self, profiler: Option<Profiler>) -> Self {
        self.profiler = profiler;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Run the shutdown sequence. Safe to call after the flag is already set.
    pub async fn run(self) {
        self.ctx.request_shutdown();

        if let Some(mut supervisor) = self.supervisor {
            supervisor.shutdown(self.drain).await;
        }

        if let Some(profiler) = self.profiler {
            match profiler.stop() {
                Ok(path) => tracing::info!(path = %path.display(), "profile written"),
                Err(e) => tracing::warn!(error = %e, "failed to write profile"),
            }
        }

        if let Some(backend) = self.backend {
            if let Err(e) = backend.deregister().await {
                tracing::warn!(error = %e, "deregistration failed");
            }
        }
        tracing::info!("down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    #[derive(Default)]
    struct CountingBackend {
        deregistered: AtomicUsize,
    }

    #[async_trait]
    impl Backend for CountingBackend {
        async fn register(&self) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn deregister(&self) -> Result<(), RegistryError> {
            self.deregistered.fetch_add(1, Ordering::SeqCst);
            Err(RegistryError::Rejected("agent gone".into()))
        }

        async fn read_manual(&self) -> Result<String, RegistryError> {
            Ok(String::new())
        }

        async fn write_manual(&self, _text: &str) -> Result<(), RegistryError> {
            Err(RegistryError::ReadOnly)
        }

        fn watch_services(&self) -> watch::Receiver<String> {
            watch::channel(String::new()).1
        }

        fn watch_manual(&self) -> watch::Receiver<String> {
            watch::channel(String::new()).1
        }
    }

    #[tokio::test]
    async fn sets_flag_and_deregisters_despite_errors() {
        let ctx = Arc::new(RuntimeContext::new());
        let backend = Arc::new(CountingBackend::default());
        ShutdownCoordinator::new(ctx.clone(), Duration::ZERO)
            .with_backend(backend.clone())
            .run()
            .await;
        assert!(ctx.is_shutting_down());
        assert_eq!(backend.deregistered.load(Ordering::SeqCst), 1);
    }
}
