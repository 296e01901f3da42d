//! Backend serving a fixed set of routes from the configuration.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::registry::{Backend, RegistryError};

/// Routes come from config; manual overrides live in memory only.
pub struct StaticBackend {
    routes: String,
    manual: watch::Sender<String>,
}

impl StaticBackend {
    pub fn new(routes: &str) -> Self {
        Self {
            routes: routes.to_string(),
            manual: watch::channel(String::new()).0,
        }
    }
}

#[async_trait]
impl Backend for StaticBackend {
    async fn register(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn deregister(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn read_manual(&self) -> Result<String, RegistryError> {
        Ok(self.manual.borrow().clone())
    }

    async fn write_manual(&self, text: &str) -> Result<(), RegistryError> {
        self.manual.send_replace(text.to_string());
        Ok(())
    }

    fn watch_services(&self) -> watch::Receiver<String> {
        let (tx, rx) = watch::channel(String::new());
        // sender dropped: one notification, then the source is closed
        tx.send_replace(self.routes.clone());
        rx
    }

    fn watch_manual(&self) -> watch::Receiver<String> {
        self.manual.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn services_fire_once_then_close() {
        let backend = StaticBackend::new("route add a /a http://127.0.0.1:1/");
        let mut rx = backend.watch_services();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_str(), "route add a /a http://127.0.0.1:1/");
        assert!(rx.changed().await.is_err());
    }

    #[tokio::test]
    async fn manual_writes_notify_watchers() {
        let backend = StaticBackend::new("");
        let mut rx = backend.watch_manual();
        backend.write_manual("route del a").await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_str(), "route del a");
        assert_eq!(backend.read_manual().await.unwrap(), "route del a");
    }
}
