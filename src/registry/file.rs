//! File-based backend.
//!
//! Discovered routes are read from `path`, manual overrides from
//! `manual_path`. Both files are re-read whenever `notify` reports a change
//! in their directory; editors that replace files by rename are covered
//! because the parent directory is watched, not the inode.

use async_trait::async_trait;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::config::FileRegistryConfig;
use crate::registry::{Backend, RegistryError};

pub struct FileBackend {
    path: PathBuf,
    manual_path: Option<PathBuf>,
}

impl FileBackend {
    pub fn new(config: &FileRegistryConfig) -> Self {
        Self {
            path: PathBuf::from(&config.path),
            manual_path: config.manual_path.as_ref().map(PathBuf::from),
        }
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn register(&self) -> Result<(), RegistryError> {
        tokio::fs::metadata(&self.path).await?;
        Ok(())
    }

    async fn deregister(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn read_manual(&self) -> Result<String, RegistryError> {
        match &self.manual_path {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(text) => Ok(text),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
                Err(e) => Err(e.into()),
            },
            None => Ok(String::new()),
        }
    }

    async fn write_manual(&self, text: &str) -> Result<(), RegistryError> {
        let path = self.manual_path.as_ref().ok_or(RegistryError::ReadOnly)?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    fn watch_services(&self) -> watch::Receiver<String> {
        spawn_file_watch(self.path.clone())
    }

    fn watch_manual(&self) -> watch::Receiver<String> {
        match &self.manual_path {
            Some(path) => spawn_file_watch(path.clone()),
            // closed source that never fires
            None => watch::channel(String::new()).1,
        }
    }
}

fn spawn_file_watch(path: PathBuf) -> watch::Receiver<String> {
    let (tx, rx) = watch::channel(String::new());
    tokio::spawn(watch_file(path, tx));
    rx
}

async fn watch_file(path: PathBuf, tx: watch::Sender<String>) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let _watcher = match start_watcher(&path, event_tx) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(path = ?path, error = %e, "cannot watch file, serving initial content only");
            None
        }
    };

    match tokio::fs::read_to_string(&path).await {
        Ok(text) => {
            tx.send_replace(text);
        }
        Err(e) => tracing::warn!(path = ?path, error = %e, "cannot read routes file"),
    }

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                if event.is_none() {
                    break;
                }
                reload(&path, &tx).await;
            }
            _ = tx.closed() => break,
        }
    }
    tracing::debug!(path = ?path, "file watch stopped");
}

async fn reload(path: &Path, tx: &watch::Sender<String>) {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let changed = tx.send_if_modified(|current| {
                if *current == text {
                    return false;
                }
                *current = text;
                true
            });
            if changed {
                tracing::info!(path = ?path, "routes file changed");
            }
        }
        // transient during rename-replace
        Err(e) => tracing::debug!(path = ?path, error = %e, "routes file unreadable"),
    }
}

fn start_watcher(path: &Path, events: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher, notify::Error> {
    let name = path.file_name().map(|n| n.to_os_string());
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let ours = event.paths.iter().any(|p| p.file_name().map(|n| n.to_os_string()) == name);
                if ours && (event.kind.is_modify() || event.kind.is_create()) {
                    let _ = events.send(());
                }
            }
            Err(e) => tracing::error!("watch error: {:?}", e),
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(path = ?path, "watching routes file");
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(dir: &Path, manual: bool) -> FileBackend {
        FileBackend::new(&FileRegistryConfig {
            path: dir.join("routes.txt").to_string_lossy().into_owned(),
            manual_path: manual.then(|| dir.join("manual.txt").to_string_lossy().into_owned()),
        })
    }

    #[tokio::test]
    async fn register_requires_routes_file() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), false);
        assert!(matches!(b.register().await, Err(RegistryError::Io(_))));
        std::fs::write(dir.path().join("routes.txt"), "").unwrap();
        assert!(b.register().await.is_ok());
    }

    #[tokio::test]
    async fn publishes_initial_content_even_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("routes.txt"), "").unwrap();
        let mut rx = backend(dir.path(), false).watch_services();
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow().as_str(), "");
    }

    #[tokio::test]
    async fn manual_round_trip_and_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let rw = backend(dir.path(), true);
        assert_eq!(rw.read_manual().await.unwrap(), "");
        rw.write_manual("route del a").await.unwrap();
        assert_eq!(rw.read_manual().await.unwrap(), "route del a");

        let ro = backend(dir.path(), false);
        assert!(matches!(ro.write_manual("x").await, Err(RegistryError::ReadOnly)));
        assert!(ro.watch_manual().changed().await.is_err());
    }

    #[tokio::test]
    async fn picks_up_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.txt");
        std::fs::write(&path, "route add a /a http://127.0.0.1:1/").unwrap();
        let mut rx = backend(dir.path(), false).watch_services();
        rx.changed().await.unwrap();
        rx.borrow_and_update();

        std::fs::write(&path, "route add b /b http://127.0.0.1:2/").unwrap();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                rx.changed().await.unwrap();
                if rx.borrow_and_update().contains("route add b") {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }
}
