//! Hot reload driven by the file backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use waypoint::config::FileRegistryConfig;
use waypoint::lifecycle::RuntimeContext;
use waypoint::registry::{Backend, FileBackend};
use waypoint::reload::{watch_backend, RoutesFormat};
use waypoint::routing::{MatchStrategy, PickStrategy};

mod common;

fn target(ctx: &RuntimeContext, path: &str) -> Option<String> {
    ctx.table()
        .lookup("example.com", path, "", PickStrategy::RoundRobin, MatchStrategy::Prefix)
        .map(|t| t.addr.clone())
}

fn write(path: &Path, text: &str) {
    std::fs::write(path, text).unwrap();
}

#[tokio::test]
async fn file_changes_replace_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let routes = dir.path().join("routes");
    let manual = dir.path().join("manual");
    write(&routes, "route add web /web http://10.0.0.1:80/");

    let backend = FileBackend::new(&FileRegistryConfig {
        path: routes.to_string_lossy().into_owned(),
        manual_path: Some(manual.to_string_lossy().into_owned()),
    });
    backend.register().await.unwrap();

    let ctx = Arc::new(RuntimeContext::new());
    let task = tokio::spawn(watch_backend(
        ctx.clone(),
        backend.watch_services(),
        backend.watch_manual(),
        RoutesFormat::Delta,
    ));
    tokio::time::timeout(Duration::from_secs(5), ctx.wait_ready()).await.unwrap();
    assert_eq!(target(&ctx, "/web").as_deref(), Some("10.0.0.1:80"));

    // discovered routes change
    write(&routes, "route add web /web http://10.0.0.2:80/");
    common::eventually(|| target(&ctx, "/web").as_deref() == Some("10.0.0.2:80")).await;

    // a manual override is appended after the discovered routes
    backend
        .write_manual("route add web /web http://10.0.0.9:80/ weight 1.0")
        .await
        .unwrap();
    common::eventually(|| target(&ctx, "/web").as_deref() == Some("10.0.0.9:80")).await;

    // a broken edit keeps the last good table
    write(&routes, "route add web");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(target(&ctx, "/web").as_deref(), Some("10.0.0.9:80"));

    ctx.request_shutdown();
    tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn missing_routes_file_fails_registration() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileBackend::new(&FileRegistryConfig {
        path: dir.path().join("absent").to_string_lossy().into_owned(),
        manual_path: None,
    });
    assert!(backend.register().await.is_err());
    assert!(backend.write_manual("route del web").await.is_err());
}
