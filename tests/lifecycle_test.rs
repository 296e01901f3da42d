//! Whole-process behaviour: startup order, registration deadline, shutdown.

use std::sync::Arc;
use std::time::Duration;

use waypoint::lifecycle::{self, RuntimeContext, StartupError};
use waypoint::registry::RegistryError;

mod common;
use common::listen;

#[tokio::test]
async fn serves_until_shutdown_is_requested() {
    let backend = common::start_mock_backend("up").await;
    let port = common::free_port();
    let config = common::config(
        vec![listen(&format!("127.0.0.1:{port}"), "http")],
        &format!("route add svc / http://{backend}/"),
    );
    let ctx = Arc::new(RuntimeContext::new());
    let proxy = tokio::spawn(lifecycle::run(ctx.clone(), config));

    let client = common::http_client();
    let url = format!("http://127.0.0.1:{port}/");
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(res) = client.get(&url).send().await {
                assert_eq!(res.text().await.unwrap(), "up");
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert!(ctx.is_ready());

    assert!(ctx.request_shutdown());
    assert!(!ctx.request_shutdown());
    let result = tokio::time::timeout(Duration::from_secs(5), proxy).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(client.get(&url).send().await.is_err());
}

#[tokio::test]
async fn in_flight_requests_finish_within_drain() {
    let backend = common::start_slow_backend(Duration::from_millis(300)).await;
    let port = common::free_port();
    let mut config = common::config(
        vec![listen(&format!("127.0.0.1:{port}"), "http")],
        &format!("route add svc / http://{backend}/"),
    );
    config.proxy.shutdown_wait_ms = 3000;
    let ctx = Arc::new(RuntimeContext::new());
    let proxy = tokio::spawn(lifecycle::run(ctx.clone(), config));
    tokio::time::timeout(Duration::from_secs(5), ctx.wait_ready()).await.unwrap();

    let url = format!("http://127.0.0.1:{port}/");
    let client = common::http_client();
    let request = tokio::spawn(async move {
        // retried until the listener unit is up
        loop {
            match client.get(&url).send().await {
                Ok(res) => return res.text().await.unwrap(),
                Err(e) if e.is_connect() => tokio::time::sleep(Duration::from_millis(10)).await,
                Err(e) => panic!("{e}"),
            }
        }
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    ctx.request_shutdown();

    assert_eq!(request.await.unwrap(), "slow");
    let result = tokio::time::timeout(Duration::from_secs(5), proxy).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn registration_deadline_is_fatal() {
    let mut config = common::config(vec![listen("127.0.0.1:0", "http")], "");
    config.registry.backend = "consul".into();
    config.registry.consul.addr = format!("127.0.0.1:{}", common::free_port());
    config.registry.timeout_ms = 600;
    config.registry.retry_ms = 200;

    let ctx = Arc::new(RuntimeContext::new());
    let err = tokio::time::timeout(Duration::from_secs(10), lifecycle::run(ctx.clone(), config))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, StartupError::Registry(RegistryError::Timeout { .. })));
    assert!(!ctx.is_ready());
}

#[tokio::test]
async fn shutdown_during_registration_aborts_promptly() {
    let mut config = common::config(vec![listen("127.0.0.1:0", "http")], "");
    config.registry.backend = "consul".into();
    config.registry.consul.addr = format!("127.0.0.1:{}", common::free_port());
    config.registry.timeout_ms = 60_000;
    config.registry.retry_ms = 100;

    let ctx = Arc::new(RuntimeContext::new());
    let proxy = tokio::spawn(lifecycle::run(ctx.clone(), config));
    tokio::time::sleep(Duration::from_millis(250)).await;
    ctx.request_shutdown();

    let err = tokio::time::timeout(Duration::from_secs(2), proxy)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, StartupError::Registry(RegistryError::Aborted)));
}

#[tokio::test]
async fn silent_registry_cannot_hang_startup() {
    let registry = common::start_silent_server().await;
    let mut config = common::config(vec![listen("127.0.0.1:0", "http")], "");
    config.registry.backend = "consul".into();
    config.registry.consul.addr = registry.to_string();
    config.registry.timeout_ms = 500;
    config.registry.retry_ms = 100;

    let ctx = Arc::new(RuntimeContext::new());
    let err = tokio::time::timeout(Duration::from_secs(3), lifecycle::run(ctx.clone(), config))
        .await
        .expect("startup hung on a silent registry")
        .unwrap_err();
    assert!(matches!(err, StartupError::Registry(RegistryError::Timeout { .. })));
}

#[tokio::test]
async fn shutdown_interrupts_a_silent_registry() {
    let registry = common::start_silent_server().await;
    let mut config = common::config(vec![listen("127.0.0.1:0", "http")], "");
    config.registry.backend = "consul".into();
    config.registry.consul.addr = registry.to_string();
    config.registry.consul.request_timeout_ms = 60_000;
    config.registry.timeout_ms = 60_000;
    config.registry.retry_ms = 100;

    let ctx = Arc::new(RuntimeContext::new());
    let proxy = tokio::spawn(lifecycle::run(ctx.clone(), config));
    tokio::time::sleep(Duration::from_millis(200)).await;
    ctx.request_shutdown();

    let err = tokio::time::timeout(Duration::from_secs(2), proxy)
        .await
        .expect("shutdown did not interrupt registration")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, StartupError::Registry(RegistryError::Aborted)));
}

#[tokio::test]
async fn listener_bind_failure_stops_the_process() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let free = common::free_port();
    let mut sni = listen(&taken.local_addr().unwrap().to_string(), "tcp+sni");
    sni.cert_source = Some("example".into());
    let config = common::config(
        vec![listen(&format!("127.0.0.1:{free}"), "http"), sni],
        "route add svc / http://127.0.0.1:1/",
    );

    let ctx = Arc::new(RuntimeContext::new());
    let err = tokio::time::timeout(Duration::from_secs(5), lifecycle::run(ctx.clone(), config))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, StartupError::Listener(_)));
    assert!(ctx.is_shutting_down());
    assert!(tokio::net::TcpStream::connect(("127.0.0.1", free)).await.is_err());
}
