//! Hot-reload loop.
//!
//! Merges the discovered and manual snapshots, compiles them and publishes
//! the result. Manual directives come last so they override discovered ones.

use std::sync::Arc;
use tokio::sync::watch;

use crate::lifecycle::RuntimeContext;
use crate::reload::diff::{self, RoutesFormat};
use crate::routing::Table;

/// Result of one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Same text as the last accepted update.
    Unchanged,
    /// Text did not compile; the previous table stays current.
    Rejected,
    Published,
}

/// Single writer of the current table.
pub struct Reloader {
    ctx: Arc<RuntimeContext>,
    format: RoutesFormat,
    last: String,
}

impl Reloader {
    pub fn new(ctx: Arc<RuntimeContext>, format: RoutesFormat) -> Self {
        Self {
            ctx,
            format,
            last: String::new(),
        }
    }

    pub fn update(&mut self, discovered: &str, manual: &str) -> Outcome {
        let next = format!("{discovered}\n{manual}");
        if next == self.last {
            return Outcome::Unchanged;
        }

        let table = match Table::parse(&next) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(error = %e, "invalid routes, keeping previous table");
                return Outcome::Rejected;
            }
        };

        let rendered = diff::render(self.format, &table, &self.last, &next);
        self.ctx.publish(table);
        if let Some(block) = rendered {
            tracing::info!("routing table updated\n{block}");
        }
        self.last = next;

        if self.ctx.mark_ready() {
            tracing::info!("first routing table published");
        }
        Outcome::Published
    }

    /// Last accepted directive text.
    pub fn current_text(&self) -> &str {
        &self.last
    }
}

/// Run until both sources are closed or shutdown is requested.
pub async fn watch_backend(
    ctx: Arc<RuntimeContext>,
    mut services: watch::Receiver<String>,
    mut manual: watch::Receiver<String>,
    format: RoutesFormat,
) {
    let mut reloader = Reloader::new(ctx.clone(), format);
    let mut discovered = String::new();
    let mut overrides = String::new();
    let (mut services_open, mut manual_open) = (true, true);

    while services_open || manual_open {
        tokio::select! {
            res = services.changed(), if services_open => match res {
                Ok(()) => discovered = services.borrow_and_update().clone(),
                Err(_) => {
                    services_open = false;
                    continue;
                }
            },
            res = manual.changed(), if manual_open => match res {
                Ok(()) => overrides = manual.borrow_and_update().clone(),
                Err(_) => {
                    manual_open = false;
                    continue;
                }
            },
            _ = ctx.wait_shutdown() => break,
        }
        reloader.update(&discovered, &overrides);
    }
    tracing::debug!("reload loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{MatchStrategy, PickStrategy};
    use std::time::Duration;

    const SVC: &str = "route add svc1 /foo http://127.0.0.1:1/";

    fn target(ctx: &RuntimeContext, host: &str, path: &str) -> Option<String> {
        ctx.table()
            .lookup(host, path, "", PickStrategy::RoundRobin, MatchStrategy::Prefix)
            .map(|t| t.addr.clone())
    }

    #[test]
    fn identical_text_is_not_recompiled() {
        let ctx = Arc::new(RuntimeContext::new());
        let mut r = Reloader::new(ctx.clone(), RoutesFormat::Delta);
        assert_eq!(r.update(SVC, ""), Outcome::Published);
        let first = ctx.table();
        assert_eq!(r.update(SVC, ""), Outcome::Unchanged);
        assert!(Arc::ptr_eq(&first, &ctx.table()));
    }

    #[test]
    fn manual_is_appended_after_discovered() {
        let ctx = Arc::new(RuntimeContext::new());
        let mut r = Reloader::new(ctx.clone(), RoutesFormat::Delta);
        r.update(SVC, "route add svc1 /foo http://127.0.0.1:2/ weight 1.0");
        assert_eq!(r.current_text(), format!("{SVC}\nroute add svc1 /foo http://127.0.0.1:2/ weight 1.0"));
        for _ in 0..10 {
            assert_eq!(target(&ctx, "h", "/foo").as_deref(), Some("127.0.0.1:2"));
        }
    }

    #[test]
    fn bad_update_keeps_previous_table() {
        let ctx = Arc::new(RuntimeContext::new());
        let mut r = Reloader::new(ctx.clone(), RoutesFormat::Delta);
        r.update(SVC, "");
        assert_eq!(r.update(SVC, "route add broken"), Outcome::Rejected);
        assert_eq!(target(&ctx, "h", "/foo").as_deref(), Some("127.0.0.1:1"));
        assert_eq!(r.current_text(), format!("{SVC}\n"));
    }

    #[test]
    fn readiness_fires_on_first_publish_only() {
        let ctx = Arc::new(RuntimeContext::new());
        let mut r = Reloader::new(ctx.clone(), RoutesFormat::Detail);
        assert_eq!(r.update("route add broken", ""), Outcome::Rejected);
        assert!(!ctx.is_ready());
        r.update(SVC, "");
        assert!(ctx.is_ready());
        assert!(!ctx.mark_ready());
    }

    #[tokio::test]
    async fn loop_tracks_both_sources() {
        let ctx = Arc::new(RuntimeContext::new());
        let (svc_tx, svc_rx) = watch::channel(String::new());
        let (man_tx, man_rx) = watch::channel(String::new());
        let task = tokio::spawn(watch_backend(ctx.clone(), svc_rx, man_rx, RoutesFormat::Delta));

        svc_tx.send_replace(SVC.to_string());
        tokio::time::timeout(Duration::from_secs(1), ctx.wait_ready()).await.unwrap();
        assert_eq!(target(&ctx, "h", "/foo").as_deref(), Some("127.0.0.1:1"));

        man_tx.send_replace("route del svc1".to_string());
        tokio::time::timeout(Duration::from_secs(1), async {
            while target(&ctx, "h", "/foo").is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        drop(svc_tx);
        drop(man_tx);
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn loop_exits_on_shutdown() {
        let ctx = Arc::new(RuntimeContext::new());
        let (_svc_tx, svc_rx) = watch::channel(String::new());
        let (_man_tx, man_rx) = watch::channel(String::new());
        let task = tokio::spawn(watch_backend(ctx.clone(), svc_rx, man_rx, RoutesFormat::Delta));
        ctx.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
