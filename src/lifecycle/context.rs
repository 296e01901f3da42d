//! Process-wide runtime state.
//!
//! One [`RuntimeContext`] is built at startup and shared by `Arc` with
//! every component. It carries the three shared primitives:
//! the current routing table, the shutdown flag and the readiness gate.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::routing::Table;

#[derive(Debug)]
pub struct RuntimeContext {
    table: ArcSwap<Table>,
    shutting_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    ready_tx: watch::Sender<bool>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(Table::default()),
            shutting_down: AtomicBool::new(false),
            shutdown_tx: watch::channel(false).0,
            ready_tx: watch::channel(false).0,
        }
    }

    /// Current routing table. Readers keep the returned snapshot alive
    /// for as long as they need it; a concurrent publish never affects it.
    pub fn table(&self) -> Arc<Table> {
        self.table.load_full()
    }

    /// Replace the current table. Only the reload loop calls this.
    pub fn publish(&self, table: Table) -> Arc<Table> {
        self.table.swap(Arc::new(table))
    }

    /// Set the shutdown flag. Returns `true` only for the call that flipped it.
    pub fn request_shutdown(&self) -> bool {
        let first = !self.shutting_down.swap(true, Ordering::AcqRel);
        if first {
            self.shutdown_tx.send_replace(true);
        }
        first
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Resolves once shutdown has been requested, immediately if it already was.
    pub async fn wait_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        let _ = rx.wait_for(|down| *down).await;
    }

    /// Fire the readiness gate. Returns `true` only for the first call.
    pub fn mark_ready(&self) -> bool {
        self.ready_tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Resolves once the first table is published, immediately for late callers.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn shutdown_flag_is_monotonic() {
        let ctx = RuntimeContext::new();
        assert!(!ctx.is_shutting_down());
        assert!(ctx.request_shutdown());
        assert!(!ctx.request_shutdown());
        assert!(ctx.is_shutting_down());
    }

    #[test]
    fn readiness_fires_once() {
        let ctx = RuntimeContext::new();
        assert!(ctx.mark_ready());
        assert!(!ctx.mark_ready());
        assert!(!ctx.mark_ready());
        assert!(ctx.is_ready());
    }

    #[tokio::test]
    async fn late_observers_do_not_block() {
        let ctx = RuntimeContext::new();
        ctx.mark_ready();
        ctx.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), async {
            ctx.wait_ready().await;
            ctx.wait_shutdown().await;
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn waiters_wake_on_transition() {
        let ctx = Arc::new(RuntimeContext::new());
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.wait_shutdown().await })
        };
        tokio::task::yield_now().await;
        ctx.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[test]
    fn publish_swaps_whole_table() {
        let ctx = RuntimeContext::new();
        let before = ctx.table();
        assert!(before.is_empty());
        ctx.publish(Table::parse("route add a /a http://127.0.0.1:1/").unwrap());
        assert!(before.is_empty());
        assert!(!ctx.table().is_empty());
    }

    #[test]
    fn readers_never_see_a_half_published_table() {
        use crate::routing::{MatchStrategy, PickStrategy};
        use std::sync::atomic::AtomicBool;
        use std::thread;

        let table = |addr: &str| {
            Table::parse(&format!("route add a /a http://{addr}/\nroute add b /b http://{addr}/")).unwrap()
        };
        let ctx = Arc::new(RuntimeContext::new());
        ctx.publish(table("127.0.0.1:1001"));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let ctx = ctx.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut reads = 0u64;
                    loop {
                        let table = ctx.table();
                        let lookup = |path: &str| {
                            table
                                .lookup("example.com", path, "", PickStrategy::RoundRobin, MatchStrategy::Prefix)
                                .map(|t| t.addr.clone())
                        };
                        let (a, b) = (lookup("/a"), lookup("/b"));
                        assert!(a.is_some(), "route vanished during publish");
                        assert_eq!(a, b, "lookups in one snapshot disagree");
                        reads += 1;
                        if done.load(Ordering::Acquire) {
                            return reads;
                        }
                    }
                })
            })
            .collect();

        for i in 0..2000 {
            ctx.publish(table(if i % 2 == 0 { "127.0.0.1:1002" } else { "127.0.0.1:1001" }));
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
    }
}
