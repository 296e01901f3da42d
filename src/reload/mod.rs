//! Routing table hot reload.
//!
//! # Data Flow
//! ```text
//! watch_services ─┐
//!                 ├→ watcher.rs (merge, dedupe, compile)
//! watch_manual  ──┘      → RuntimeContext::publish
//!                        → diff.rs (log the change)
//!                        → readiness gate
//! ```

pub mod diff;
pub mod watcher;

pub use diff::RoutesFormat;
pub use watcher::{watch_backend, Outcome, Reloader};
