//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → registry → admin → first table → listeners
//!
//! Runtime (context.rs):
//!     current table, shutdown flag, readiness gate
//!
//! Shutdown (shutdown.rs):
//!     Signal (signals.rs) → stop accepting → drain → stop profiler
//!     → deregister → exit
//! ```
//!
//! # Design Decisions
//! - The three shared primitives live in one `RuntimeContext`
//! - Shutdown has a deadline: connections are forced closed after the drain

pub mod context;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use context::RuntimeContext;
pub use shutdown::ShutdownCoordinator;
pub use startup::{run, StartupError};
