//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (notfound counter, request latency histogram)
//!
//! Consumers:
//!     → stdout (text or JSON)
//!     → Prometheus scrape endpoint
//!     → profiling.rs (CPU flame graph written on shutdown)
//! ```

pub mod logging;
pub mod metrics;
pub mod profiling;

pub use logging::init_logging;
pub use metrics::{init_metrics, MetricsError};
pub use profiling::{ProfileError, Profiler};
