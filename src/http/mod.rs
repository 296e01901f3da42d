//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (axum-server)
//!     → request.rs (request id, forwarded headers, path strip)
//!     → server.rs (table lookup, upstream request, response)
//!     → upstream.rs (plain or TLS connection to the target)
//!     → access_log.rs (one line per request)
//! ```

pub mod access_log;
pub mod request;
pub mod server;
pub mod upstream;

pub use access_log::{AccessFormat, AccessLog, AccessLogError};
pub use request::RequestIdLayer;
pub use server::{proxy_router, ProxyState};
