//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ListenConfig
//!     → listener.rs (protocol tag, bind before serving)
//!     → tls.rs (certificate source → rustls ServerConfig)
//!     → supervisor.rs (one unit per listener, stop/drain hooks)
//!         → http/server.rs   (http, https)
//!         → tcp.rs + sni.rs  (tcp, tcp+sni)
//! ```
//!
//! # Design Decisions
//! - A bind failure on any listener is fatal; nothing serves partially
//! - Every accepted connection resolves against the table current at that
//!   moment

pub mod connection;
pub mod listener;
pub mod sni;
pub mod supervisor;
pub mod tcp;
pub mod tls;

pub use listener::{ListenerError, Protocol};
pub use supervisor::Supervisor;
pub use tls::TlsError;
