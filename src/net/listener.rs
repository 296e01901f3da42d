//! Listener descriptors and socket binding.
//!
//! # Responsibilities
//! - Map the `proto` string to a closed set of protocols
//! - Bind every configured address before anything serves
//!
//! # Design Decisions
//! - Binding is synchronous (std sockets) so a failure aborts startup
//!   before any unit has accepted a connection
//! - `:port` means all interfaces

use std::net::{SocketAddr, TcpListener};
use std::str::FromStr;
use thiserror::Error;

use crate::config::ListenConfig;
use crate::net::tls::TlsError;

/// Errors from binding or running a listener unit.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener {addr} failed: {source}")]
    Serve {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener {addr}: {source}")]
    Tls {
        addr: String,
        #[source]
        source: TlsError,
    },

    #[error("unknown protocol {0:?}")]
    InvalidProtocol(String),
}

/// Serving protocol of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    TcpSni,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
            Protocol::TcpSni => "tcp+sni",
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }
}

impl FromStr for Protocol {
    type Err = ListenerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "tcp" => Ok(Protocol::Tcp),
            "tcp+sni" => Ok(Protocol::TcpSni),
            other => Err(ListenerError::InvalidProtocol(other.to_string())),
        }
    }
}

/// A descriptor with its socket already bound.
#[derive(Debug)]
pub struct BoundListener {
    pub config: ListenConfig,
    pub protocol: Protocol,
    pub local_addr: SocketAddr,
    pub socket: TcpListener,
}

/// Bind one descriptor. The socket is non-blocking, ready for tokio.
pub fn bind(config: &ListenConfig) -> Result<BoundListener, ListenerError> {
    let protocol: Protocol = config.proto.parse()?;
    let addr = normalize_addr(&config.addr);
    let bind_err = |source| ListenerError::Bind {
        addr: config.addr.clone(),
        source,
    };

    let socket = TcpListener::bind(addr.as_str()).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    let local_addr = socket.local_addr().map_err(bind_err)?;

    tracing::info!(address = %local_addr, proto = protocol.as_str(), "listener bound");
    Ok(BoundListener {
        config: config.clone(),
        protocol,
        local_addr,
        socket,
    })
}

/// Bind all descriptors, failing on the first error. Sockets bound so far
/// are closed when the error is returned.
pub fn bind_all(configs: &[ListenConfig]) -> Result<Vec<BoundListener>, ListenerError> {
    configs.iter().map(bind).collect()
}

fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}
