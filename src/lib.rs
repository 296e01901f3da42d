//! waypoint: a service-discovery driven reverse proxy.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registry;
pub mod reload;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use lifecycle::{RuntimeContext, StartupError};
