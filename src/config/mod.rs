//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! Config is immutable once loaded. Routing changes arrive through the
//! registry backend, not through this module.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CertSourceConfig, ConsulConfig, FileRegistryConfig, ListenConfig, LogConfig, MetricsConfig,
    ProfileConfig, ProxyConfig, ProxySettings, RegistryConfig, StaticRegistryConfig, UiConfig,
};
pub use validation::{validate_config, ValidationError};
