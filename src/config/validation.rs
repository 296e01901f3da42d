//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (listeners reference existing cert sources)
//! - Check enumerated values (protocols, strategies, access modes)
//!
//! Returns every problem found, not just the first one. The registry
//! backend kind is left to the registration loop, which rejects unknown
//! kinds before its first attempt.

use thiserror::Error;

use crate::config::schema::{ListenConfig, ProxyConfig};
use crate::http::AccessFormat;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener {index}: need listening host:port")]
    MissingAddress { index: usize },

    #[error("listener {addr}: unknown protocol {proto:?}")]
    UnknownProtocol { addr: String, proto: String },

    #[error("listener {addr}: unknown certificate source {name:?}")]
    UnknownCertSource { addr: String, name: String },

    #[error("listener {addr}: proto 'https' requires cert source")]
    HttpsWithoutCertSource { addr: String },

    #[error("listener {addr}: cert source requires proto 'https', 'tcp' or 'tcp+sni'")]
    CertSourceOnPlainHttp { addr: String },

    #[error("listener {addr}: unknown TLS version {version:?}")]
    UnknownTlsVersion { addr: String, version: String },

    #[error("certificate source {name:?}: {reason}")]
    InvalidCertSource { name: String, reason: String },

    #[error("invalid proxy.strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid proxy.matcher: {0}")]
    UnknownMatcher(String),

    #[error("invalid ui.access: {0}")]
    InvalidAccessMode(String),

    #[error("invalid proxy.noroute_status: {0}")]
    InvalidStatus(u16),

    #[error("invalid log.access_target: {0}")]
    InvalidAccessTarget(String),

    #[error("invalid log.access_format: {0}")]
    InvalidAccessFormat(String),
}

const PROTOCOLS: &[&str] = &["http", "https", "tcp", "tcp+sni"];
const TLS_VERSIONS: &[&str] = &["tls12", "tls13"];

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (index, listen) in config.listen.iter().enumerate() {
        validate_listener(config, index, listen, &mut errors);
    }
    validate_listener(config, config.listen.len(), &config.ui.listen(), &mut errors);

    for cs in &config.cert_source {
        let reason = match cs.kind.as_str() {
            _ if cs.name.is_empty() => Some("missing name"),
            "file" if cs.cert_path.is_empty() || cs.key_path.is_empty() => {
                Some("file source needs cert_path and key_path")
            }
            "path" if cs.cert_path.is_empty() => Some("path source needs cert_path"),
            "file" | "path" => None,
            _ => Some("type must be 'file' or 'path'"),
        };
        if let Some(reason) = reason {
            errors.push(ValidationError::InvalidCertSource {
                name: cs.name.clone(),
                reason: reason.to_string(),
            });
        }
    }

    if !matches!(config.proxy.strategy.as_str(), "rr" | "rnd") {
        errors.push(ValidationError::UnknownStrategy(config.proxy.strategy.clone()));
    }
    if !matches!(config.proxy.matcher.as_str(), "prefix" | "glob") {
        errors.push(ValidationError::UnknownMatcher(config.proxy.matcher.clone()));
    }
    if !matches!(config.ui.access.as_str(), "ro" | "rw") {
        errors.push(ValidationError::InvalidAccessMode(config.ui.access.clone()));
    }
    if !(100..=999).contains(&config.proxy.noroute_status) {
        errors.push(ValidationError::InvalidStatus(config.proxy.noroute_status));
    }
    if !matches!(config.log.access_target.as_str(), "" | "stdout" | "log") {
        errors.push(ValidationError::InvalidAccessTarget(config.log.access_target.clone()));
    }
    if let Err(e) = config.log.access_format.parse::<AccessFormat>() {
        errors.push(ValidationError::InvalidAccessFormat(e.to_string()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_listener(
    config: &ProxyConfig,
    index: usize,
    listen: &ListenConfig,
    errors: &mut Vec<ValidationError>,
) {
    if listen.addr.trim().is_empty() {
        errors.push(ValidationError::MissingAddress { index });
        return;
    }
    let addr = listen.addr.clone();

    if !PROTOCOLS.contains(&listen.proto.as_str()) {
        errors.push(ValidationError::UnknownProtocol {
            addr: addr.clone(),
            proto: listen.proto.clone(),
        });
    }

    match &listen.cert_source {
        Some(name) => {
            if config.cert_source(name).is_none() {
                errors.push(ValidationError::UnknownCertSource {
                    addr: addr.clone(),
                    name: name.clone(),
                });
            }
            if listen.proto == "http" {
                errors.push(ValidationError::CertSourceOnPlainHttp { addr: addr.clone() });
            }
        }
        None if listen.proto == "https" => {
            errors.push(ValidationError::HttpsWithoutCertSource { addr: addr.clone() });
        }
        None => {}
    }

    for version in listen.tls_min.iter().chain(listen.tls_max.iter()) {
        if !TLS_VERSIONS.contains(&version.to_ascii_lowercase().as_str()) {
            errors.push(ValidationError::UnknownTlsVersion {
                addr: addr.clone(),
                version: version.clone(),
            });
        }
    }
}
