//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[registry]\nbackend = \"file\"\n[registry.file]\npath = \"/tmp/routes\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.registry.backend, "file");
        assert_eq!(config.registry.file.path, "/tmp/routes");
    }

    #[test]
    fn validation_errors_are_joined() {
        let err = parse_config("[proxy]\nstrategy = \"least\"\nmatcher = \"regex\"").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invalid proxy.strategy: least"), "{msg}");
        assert!(msg.contains("invalid proxy.matcher: regex"), "{msg}");
    }

    #[test]
    fn syntax_errors_surface_as_parse() {
        assert!(matches!(parse_config("[proxy"), Err(ConfigError::Parse(_))));
    }
}
