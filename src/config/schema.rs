//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//! Durations are stored as integer milliseconds and exposed as
//! [`Duration`] through accessor methods.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy listeners, one serving unit each.
    pub listen: Vec<ListenConfig>,

    /// Named certificate sources referenced by listeners.
    pub cert_source: Vec<CertSourceConfig>,

    /// Request handling and shutdown behaviour.
    pub proxy: ProxySettings,

    /// Service discovery backend selection.
    pub registry: RegistryConfig,

    /// Logging settings.
    pub log: LogConfig,

    /// Metrics export.
    pub metrics: MetricsConfig,

    /// Admin listener.
    pub ui: UiConfig,

    /// Profiling collector.
    pub profile: ProfileConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: vec![ListenConfig::default()],
            cert_source: Vec::new(),
            proxy: ProxySettings::default(),
            registry: RegistryConfig::default(),
            log: LogConfig::default(),
            metrics: MetricsConfig::default(),
            ui: UiConfig::default(),
            profile: ProfileConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Find a certificate source by name.
    pub fn cert_source(&self, name: &str) -> Option<&CertSourceConfig> {
        self.cert_source.iter().find(|cs| cs.name == name)
    }
}

/// Listener descriptor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Bind address, `host:port` or `:port`.
    pub addr: String,

    /// One of `http`, `https`, `tcp`, `tcp+sni`.
    pub proto: String,

    /// Name of a `[[cert_source]]` entry.
    pub cert_source: Option<String>,

    /// Read timeout in milliseconds (0 = none).
    pub read_timeout_ms: u64,

    /// Write timeout in milliseconds (0 = none).
    pub write_timeout_ms: u64,

    /// Reject TLS handshakes whose server name has no matching certificate.
    pub strict_match: bool,

    /// Minimum TLS version (`tls12`, `tls13`).
    pub tls_min: Option<String>,

    /// Maximum TLS version (`tls12`, `tls13`).
    pub tls_max: Option<String>,

    /// Allowed cipher suites by IANA name. Empty means the provider defaults.
    pub tls_ciphers: Vec<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:9999".to_string(),
            proto: "http".to_string(),
            cert_source: None,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            strict_match: false,
            tls_min: None,
            tls_max: None,
            tls_ciphers: Vec::new(),
        }
    }
}

impl ListenConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.write_timeout_ms)
    }
}

/// Certificate source definition.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CertSourceConfig {
    /// Name referenced by listeners.
    pub name: String,

    /// `file` (single pair) or `path` (directory of `<name>.crt`/`<name>.key`).
    #[serde(rename = "type")]
    pub kind: String,

    /// Certificate file, or directory for `path` sources.
    pub cert_path: String,

    /// Private key file. Unused for `path` sources.
    pub key_path: String,

    /// CA bundle used to verify client certificates.
    pub client_ca_path: Option<String>,
}

/// Request handling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Pick strategy (`rnd`, `rr`).
    pub strategy: String,

    /// Match strategy (`prefix`, `glob`).
    pub matcher: String,

    /// Status returned when no route matches.
    pub noroute_status: u16,

    /// Drain duration for in-flight connections during shutdown.
    pub shutdown_wait_ms: u64,

    /// Backend connect timeout.
    pub dial_timeout_ms: u64,

    /// Time to wait for backend response headers (0 = none).
    pub response_header_timeout_ms: u64,

    /// Maximum idle connections kept per backend host.
    pub max_conn: usize,

    /// TCP keep-alive interval on backend connections (0 = off).
    pub keep_alive_timeout_ms: u64,

    /// Address reported as `by=` in the `Forwarded` header.
    pub local_ip: String,

    /// Header carrying the client IP, if set.
    pub client_ip_header: String,

    /// Header set on requests received over TLS, if set.
    pub tls_header: String,

    /// Value for `tls_header`.
    pub tls_header_value: String,

    /// Header carrying a generated request ID, if set.
    pub request_id_header: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            strategy: "rnd".to_string(),
            matcher: "prefix".to_string(),
            noroute_status: 404,
            shutdown_wait_ms: 0,
            dial_timeout_ms: 30_000,
            response_header_timeout_ms: 0,
            max_conn: 10_000,
            keep_alive_timeout_ms: 0,
            local_ip: String::new(),
            client_ip_header: String::new(),
            tls_header: String::new(),
            tls_header_value: String::new(),
            request_id_header: String::new(),
        }
    }
}

impl ProxySettings {
    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn response_header_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.response_header_timeout_ms)
    }

    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.keep_alive_timeout_ms)
    }
}

/// Registry backend selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// `consul`, `file` or `static`.
    pub backend: String,

    /// How long startup keeps retrying registration.
    pub timeout_ms: u64,

    /// Pause between registration attempts.
    pub retry_ms: u64,

    pub file: FileRegistryConfig,

    #[serde(rename = "static")]
    pub static_routes: StaticRegistryConfig,

    pub consul: ConsulConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: "consul".to_string(),
            timeout_ms: 10_000,
            retry_ms: 500,
            file: FileRegistryConfig::default(),
            static_routes: StaticRegistryConfig::default(),
            consul: ConsulConfig::default(),
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FileRegistryConfig {
    /// File with discovered route directives.
    pub path: String,

    /// Optional file with manual overrides.
    pub manual_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StaticRegistryConfig {
    /// Route directives, newline separated.
    pub routes: String,
}

/// Consul registry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsulConfig {
    pub addr: String,
    pub scheme: String,
    pub token: String,

    /// KV key holding the manual overrides.
    pub kv_path: String,

    /// Service tag prefix that marks a route, e.g. `urlprefix-`.
    pub tag_prefix: String,

    /// Register this instance as a service.
    pub register: bool,
    pub service_addr: String,
    pub service_name: String,
    pub service_tags: Vec<String>,

    /// Health check states that make an instance routable.
    pub service_status: Vec<String>,
    pub check_interval_ms: u64,
    pub check_timeout_ms: u64,
    pub check_scheme: String,
    pub check_tls_skip_verify: bool,

    /// Bound on one-shot API calls. Blocking watch queries are not affected.
    pub request_timeout_ms: u64,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:8500".to_string(),
            scheme: "http".to_string(),
            token: String::new(),
            kv_path: "/waypoint/config".to_string(),
            tag_prefix: "urlprefix-".to_string(),
            register: true,
            service_addr: ":9998".to_string(),
            service_name: "waypoint".to_string(),
            service_tags: Vec::new(),
            service_status: vec!["passing".to_string()],
            check_interval_ms: 1_000,
            check_timeout_ms: 3_000,
            check_scheme: "http".to_string(),
            check_tls_skip_verify: false,
            request_timeout_ms: 5_000,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,

    /// `text` or `json`.
    pub format: String,

    /// Routing table change log: `delta`, `detail` or `all`.
    pub routes_format: String,

    /// Access log destination: empty to disable, `stdout`, or `log` for the
    /// `access` tracing target.
    pub access_target: String,

    /// `common`, `combined`, or a template of `$field` placeholders.
    pub access_format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            routes_format: "delta".to_string(),
            access_target: String::new(),
            access_format: "common".to_string(),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Empty to disable, or `prometheus`.
    pub target: String,

    /// Scrape endpoint bind address.
    pub prometheus_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            prometheus_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UiConfig {
    pub addr: String,
    pub cert_source: Option<String>,

    /// `ro` or `rw`.
    pub access: String,
    pub title: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:9998".to_string(),
            cert_source: None,
            access: "rw".to_string(),
            title: String::new(),
        }
    }
}

impl UiConfig {
    /// Listener descriptor for the admin unit.
    pub fn listen(&self) -> ListenConfig {
        ListenConfig {
            addr: self.addr.clone(),
            proto: if self.cert_source.is_some() { "https" } else { "http" }.to_string(),
            cert_source: self.cert_source.clone(),
            ..ListenConfig::default()
        }
    }
}

/// Profiling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Empty to disable, or `cpu`.
    pub mode: String,

    /// Directory receiving the profile output.
    pub path: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            mode: String::new(),
            path: ".".to_string(),
        }
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
