//! Consul backend.
//!
//! # Responsibilities
//! - Check agent reachability and register this instance with a health check
//! - Turn healthy service instances with `tag_prefix` tags into route directives
//! - Store manual overrides in a KV key
//!
//! Both watches use Consul blocking queries (`?index=`), so a snapshot is
//! produced only when the catalog or the key actually changed.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::watch;

use crate::config::ConsulConfig;
use crate::registry::{poll_into, Backend, RegistryError};

const WAIT: &str = "5m";
// Consul adds up to wait/16 of jitter to a blocking query.
const WATCH_TIMEOUT: Duration = Duration::from_secs(5 * 60 + 30);
const WATCH_RETRY: Duration = Duration::from_secs(1);

pub struct ConsulBackend {
    client: reqwest::Client,
    base: String,
    config: ConsulConfig,
    service_id: String,
    request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    pub service_name: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogService {
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    pub service_name: String,
    pub address: String,
    pub service_address: String,
    pub service_port: u16,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub service_tags: Vec<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(d)?.unwrap_or_default())
}

impl ConsulBackend {
    pub fn new(config: &ConsulConfig) -> Result<Self, RegistryError> {
        let mut headers = HeaderMap::new();
        if !config.token.is_empty() {
            let token = HeaderValue::from_str(&config.token)
                .map_err(|_| RegistryError::Rejected("token is not a valid header value".into()))?;
            headers.insert("X-Consul-Token", token);
        }
        let client = reqwest::Client::builder().default_headers(headers).build()?;
        let (host, port) = split_service_addr(&config.service_addr);

        Ok(Self {
            client,
            base: format!("{}://{}", config.scheme, config.addr),
            service_id: format!("{}-{}-{}", config.service_name, host, port),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            config: config.clone(),
        })
    }

    fn kv_url(&self) -> String {
        format!("{}/v1/kv/{}", self.base, self.config.kv_path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Backend for ConsulBackend {
    async fn register(&self) -> Result<(), RegistryError> {
        self.client
            .get(format!("{}/v1/agent/self", self.base))
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;

        if !self.config.register {
            return Ok(());
        }

        let (host, port) = split_service_addr(&self.config.service_addr);
        let check_url = format!("{}://{}:{}/health", self.config.check_scheme, host, port);
        let body = json!({
            "ID": self.service_id,
            "Name": self.config.service_name,
            "Tags": self.config.service_tags,
            "Address": host,
            "Port": port,
            "Check": {
                "HTTP": check_url,
                "Interval": format!("{}ms", self.config.check_interval_ms),
                "Timeout": format!("{}ms", self.config.check_timeout_ms),
                "TLSSkipVerify": self.config.check_tls_skip_verify,
            },
        });
        self.client
            .put(format!("{}/v1/agent/service/register", self.base))
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        tracing::info!(id = %self.service_id, check = %check_url, "registered service in consul");
        Ok(())
    }

    async fn deregister(&self) -> Result<(), RegistryError> {
        if !self.config.register {
            return Ok(());
        }
        self.client
            .put(format!("{}/v1/agent/service/deregister/{}", self.base, self.service_id))
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        tracing::info!(id = %self.service_id, "deregistered service from consul");
        Ok(())
    }

    async fn read_manual(&self) -> Result<String, RegistryError> {
        Ok(fetch_kv(&self.client, &self.kv_url(), 0, self.request_timeout).await?.1)
    }

    async fn write_manual(&self, text: &str) -> Result<(), RegistryError> {
        let ok: bool = self
            .client
            .put(self.kv_url())
            .body(text.to_string())
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if ok {
            Ok(())
        } else {
            Err(RegistryError::Rejected("kv write not applied".into()))
        }
    }

    fn watch_services(&self) -> watch::Receiver<String> {
        let (tx, rx) = watch::channel(String::new());
        let client = self.client.clone();
        let base = self.base.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            poll_into(tx, "consul services", WATCH_RETRY, |index| {
                fetch_services(&client, &base, &config, index)
            })
            .await
        });
        rx
    }

    fn watch_manual(&self) -> watch::Receiver<String> {
        let (tx, rx) = watch::channel(String::new());
        let client = self.client.clone();
        let url = self.kv_url();
        tokio::spawn(async move {
            poll_into(tx, "consul manual", WATCH_RETRY, |index| {
                fetch_kv(&client, &url, index, WATCH_TIMEOUT)
            })
            .await
        });
        rx
    }
}

async fn fetch_services(
    client: &reqwest::Client,
    base: &str,
    config: &ConsulConfig,
    index: u64,
) -> Result<(u64, String), RegistryError> {
    let resp = client
        .get(format!("{base}/v1/health/state/any"))
        .query(&[("index", index.to_string()), ("wait", WAIT.to_string())])
        .timeout(WATCH_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;
    let next = consul_index(&resp);
    let checks: Vec<HealthCheck> = resp.json().await?;

    let names: BTreeSet<&str> = checks
        .iter()
        .filter(|c| !c.service_name.is_empty() && c.service_name != config.service_name)
        .map(|c| c.service_name.as_str())
        .collect();

    let mut instances = Vec::new();
    for name in names {
        let list: Vec<CatalogService> = client
            .get(format!("{base}/v1/catalog/service/{name}"))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        instances.extend(list);
    }

    Ok((next, render_routes(&config.tag_prefix, &config.service_status, &checks, &instances)))
}

async fn fetch_kv(
    client: &reqwest::Client,
    url: &str,
    index: u64,
    timeout: Duration,
) -> Result<(u64, String), RegistryError> {
    let resp = client
        .get(url)
        .query(&[("raw", String::new()), ("index", index.to_string()), ("wait", WAIT.to_string())])
        .timeout(timeout)
        .send()
        .await?;
    let next = consul_index(&resp);
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok((next, String::new()));
    }
    let text = resp.error_for_status()?.text().await?;
    Ok((next, text))
}

fn consul_index(resp: &reqwest::Response) -> u64 {
    resp.headers()
        .get("X-Consul-Index")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn split_service_addr(addr: &str) -> (String, u16) {
    let (host, port) = addr.rsplit_once(':').unwrap_or((addr, ""));
    let host = if host.is_empty() { "127.0.0.1" } else { host };
    (host.to_string(), port.parse().unwrap_or(9998))
}

/// Render route directives for every healthy instance.
///
/// An instance is healthy when all of its checks are in `status`. Each tag
/// `<prefix><src> [opts...]` becomes one `route add`; the instance's other
/// tags are attached. Output is sorted so identical catalogs render
/// identical text.
pub fn render_routes(
    prefix: &str,
    status: &[String],
    checks: &[HealthCheck],
    instances: &[CatalogService],
) -> String {
    let mut healthy: HashMap<&str, bool> = HashMap::new();
    for check in checks.iter().filter(|c| !c.service_id.is_empty()) {
        let ok = status.iter().any(|s| *s == check.status);
        healthy
            .entry(check.service_id.as_str())
            .and_modify(|h| *h &= ok)
            .or_insert(ok);
    }

    let mut lines = BTreeSet::new();
    for inst in instances {
        if !healthy.get(inst.service_id.as_str()).copied().unwrap_or(false) {
            continue;
        }
        let addr = if inst.service_address.is_empty() {
            &inst.address
        } else {
            &inst.service_address
        };
        let other_tags: Vec<&str> = inst
            .service_tags
            .iter()
            .filter(|t| !t.starts_with(prefix))
            .map(String::as_str)
            .collect();

        for tag in inst.service_tags.iter().filter_map(|t| t.strip_prefix(prefix)) {
            let mut parts = tag.split_whitespace();
            let Some(src) = parts.next() else { continue };
            let opts: Vec<&str> = parts.collect();

            let scheme = match src.starts_with(':') {
                true => "tcp",
                false if opts.contains(&"proto=https") => "https",
                false => "http",
            };
            let slash = if scheme == "tcp" { "" } else { "/" };
            let mut line = format!(
                "route add {} {} {}://{}:{}{}",
                inst.service_name, src, scheme, addr, inst.service_port, slash
            );
            if !other_tags.is_empty() {
                line.push_str(&format!(" tags \"{}\"", other_tags.join(",")));
            }
            if !opts.is_empty() {
                line.push_str(&format!(" opts \"{}\"", opts.join(" ")));
            }
            lines.insert(line);
        }
    }

    lines.into_iter().collect::<Vec<_>>().join("\n")
}
