//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load certificate sources (`file`: one pair, `path`: a directory of pairs)
//! - Build a rustls `ServerConfig` per listener from its descriptor
//! - Pick the certificate by SNI: exact name, `*.parent`, then the default
//!
//! # Design Decisions
//! - Certificates are loaded once at startup; no refresh
//! - `strict_match` only has an effect for sources that index certificates
//!   by name, since a single-pair source has nothing to match against

use rustls::crypto::{aws_lc_rs, CryptoProvider};
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{RootCertStore, ServerConfig, SupportedProtocolVersion};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{CertSourceConfig, ListenConfig};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("unknown certificate source {0:?}")]
    UnknownSource(String),

    #[error("protocol requires a certificate source")]
    MissingSource,

    #[error("unsupported certificate source type {0:?}")]
    UnsupportedType(String),

    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}: no certificates found")]
    NoCertificates(String),

    #[error("{0}: no private key found")]
    NoPrivateKey(String),

    #[error("unknown TLS version {0:?}")]
    UnknownVersion(String),

    #[error("tls_min is above tls_max")]
    EmptyVersionRange,

    #[error("unknown cipher suite {0:?}")]
    UnknownCipher(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    #[error("client certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

/// Loaded certificate material.
#[derive(Debug, Clone)]
pub struct CertSource {
    pub name: String,
    default: Option<Arc<CertifiedKey>>,
    by_name: BTreeMap<String, Arc<CertifiedKey>>,
    client_ca: Option<Arc<RootCertStore>>,
}

impl CertSource {
    /// Names with their own certificate (lowercase).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}

pub(crate) fn provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

/// Load the certificates a source describes.
pub fn resolve(config: &CertSourceConfig) -> Result<CertSource, TlsError> {
    let provider = provider();
    let mut source = CertSource {
        name: config.name.clone(),
        default: None,
        by_name: BTreeMap::new(),
        client_ca: None,
    };

    match config.kind.as_str() {
        "file" => {
            let key = load_pair(&provider, Path::new(&config.cert_path), Path::new(&config.key_path))?;
            source.default = Some(key);
        }
        "path" => {
            let dir = Path::new(&config.cert_path);
            let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
            let mut certs: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "crt"))
                .collect();
            certs.sort();

            for cert in certs {
                let key = cert.with_extension("key");
                if !key.exists() {
                    tracing::warn!(cert = ?cert, "skipping certificate without key");
                    continue;
                }
                let Some(name) = cert.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let certified = load_pair(&provider, &cert, &key)?;
                source.by_name.insert(name.to_ascii_lowercase(), certified);
            }
            source.default = source.by_name.values().next().cloned();
            if source.default.is_none() {
                return Err(TlsError::NoCertificates(config.cert_path.clone()));
            }
        }
        other => return Err(TlsError::UnsupportedType(other.to_string())),
    }

    if let Some(ca_path) = &config.client_ca_path {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(Path::new(ca_path))? {
            roots.add(cert)?;
        }
        source.client_ca = Some(Arc::new(roots));
    }

    tracing::info!(
        source = %source.name,
        kind = %config.kind,
        names = source.by_name.len(),
        "certificate source loaded"
    );
    Ok(source)
}

/// Build the server config for one listener.
pub fn build_tls_config(
    source: &CertSource,
    listen: &ListenConfig,
    alpn: &[&[u8]],
) -> Result<Arc<ServerConfig>, TlsError> {
    let mut provider = aws_lc_rs::default_provider();
    if !listen.tls_ciphers.is_empty() {
        let mut suites = Vec::new();
        for name in &listen.tls_ciphers {
            let suite = provider
                .cipher_suites
                .iter()
                .find(|cs| format!("{:?}", cs.suite()).eq_ignore_ascii_case(name))
                .ok_or_else(|| TlsError::UnknownCipher(name.clone()))?;
            suites.push(*suite);
        }
        provider.cipher_suites = suites;
    }
    let provider = Arc::new(provider);

    let versions = protocol_versions(listen.tls_min.as_deref(), listen.tls_max.as_deref())?;
    let builder = ServerConfig::builder_with_provider(provider.clone()).with_protocol_versions(&versions)?;

    let builder = match &source.client_ca {
        Some(roots) => {
            let verifier = WebPkiClientVerifier::builder_with_provider(roots.clone(), provider).build()?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let resolver = SniResolver {
        default: source.default.clone(),
        by_name: source.by_name.clone(),
        strict: listen.strict_match && !source.by_name.is_empty(),
    };
    let mut config = builder.with_cert_resolver(Arc::new(resolver));
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(Arc::new(config))
}

fn protocol_versions(
    min: Option<&str>,
    max: Option<&str>,
) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
    let all: [(&str, &'static SupportedProtocolVersion); 2] =
        [("tls12", &rustls::version::TLS12), ("tls13", &rustls::version::TLS13)];

    let index = |v: Option<&str>, default: usize| -> Result<usize, TlsError> {
        match v {
            None => Ok(default),
            Some(v) => all
                .iter()
                .position(|(name, _)| name.eq_ignore_ascii_case(v))
                .ok_or_else(|| TlsError::UnknownVersion(v.to_string())),
        }
    };
    let (lo, hi) = (index(min, 0)?, index(max, all.len() - 1)?);
    if lo > hi {
        return Err(TlsError::EmptyVersionRange);
    }
    Ok(all[lo..=hi].iter().map(|(_, v)| *v).collect())
}

fn load_pair(provider: &CryptoProvider, cert: &Path, key: &Path) -> Result<Arc<CertifiedKey>, TlsError> {
    let certs = load_certs(cert)?;
    let mut reader = BufReader::new(File::open(key).map_err(|e| io_err(key, e))?);
    let der = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| io_err(key, e))?
        .ok_or_else(|| TlsError::NoPrivateKey(key.display().to_string()))?;
    let signing = provider.key_provider.load_private_key(der)?;
    Ok(Arc::new(CertifiedKey::new(certs, signing)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(File::open(path).map_err(|e| io_err(path, e))?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io_err(path, e))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

fn io_err(path: &Path, source: std::io::Error) -> TlsError {
    TlsError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Chooses a certificate by the ClientHello server name.
#[derive(Debug)]
struct SniResolver {
    default: Option<Arc<CertifiedKey>>,
    by_name: BTreeMap<String, Arc<CertifiedKey>>,
    strict: bool,
}

impl SniResolver {
    fn lookup(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        if let Some(name) = server_name.map(str::to_ascii_lowercase) {
            if let Some(key) = self.by_name.get(&name) {
                return Some(key.clone());
            }
            if let Some((_, parent)) = name.split_once('.') {
                if let Some(key) = self.by_name.get(&format!("*.{parent}")) {
                    return Some(key.clone());
                }
            }
        }
        if self.strict {
            return None;
        }
        self.default.clone()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.lookup(client_hello.server_name())
    }
}
