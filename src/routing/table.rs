//! Compiled routing table.
//!
//! # Responsibilities
//! - Apply parsed directives in order
//! - Distribute traffic weights over a 100 slot ring per route
//! - Look up targets by host and path, or by host alone for TCP/SNI
//!
//! # Design Decisions
//! - Immutable after construction; replaced wholesale on reload
//! - O(1) host lookup via map, linear scan over that host's routes
//! - Routes ordered longest path first so the most specific match wins

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use url::Url;

use crate::routing::matcher::MatchStrategy;
use crate::routing::parser::{self, Directive, Source};
use crate::routing::picker::PickStrategy;
use crate::routing::RouteError;

const SLOTS: usize = 100;

/// A single upstream of a route.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub service: String,
    pub tags: Vec<String>,
    pub url: Url,
    /// `host:port` to dial.
    pub addr: String,
    /// Prefix removed from the request path before forwarding.
    pub strip_path: Option<String>,
    /// Accept any certificate from an `https` upstream.
    pub tls_skip_verify: bool,
    /// Effective share of the route's traffic.
    pub weight: f64,
}

/// A host/path pair with its targets and slot ring.
#[derive(Debug)]
pub struct Route {
    pub host: String,
    pub path: String,
    targets: Vec<Arc<Target>>,
    slots: Vec<usize>,
    counter: AtomicUsize,
}

impl Route {
    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    pub(crate) fn slots(&self) -> &[usize] {
        &self.slots
    }

    pub(crate) fn counter(&self) -> &AtomicUsize {
        &self.counter
    }
}

/// Flattened view of one target, served by the admin API.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RouteInfo {
    pub service: String,
    pub src: String,
    pub dst: String,
    pub weight: f64,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strip: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub tls_skip_verify: bool,
}

/// The routing table: routes grouped by lowercase host.
#[derive(Debug, Default)]
pub struct Table {
    hosts: BTreeMap<String, Vec<Route>>,
}

#[derive(Debug)]
struct TargetSpec {
    service: String,
    url: Url,
    tags: Vec<String>,
    strip: Option<String>,
    tls_skip_verify: bool,
    fixed: Option<f64>,
}

impl Table {
    /// Compile directive text into a table.
    pub fn parse(text: &str) -> Result<Table, RouteError> {
        Ok(Self::build(parser::parse(text)?))
    }

    /// Compile already parsed directives.
    pub fn build(directives: Vec<Directive>) -> Table {
        let mut routes: BTreeMap<Source, Vec<TargetSpec>> = BTreeMap::new();

        for directive in directives {
            match directive {
                Directive::Add { service, src, dst, weight, tags, opts } => {
                    let spec = TargetSpec {
                        service,
                        url: dst,
                        tags,
                        strip: opts.get("strip").cloned(),
                        tls_skip_verify: opts.get("tlsskipverify").is_some_and(|v| v == "true"),
                        fixed: weight,
                    };
                    let specs = routes.entry(src).or_default();
                    match specs.iter_mut().find(|s| s.service == spec.service && s.url == spec.url) {
                        Some(existing) => *existing = spec,
                        None => specs.push(spec),
                    }
                }
                Directive::Del { service, src: None, .. } => {
                    for specs in routes.values_mut() {
                        specs.retain(|s| s.service != service);
                    }
                }
                Directive::Del { service, src: Some(src), dst } => {
                    if let Some(specs) = routes.get_mut(&src) {
                        specs.retain(|s| {
                            s.service != service || dst.as_ref().is_some_and(|d| *d != s.url)
                        });
                    }
                }
                Directive::Weight { service, src, weight, tags } => {
                    if let Some(specs) = routes.get_mut(&src) {
                        let selected: Vec<&mut TargetSpec> = specs
                            .iter_mut()
                            .filter(|s| s.service == service && tags.iter().all(|t| s.tags.contains(t)))
                            .collect();
                        let share = weight / selected.len().max(1) as f64;
                        for spec in selected {
                            spec.fixed = Some(share);
                        }
                    }
                }
            }
        }

        let mut hosts: BTreeMap<String, Vec<Route>> = BTreeMap::new();
        for (src, specs) in routes {
            if specs.is_empty() {
                continue;
            }
            let route = compile_route(src.clone(), specs);
            hosts.entry(src.host).or_default().push(route);
        }
        for routes in hosts.values_mut() {
            routes.sort_by(|a, b| b.path.len().cmp(&a.path.len()).then_with(|| a.path.cmp(&b.path)));
        }
        Table { hosts }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Routes registered for an exact (lowercase) host key.
    pub fn routes_for(&self, host: &str) -> &[Route] {
        self.hosts.get(host).map(Vec::as_slice).unwrap_or_default()
    }

    /// Find the target for an HTTP request.
    ///
    /// Tries the host as given, then without its port, then routes
    /// registered without a host. A non-empty `trace` logs each step.
    pub fn lookup(
        &self,
        host: &str,
        path: &str,
        trace: &str,
        pick: PickStrategy,
        matcher: MatchStrategy,
    ) -> Option<Arc<Target>> {
        let host = host.to_ascii_lowercase();
        for candidate in candidates(&host, true) {
            for route in self.routes_for(candidate) {
                if matcher.matches(path, &route.path) {
                    let target = pick.pick(route);
                    if !trace.is_empty() {
                        tracing::info!(
                            trace,
                            host = candidate,
                            route = %route.path,
                            target = ?target.as_ref().map(|t| t.url.as_str()),
                            "route matched"
                        );
                    }
                    return target;
                }
                if !trace.is_empty() {
                    tracing::info!(trace, host = candidate, route = %route.path, path, "route skipped");
                }
            }
        }
        if !trace.is_empty() {
            tracing::info!(trace, host = %host, path, "no route");
        }
        None
    }

    /// Find a target by host only. Used for TCP (`:port`) and SNI names.
    pub fn lookup_host(&self, host: &str, pick: PickStrategy) -> Option<Arc<Target>> {
        let host = host.to_ascii_lowercase();
        candidates(&host, false).into_iter().find_map(|candidate| {
            let routes = self.routes_for(candidate);
            routes
                .iter()
                .find(|r| r.path.is_empty() || r.path == "/")
                .or_else(|| routes.first())
                .and_then(|route| pick.pick(route))
        })
    }

    /// Canonical directive text for the table.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for route in self.hosts.values().flatten() {
            for t in &route.targets {
                let _ = write!(
                    out,
                    "route add {} {}{} {} weight {:.4}",
                    t.service, route.host, route.path, t.url, t.weight
                );
                if !t.tags.is_empty() {
                    let _ = write!(out, " tags \"{}\"", t.tags.join(","));
                }
                let mut opts = Vec::new();
                if let Some(strip) = &t.strip_path {
                    opts.push(format!("strip={strip}"));
                }
                if t.tls_skip_verify {
                    opts.push("tlsskipverify=true".to_string());
                }
                if !opts.is_empty() {
                    let _ = write!(out, " opts \"{}\"", opts.join(" "));
                }
                out.push('\n');
            }
        }
        out
    }

    pub fn routes(&self) -> Vec<RouteInfo> {
        self.hosts
            .values()
            .flatten()
            .flat_map(|route| {
                route.targets.iter().map(move |t| RouteInfo {
                    service: t.service.clone(),
                    src: format!("{}{}", route.host, route.path),
                    dst: t.url.to_string(),
                    weight: t.weight,
                    tags: t.tags.clone(),
                    strip: t.strip_path.clone(),
                    tls_skip_verify: t.tls_skip_verify,
                })
            })
            .collect()
    }
}

fn candidates(host: &str, with_default: bool) -> Vec<&str> {
    let mut out = vec![host];
    let bare = strip_port(host);
    if bare != host {
        out.push(bare);
    }
    if with_default && !host.is_empty() {
        out.push("");
    }
    out
}

fn strip_port(host: &str) -> &str {
    if host.starts_with(':') {
        return host;
    }
    if host.starts_with('[') {
        return host.find(']').map(|i| &host[..=i]).unwrap_or(host);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

fn compile_route(src: Source, specs: Vec<TargetSpec>) -> Route {
    let weights = distribute(&specs);

    let mut slots = Vec::with_capacity(SLOTS);
    for (idx, w) in weights.iter().enumerate() {
        let mut n = (w * SLOTS as f64).round() as usize;
        if *w > 0.0 && n == 0 {
            n = 1;
        }
        slots.extend(std::iter::repeat(idx).take(n));
    }

    let targets = specs
        .into_iter()
        .zip(weights)
        .map(|(spec, weight)| {
            let host = spec.url.host_str().unwrap_or_default();
            let port = spec.url.port_or_known_default().unwrap_or(80);
            Arc::new(Target {
                addr: format!("{host}:{port}"),
                service: spec.service,
                tags: spec.tags,
                url: spec.url,
                strip_path: spec.strip,
                tls_skip_verify: spec.tls_skip_verify,
                weight,
            })
        })
        .collect();

    Route {
        host: src.host,
        path: src.path,
        targets,
        slots,
        counter: AtomicUsize::new(0),
    }
}

/// Effective share per target. Fixed weights are normalized when they
/// exceed 1 (or cover every target); unweighted targets split the rest.
fn distribute(specs: &[TargetSpec]) -> Vec<f64> {
    let fixed: f64 = specs.iter().filter_map(|s| s.fixed).sum();
    let free = specs.iter().filter(|s| s.fixed.is_none()).count();

    let scale = if fixed > 1.0 || (free == 0 && fixed > 0.0) { 1.0 / fixed } else { 1.0 };
    let free_share = if free > 0 {
        (1.0 - fixed * scale).max(0.0) / free as f64
    } else {
        0.0
    };

    let weights: Vec<f64> = specs
        .iter()
        .map(|s| s.fixed.map(|w| w * scale).unwrap_or(free_share))
        .collect();

    if weights.iter().all(|w| *w == 0.0) {
        let equal = 1.0 / specs.len() as f64;
        return vec![equal; specs.len()];
    }
    weights
}
