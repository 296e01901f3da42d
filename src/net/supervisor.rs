//! Listener supervisor.
//!
//! # Responsibilities
//! - Start one serving unit per listener descriptor, plus the admin unit
//! - Resolve TLS material for each unit before it accepts anything
//! - Surface unit failures to startup
//! - Run every unit's stop/drain hook on shutdown
//!
//! # Design Decisions
//! - All proxy listeners are bound and their TLS material resolved before
//!   the first unit is spawned, so a bind or TLS failure leaves nothing
//!   serving
//! - HTTP units are `axum-server` servers driven through a `Handle`;
//!   stream units are [`TcpProxy`] tasks stopped through a oneshot that
//!   carries the drain period

use axum::Router;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use rustls::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;

use crate::admin::{admin_router, AccessMode, AdminState};
use crate::config::{ListenConfig, ProxyConfig};
use crate::http::server::{proxy_router, ProxyState};
use crate::http::AccessLog;
use crate::lifecycle::RuntimeContext;
use crate::net::listener::{bind, bind_all, BoundListener, ListenerError, Protocol};
use crate::net::tcp::{StreamMode, TcpProxy};
use crate::net::tls::{self, TlsError};
use crate::registry::Backend;
use crate::routing::{MatchStrategy, PickStrategy};

const HTTP_ALPN: [&[u8]; 2] = [b"h2", b"http/1.1"];

enum Stopper {
    Http(Handle),
    Stream(oneshot::Sender<Duration>),
}

/// A listener whose socket and TLS material are ready but not yet served.
enum Prepared {
    Http {
        name: &'static str,
        bound: BoundListener,
        app: Router,
        tls: Option<Arc<ServerConfig>>,
    },
    Stream {
        name: &'static str,
        config: ListenConfig,
        addr: SocketAddr,
        listener: tokio::net::TcpListener,
        mode: StreamMode,
    },
}

struct Unit {
    name: &'static str,
    addr: SocketAddr,
    stopper: Stopper,
    task: JoinHandle<()>,
}

impl Unit {
    async fn stop(self, drain: Duration) {
        let Unit { name, addr, stopper, mut task } = self;
        match stopper {
            Stopper::Stream(stop) => {
                let _ = stop.send(drain);
                let _ = task.await;
            }
            Stopper::Http(handle) => {
                handle.graceful_shutdown(Some(drain));
                tokio::select! {
                    _ = &mut task => {}
                    _ = tokio::time::sleep(drain) => {
                        let forced = handle.connection_count();
                        if forced > 0 {
                            tracing::warn!(address = %addr, forced, "closing connections after drain");
                        }
                        let _ = task.await;
                    }
                }
            }
        }
        tracing::info!(address = %addr, proto = name, "listener stopped");
    }
}

pub struct Supervisor {
    ctx: Arc<RuntimeContext>,
    config: Arc<ProxyConfig>,
    proxy: ProxyState,
    pick: PickStrategy,
    units: Vec<Unit>,
    failures_tx: mpsc::UnboundedSender<ListenerError>,
    failures_rx: mpsc::UnboundedReceiver<ListenerError>,
}

impl Supervisor {
    pub fn new(
        ctx: Arc<RuntimeContext>,
        config: Arc<ProxyConfig>,
        pick: PickStrategy,
        matcher: MatchStrategy,
    ) -> Self {
        let proxy = ProxyState::new(ctx.clone(), &config.proxy, pick, matcher);
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            config,
            proxy,
            pick,
            units: Vec::new(),
            failures_tx,
            failures_rx,
        }
    }

    /// Log every proxied HTTP request to `access_log`.
    pub fn with_access_log(mut self, access_log: Option<Arc<AccessLog>>) -> Self {
        self.proxy = self.proxy.with_access_log(access_log);
        self
    }

    /// Bind and start the admin listener.
    pub fn start_admin(&mut self, backend: Arc<dyn Backend>, access: AccessMode) -> Result<SocketAddr, ListenerError> {
        let bound = bind(&self.config.ui.listen())?;
        let addr = bound.local_addr;
        let tls = self.tls_config(&bound.config, &HTTP_ALPN).map_err(|source| ListenerError::Tls {
            addr: bound.config.addr.clone(),
            source,
        })?;
        let state = AdminState {
            ctx: self.ctx.clone(),
            config: self.config.clone(),
            backend,
        };
        self.spawn_http("admin", bound, admin_router(state, access), tls);
        tracing::info!(address = %addr, access = ?access, "admin listener started");
        Ok(addr)
    }

    /// Bind every proxy listener and resolve its TLS material, then start
    /// one unit for each. Nothing is spawned unless every listener is ready.
    pub fn start_listeners(&mut self) -> Result<Vec<SocketAddr>, ListenerError> {
        let prepared = bind_all(&self.config.listen)?
            .into_iter()
            .map(|bound| self.prepare(bound))
            .collect::<Result<Vec<_>, _>>()?;

        let mut addrs = Vec::with_capacity(prepared.len());
        for unit in prepared {
            match unit {
                Prepared::Http { name, bound, app, tls } => {
                    addrs.push(bound.local_addr);
                    self.spawn_http(name, bound, app, tls);
                }
                Prepared::Stream {
                    name,
                    config,
                    addr,
                    listener,
                    mode,
                } => {
                    addrs.push(addr);
                    self.spawn_stream(name, &config, addr, listener, mode);
                }
            }
        }
        Ok(addrs)
    }

    fn prepare(&self, bound: BoundListener) -> Result<Prepared, ListenerError> {
        let tls_err = |source: TlsError| ListenerError::Tls {
            addr: bound.config.addr.clone(),
            source,
        };
        let stream_mode = match bound.protocol {
            Protocol::Http | Protocol::Https => {
                let tls = self.tls_config(&bound.config, &HTTP_ALPN).map_err(tls_err)?;
                if bound.protocol == Protocol::Https && tls.is_none() {
                    return Err(tls_err(TlsError::MissingSource));
                }
                let state = self.proxy.for_listener(tls.is_some(), bound.local_addr.port());
                let app = proxy_router(state, &bound.config);
                return Ok(Prepared::Http {
                    name: bound.protocol.as_str(),
                    bound,
                    app,
                    tls,
                });
            }
            Protocol::Tcp => match self.tls_config(&bound.config, &[]).map_err(tls_err)? {
                Some(tls) => StreamMode::Tls(TlsAcceptor::from(tls)),
                None => StreamMode::Plain,
            },
            Protocol::TcpSni => {
                // Resolved so a broken source fails startup; traffic stays encrypted.
                self.tls_config(&bound.config, &[]).map_err(tls_err)?;
                StreamMode::Sni
            }
        };

        let BoundListener {
            config,
            protocol,
            local_addr,
            socket,
        } = bound;
        let listener = tokio::net::TcpListener::from_std(socket).map_err(|source| ListenerError::Serve {
            addr: local_addr.to_string(),
            source,
        })?;
        Ok(Prepared::Stream {
            name: protocol.as_str(),
            config,
            addr: local_addr,
            listener,
            mode: stream_mode,
        })
    }

    fn tls_config(&self, listen: &ListenConfig, alpn: &[&[u8]]) -> Result<Option<Arc<ServerConfig>>, TlsError> {
        let Some(name) = &listen.cert_source else {
            return Ok(None);
        };
        let source_config = self
            .config
            .cert_source(name)
            .ok_or_else(|| TlsError::UnknownSource(name.clone()))?;
        let source = tls::resolve(source_config)?;
        Ok(Some(tls::build_tls_config(&source, listen, alpn)?))
    }

    fn spawn_http(&mut self, name: &'static str, bound: BoundListener, app: Router, tls: Option<Arc<ServerConfig>>) {
        let addr = bound.local_addr;
        let handle = Handle::new();
        let read_timeout = bound.config.read_timeout();
        let failures = self.failures_tx.clone();
        let service = app.into_make_service_with_connect_info::<SocketAddr>();

        let server_handle = handle.clone();
        let task = tokio::spawn(async move {
            let result = match tls {
                Some(tls) => {
                    let mut server =
                        axum_server::from_tcp_rustls(bound.socket, RustlsConfig::from_config(tls)).handle(server_handle);
                    apply_read_timeout(server.http_builder(), read_timeout);
                    server.serve(service).await
                }
                None => {
                    let mut server = axum_server::from_tcp(bound.socket).handle(server_handle);
                    apply_read_timeout(server.http_builder(), read_timeout);
                    server.serve(service).await
                }
            };
            if let Err(source) = result {
                let _ = failures.send(ListenerError::Serve {
                    addr: addr.to_string(),
                    source,
                });
            }
        });

        self.units.push(Unit {
            name,
            addr,
            stopper: Stopper::Http(handle),
            task,
        });
    }

    fn spawn_stream(
        &mut self,
        name: &'static str,
        config: &ListenConfig,
        addr: SocketAddr,
        listener: tokio::net::TcpListener,
        mode: StreamMode,
    ) {
        let proxy = Arc::new(TcpProxy::new(
            self.ctx.clone(),
            self.pick,
            mode,
            addr,
            config.read_timeout(),
            self.config.proxy.dial_timeout(),
        ));
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(proxy.serve(listener, stopped));

        self.units.push(Unit {
            name,
            addr,
            stopper: Stopper::Stream(stop),
            task,
        });
    }

    /// Addresses of all running units, admin first when it was started first.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.units.iter().map(|u| u.addr).collect()
    }

    /// Resolves with the first unit error.
    pub async fn failed(&mut self) -> ListenerError {
        match self.failures_rx.recv().await {
            Some(e) => e,
            None => std::future::pending().await,
        }
    }

    /// Stop accepting on every unit and drain them concurrently.
    pub async fn shutdown(&mut self, drain: Duration) {
        tracing::info!(units = self.units.len(), drain = ?drain, "stopping listeners");
        let mut draining = JoinSet::new();
        for unit in self.units.drain(..) {
            draining.spawn(unit.stop(drain));
        }
        while draining.join_next().await.is_some() {}
    }
}

fn apply_read_timeout(builder: &mut Builder<TokioExecutor>, limit: Option<Duration>) {
    if let Some(limit) = limit {
        builder.http1().timer(TokioTimer::new()).header_read_timeout(limit);
    }
}
