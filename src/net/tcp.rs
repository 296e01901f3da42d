//! TCP and TCP+SNI serving units.
//!
//! # Responsibilities
//! - Accept connections until told to stop
//! - Resolve the target through the live table on every connection
//! - Relay bytes in both directions
//!
//! # Design Decisions
//! - Connections run in a per-unit `JoinSet` so the unit can count and
//!   abort whatever is left when the drain period ends
//! - `tcp` routes are keyed by `:<local port>`, `tcp+sni` routes by the
//!   ClientHello server name; the ClientHello is replayed untouched

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{copy_bidirectional, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use crate::lifecycle::RuntimeContext;
use crate::net::connection::ConnectionId;
use crate::net::sni;
use crate::observability::metrics;
use crate::routing::{PickStrategy, Target};

/// How accepted streams are handled before relaying.
pub enum StreamMode {
    /// Opaque relay.
    Plain,
    /// Terminate TLS, relay plaintext.
    Tls(TlsAcceptor),
    /// Route by ClientHello server name, relay encrypted bytes.
    Sni,
}

pub struct TcpProxy {
    ctx: Arc<RuntimeContext>,
    pick: PickStrategy,
    mode: StreamMode,
    route_key: String,
    read_timeout: Option<Duration>,
    dial_timeout: Duration,
}

impl TcpProxy {
    pub fn new(
        ctx: Arc<RuntimeContext>,
        pick: PickStrategy,
        mode: StreamMode,
        local_addr: SocketAddr,
        read_timeout: Option<Duration>,
        dial_timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            pick,
            mode,
            route_key: format!(":{}", local_addr.port()),
            read_timeout,
            dial_timeout,
        }
    }

    /// Accept until `stop` delivers the drain period, then drain.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut stop: oneshot::Receiver<Duration>) {
        let addr = listener.local_addr().ok();
        let mut conns = JoinSet::new();

        let drain = loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let this = self.clone();
                        conns.spawn(async move {
                            let id = ConnectionId::new();
                            tracing::debug!(connection_id = %id, peer = %peer, "connection accepted");
                            if let Err(e) = this.handle(stream).await {
                                tracing::debug!(connection_id = %id, error = %e, "connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                Some(_) = conns.join_next(), if !conns.is_empty() => {}
                drain = &mut stop => break drain.unwrap_or_default(),
            }
        };
        drop(listener);

        tracing::info!(address = ?addr, in_flight = conns.len(), "listener stopped accepting");
        let deadline = tokio::time::sleep(drain);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                next = conns.join_next() => if next.is_none() { break },
                _ = &mut deadline => {
                    tracing::warn!(address = ?addr, forced = conns.len(), "closing connections after drain");
                    conns.shutdown().await;
                    break;
                }
            }
        }
    }

    async fn handle(&self, mut stream: TcpStream) -> io::Result<()> {
        match &self.mode {
            StreamMode::Plain => {
                let Some(target) = self.lookup(&self.route_key) else {
                    return Ok(());
                };
                self.relay(&mut stream, &target, &[]).await
            }
            StreamMode::Tls(acceptor) => {
                let mut tls = acceptor.accept(stream).await?;
                let Some(target) = self.lookup(&self.route_key) else {
                    return Ok(());
                };
                self.relay(&mut tls, &target, &[]).await
            }
            StreamMode::Sni => {
                let hello = match self.read_timeout {
                    Some(limit) => tokio::time::timeout(limit, read_client_hello(&mut stream))
                        .await
                        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "reading ClientHello"))??,
                    None => read_client_hello(&mut stream).await?,
                };
                let Some(name) = sni::server_name(&hello) else {
                    tracing::debug!("no server name in ClientHello");
                    return Ok(());
                };
                let Some(target) = self.lookup(&name) else {
                    return Ok(());
                };
                self.relay(&mut stream, &target, &hello).await
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<Arc<Target>> {
        let target = self.ctx.table().lookup_host(key, self.pick);
        if target.is_none() {
            metrics::record_not_found();
            tracing::debug!(route = key, "no route");
        }
        target
    }

    async fn relay<S>(&self, client: &mut S, target: &Target, replay: &[u8]) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut upstream = tokio::time::timeout(self.dial_timeout, TcpStream::connect(&target.addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "dial timeout"))??;
        if !replay.is_empty() {
            upstream.write_all(replay).await?;
        }
        let (up, down) = copy_bidirectional(client, &mut upstream).await?;
        tracing::debug!(target = %target.addr, up, down, "connection closed");
        Ok(())
    }
}

/// Read exactly the first TLS record.
async fn read_client_hello<R: AsyncRead + Unpin>(stream: &mut R) -> io::Result<Vec<u8>> {
    let mut record = vec![0u8; sni::RECORD_HEADER_LEN];
    stream.read_exact(&mut record).await?;
    let len = sni::record_len(&record)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "not a TLS handshake"))?;
    record.resize(sni::RECORD_HEADER_LEN + len, 0);
    stream.read_exact(&mut record[sni::RECORD_HEADER_LEN..]).await?;
    Ok(record)
}
