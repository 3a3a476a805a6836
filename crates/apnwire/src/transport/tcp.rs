//! Plain TCP transport on tokio.
//!
//! TLS is not negotiated here: point the endpoints at a local
//! TLS-terminating tunnel when talking to the real service. Certificate and
//! key paths are accepted and ignored.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{Connection, ConnectionEvent, ConnectionPeer, ConnectionRequest, Endpoint, TlsConfig, Transport};
use crate::errors::TransportError;

/// Default time allowed for the TCP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 4096;

/// Transport that dials plain TCP sockets.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: &Endpoint, tls: &TlsConfig) -> Result<Connection, TransportError> {
        if tls.cert_path.is_some() || tls.key_path.is_some() {
            debug!(%endpoint, "tcp transport ignores TLS material");
        }

        let dial = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let stream = tokio::time::timeout(self.connect_timeout, dial)
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                endpoint: endpoint.to_string(),
            })?
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%endpoint, error = %e, "failed to set TCP_NODELAY");
        }

        debug!(%endpoint, "tcp connection established");
        let (conn, peer) = Connection::pair();
        drop(tokio::spawn(pump(stream, peer, endpoint.to_string())));
        Ok(conn)
    }
}

/// Shuttle bytes between the socket and the channel until either side ends.
async fn pump(stream: TcpStream, mut peer: ConnectionPeer, endpoint: String) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut idle: Option<Duration> = None;

    loop {
        buf.reserve(READ_CHUNK);
        let idle_timer = async move {
            match idle {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            request = peer.recv() => {
                let Some(first) = request else {
                    debug!(%endpoint, "connection released");
                    break;
                };
                let mut wrote = false;
                let mut next = Some(first);
                while let Some(request) = next {
                    match request {
                        ConnectionRequest::Write(bytes) => {
                            if let Err(e) = writer.write_all(&bytes).await {
                                let _ = peer.emit(ConnectionEvent::Error(e.to_string()));
                                let _ = peer.emit(ConnectionEvent::Close);
                                return;
                            }
                            wrote = true;
                        }
                        ConnectionRequest::SetTimeout(t) => idle = t,
                    }
                    next = peer.try_recv();
                }
                if wrote {
                    if let Err(e) = writer.flush().await {
                        let _ = peer.emit(ConnectionEvent::Error(e.to_string()));
                        let _ = peer.emit(ConnectionEvent::Close);
                        return;
                    }
                    let _ = peer.emit(ConnectionEvent::Drain);
                }
            }
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    debug!(%endpoint, "remote closed connection");
                    let _ = peer.emit(ConnectionEvent::Close);
                    break;
                }
                Ok(n) => {
                    debug!(%endpoint, bytes = n, "read");
                    if !peer.emit(ConnectionEvent::Read(buf.split().freeze())) {
                        break;
                    }
                }
                Err(e) => {
                    let _ = peer.emit(ConnectionEvent::Error(e.to_string()));
                    let _ = peer.emit(ConnectionEvent::Close);
                    break;
                }
            },
            () = idle_timer => {
                if !peer.emit(ConnectionEvent::Timeout) {
                    break;
                }
            }
        }
    }
}
