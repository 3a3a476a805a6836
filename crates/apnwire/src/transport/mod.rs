//! Transport abstraction consumed by the gateway and feedback channels.
//!
//! A [`Transport`] dials an [`Endpoint`] and hands back a [`Connection`]: a
//! write side plus a stream of [`ConnectionEvent`]s. The transport keeps the
//! other half, a [`ConnectionPeer`], and pumps bytes between it and the real
//! socket. Dropping the `Connection` releases it; the peer then sees its
//! request stream end and tears the socket down.

pub mod memory;
pub mod tcp;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::TransportError;

pub use memory::{MemoryListener, MemoryTransport, PendingConnect};
pub use tcp::TcpTransport;

/// A `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got `{s}`"))?;
        if host.is_empty() {
            return Err(format!("missing host in `{s}`"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in `{s}`: {e}"))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// Certificate and key locations, passed through to the transport untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM certificate path.
    pub cert_path: Option<PathBuf>,
    /// PEM private key path.
    pub key_path: Option<PathBuf>,
}

/// Something that happened on an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Bytes arrived from the remote peer.
    Read(Bytes),
    /// Everything written so far has left the outbound buffer.
    Drain,
    /// The connection closed.
    Close,
    /// The connection reported a fault. A `Close` usually follows.
    Error(String),
    /// The idle timeout elapsed.
    Timeout,
}

/// What the owning channel asks of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionRequest {
    /// Write these bytes.
    Write(Bytes),
    /// Set (or with `None`, disable) the idle timeout.
    SetTimeout(Option<Duration>),
}

/// Channel-side half of a connection.
#[derive(Debug)]
pub struct Connection {
    requests: mpsc::UnboundedSender<ConnectionRequest>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Transport-side half of a connection.
#[derive(Debug)]
pub struct ConnectionPeer {
    requests: mpsc::UnboundedReceiver<ConnectionRequest>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Connection {
    /// Create a connected `Connection`/`ConnectionPeer` pair.
    pub fn pair() -> (Connection, ConnectionPeer) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        (
            Connection {
                requests: req_tx,
                events: evt_rx,
            },
            ConnectionPeer {
                requests: req_rx,
                events: evt_tx,
            },
        )
    }

    /// Queue bytes for writing.
    pub fn write(&self, bytes: Bytes) -> Result<(), TransportError> {
        self.requests
            .send(ConnectionRequest::Write(bytes))
            .map_err(|_| TransportError::Closed)
    }

    /// Set or disable the idle timeout.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.requests
            .send(ConnectionRequest::SetTimeout(timeout))
            .map_err(|_| TransportError::Closed)
    }

    /// Wait for the next event. A vanished transport reads as `Close`.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        self.events.recv().await.unwrap_or(ConnectionEvent::Close)
    }

    /// Take an event if one is already waiting.
    pub fn try_next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.try_recv().ok()
    }
}

impl ConnectionPeer {
    /// Wait for the next request from the channel. `None` once the
    /// `Connection` has been released.
    pub async fn recv(&mut self) -> Option<ConnectionRequest> {
        self.requests.recv().await
    }

    /// Take a request if one is already waiting.
    pub fn try_recv(&mut self) -> Option<ConnectionRequest> {
        self.requests.try_recv().ok()
    }

    /// Deliver an event to the channel. Returns `false` if it was released.
    pub fn emit(&self, event: ConnectionEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Whether the channel side has been dropped.
    pub fn is_released(&self) -> bool {
        self.events.is_closed()
    }
}

/// Asynchronous connection factory.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Dial `endpoint`. Reports success or failure exactly once.
    async fn connect(&self, endpoint: &Endpoint, tls: &TlsConfig) -> Result<Connection, TransportError>;
}
