//! In-process transport.
//!
//! Every `connect` call surfaces as a [`PendingConnect`] on the paired
//! [`MemoryListener`]; whoever holds the listener decides whether the dial
//! succeeds and then plays the remote side through the returned
//! [`ConnectionPeer`]. Useful for tests and for embedding the client next to
//! an in-process gateway.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{Connection, ConnectionPeer, Endpoint, TlsConfig, Transport};
use crate::errors::TransportError;

/// Transport whose connections are answered by a [`MemoryListener`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    dials: mpsc::UnboundedSender<PendingConnect>,
}

/// Receives dial attempts made through a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryListener {
    dials: mpsc::UnboundedReceiver<PendingConnect>,
}

/// A dial attempt waiting to be accepted or refused.
#[derive(Debug)]
pub struct PendingConnect {
    /// Endpoint that was dialed.
    pub endpoint: Endpoint,
    /// TLS material passed by the caller.
    pub tls: TlsConfig,
    reply: oneshot::Sender<Result<Connection, TransportError>>,
}

impl MemoryTransport {
    /// Create a transport and the listener that answers it.
    pub fn new() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { dials: tx }, MemoryListener { dials: rx })
    }
}

impl MemoryListener {
    /// Wait for the next dial attempt. `None` once every transport is gone.
    pub async fn next_connect(&mut self) -> Option<PendingConnect> {
        self.dials.recv().await
    }

    /// Take a dial attempt if one is already waiting.
    pub fn try_next_connect(&mut self) -> Option<PendingConnect> {
        self.dials.try_recv().ok()
    }
}

impl PendingConnect {
    /// Complete the dial successfully and return the remote side.
    pub fn accept(self) -> ConnectionPeer {
        let (conn, peer) = Connection::pair();
        let _ = self.reply.send(Ok(conn));
        peer
    }

    /// Fail the dial with `reason`.
    pub fn refuse(self, reason: impl Into<String>) {
        let _ = self.reply.send(Err(TransportError::Connect {
            endpoint: self.endpoint.to_string(),
            reason: reason.into(),
        }));
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, endpoint: &Endpoint, tls: &TlsConfig) -> Result<Connection, TransportError> {
        debug!(%endpoint, "memory transport dial");
        let (reply, answer) = oneshot::channel();
        let pending = PendingConnect {
            endpoint: endpoint.clone(),
            tls: tls.clone(),
            reply,
        };
        if self.dials.send(pending).is_err() {
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "no listener".to_string(),
            });
        }
        answer.await.unwrap_or_else(|_| {
            Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "dial abandoned".to_string(),
            })
        })
    }
}
