//! Connection lifecycle for the gateway and feedback channels.
//!
//! Each channel owns its link state: the pending connect future while
//! connecting, the [`Connection`] while connected. Moving to
//! `Disconnected` drops whatever the previous state held, which is how a
//! connection is released.

pub mod feedback;
pub mod gateway;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::errors::{ChannelKind, TransportError};
use crate::transport::{Connection, Endpoint, TlsConfig, Transport};

pub use feedback::{FeedbackChannel, FeedbackInput};
pub use gateway::{GatewayChannel, GatewayInput};

/// Observable connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection and none in progress.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A connection is established.
    Connected,
}

pub(crate) type ConnectFuture = BoxFuture<'static, Result<Connection, TransportError>>;

/// Everything a channel needs to (re)dial its endpoint.
#[derive(Clone)]
pub struct Dialer {
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    tls: TlsConfig,
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("endpoint", &self.endpoint)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl Dialer {
    /// Create a dialer for `endpoint` over `transport`.
    pub fn new(transport: Arc<dyn Transport>, endpoint: Endpoint, tls: TlsConfig) -> Self {
        Self {
            transport,
            endpoint,
            tls,
        }
    }

    /// Endpoint this dialer connects to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn dial(&self, channel: ChannelKind) -> ConnectFuture {
        ::metrics::counter!(crate::metrics::CONNECT_ATTEMPTS_TOTAL, "channel" => channel.as_str()).increment(1);
        let transport = Arc::clone(&self.transport);
        let endpoint = self.endpoint.clone();
        let tls = self.tls.clone();
        Box::pin(async move { transport.connect(&endpoint, &tls).await })
    }
}
