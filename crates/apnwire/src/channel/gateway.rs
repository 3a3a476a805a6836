//! Gateway channel: lazy connect, write-through, queue flush on connect.
//!
//! ```text
//! Disconnected --send--> Connecting --ok--> Connected
//!      ^                     |                  |
//!      +------- failure -----+--- close/error/timeout
//! ```
//!
//! The channel never schedules its own reconnect; the next `send` dials again.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{ChannelState, ConnectFuture, Dialer};
use crate::errors::{ChannelError, ChannelErrorKind, ChannelKind, TransportError};
use crate::events::{ClientEvent, EventBus};
use crate::queue::OutboundQueue;
use crate::transport::{Connection, ConnectionEvent};

enum Link {
    Disconnected,
    Connecting(ConnectFuture),
    Connected(Connection),
}

/// Input the driver feeds back into [`GatewayChannel::handle`].
#[derive(Debug)]
pub enum GatewayInput {
    /// The pending connect attempt finished.
    Connected(Result<Connection, TransportError>),
    /// The established connection reported an event.
    Event(ConnectionEvent),
}

/// Delivery connection state machine plus its outbound queue.
pub struct GatewayChannel {
    dialer: Dialer,
    idle_timeout: Option<Duration>,
    queue: OutboundQueue,
    link: Link,
}

impl std::fmt::Debug for GatewayChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayChannel")
            .field("endpoint", self.dialer.endpoint())
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl GatewayChannel {
    /// Create a disconnected channel. `idle_timeout` is pushed to each new
    /// connection; `None` leaves the transport default.
    pub fn new(dialer: Dialer, idle_timeout: Option<Duration>) -> Self {
        Self {
            dialer,
            idle_timeout,
            queue: OutboundQueue::new(),
            link: Link::Disconnected,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        match self.link {
            Link::Disconnected => ChannelState::Disconnected,
            Link::Connecting(_) => ChannelState::Connecting,
            Link::Connected(_) => ChannelState::Connected,
        }
    }

    /// Packets waiting for a connection.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Write `packet` now if connected, otherwise queue it and make sure a
    /// connect is in flight.
    ///
    /// A write that finds the transport already gone queues the packet,
    /// reports whatever events the transport left behind, and redials.
    pub fn send(&mut self, packet: Bytes, bus: &mut EventBus) {
        if let Link::Connected(conn) = &self.link {
            if conn.write(packet.clone()).is_ok() {
                ::metrics::counter!(crate::metrics::PACKETS_WRITTEN_TOTAL).increment(1);
                return;
            }
        }

        self.queue.enqueue(packet);
        match std::mem::replace(&mut self.link, Link::Disconnected) {
            Link::Connected(mut conn) => {
                debug!(endpoint = %self.dialer.endpoint(), "gateway write on dead connection, redialing");
                // Queue is non-empty here, so a stale Drain emits nothing.
                while let Some(event) = conn.try_next_event() {
                    self.on_event(event, bus);
                }
            }
            other => self.link = other,
        }
        if matches!(self.link, Link::Disconnected) {
            info!(endpoint = %self.dialer.endpoint(), queued = self.queue.len(), "gateway connecting");
            self.link = Link::Connecting(self.dialer.dial(ChannelKind::Gateway));
        }
    }

    /// Wait for the next thing that needs handling. Pends forever while
    /// disconnected. Cancel-safe.
    pub async fn next_input(&mut self) -> GatewayInput {
        match &mut self.link {
            Link::Disconnected => std::future::pending().await,
            Link::Connecting(dial) => GatewayInput::Connected(dial.await),
            Link::Connected(conn) => GatewayInput::Event(conn.next_event().await),
        }
    }

    /// React to a connect result or connection event.
    pub fn handle(&mut self, input: GatewayInput, bus: &mut EventBus) {
        match input {
            GatewayInput::Connected(Ok(conn)) => self.on_connected(conn, bus),
            GatewayInput::Connected(Err(e)) => {
                warn!(endpoint = %self.dialer.endpoint(), error = %e, "gateway connect failed");
                ::metrics::counter!(crate::metrics::CONNECT_FAILURES_TOTAL, "channel" => "gateway").increment(1);
                self.link = Link::Disconnected;
                emit_error(bus, ChannelErrorKind::Connect, e.to_string());
            }
            GatewayInput::Event(event) => self.on_event(event, bus),
        }
    }

    fn on_connected(&mut self, conn: Connection, bus: &mut EventBus) {
        info!(endpoint = %self.dialer.endpoint(), queued = self.queue.len(), "gateway connected");
        if let Some(timeout) = self.idle_timeout {
            let _ = conn.set_timeout(Some(timeout));
        }

        match self.queue.flush_into(|packet| conn.write(packet)) {
            Ok(written) => {
                ::metrics::counter!(crate::metrics::PACKETS_WRITTEN_TOTAL).increment(written as u64);
                self.link = Link::Connected(conn);
                if written > 0 {
                    let _ = bus.emit(&ClientEvent::Drain);
                }
            }
            Err(e) => {
                warn!(error = %e, remaining = self.queue.len(), "gateway flush failed");
                self.link = Link::Disconnected;
                emit_error(bus, ChannelErrorKind::Transport, e.to_string());
            }
        }
    }

    fn on_event(&mut self, event: ConnectionEvent, bus: &mut EventBus) {
        match event {
            ConnectionEvent::Drain => {
                if self.queue.is_empty() {
                    let _ = bus.emit(&ClientEvent::Drain);
                }
            }
            ConnectionEvent::Close => {
                info!(endpoint = %self.dialer.endpoint(), "gateway closed");
                self.link = Link::Disconnected;
            }
            ConnectionEvent::Error(cause) => {
                warn!(endpoint = %self.dialer.endpoint(), %cause, "gateway connection error");
                self.link = Link::Disconnected;
                emit_error(bus, ChannelErrorKind::Transport, cause);
            }
            ConnectionEvent::Timeout => {
                warn!(endpoint = %self.dialer.endpoint(), "gateway idle timeout");
                self.link = Link::Disconnected;
                emit_error(bus, ChannelErrorKind::Timeout, "timeout");
            }
            ConnectionEvent::Read(bytes) => {
                // The simple packet format has no responses.
                debug!(bytes = bytes.len(), "ignoring gateway read");
            }
        }
    }
}

fn emit_error(bus: &mut EventBus, kind: ChannelErrorKind, cause: impl Into<String>) {
    let err = ChannelError::new(ChannelKind::Gateway, kind, cause);
    let _ = bus.emit(&ClientEvent::Error(err));
}
