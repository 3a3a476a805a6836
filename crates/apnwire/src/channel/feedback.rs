//! Feedback channel: long-lived connection streaming rejected device tokens.
//!
//! Opened once by [`FeedbackChannel::start`]. When an established connection
//! closes, a reconnect is scheduled after a fixed delay. A failed connect is
//! reported and not retried, and an idle timeout resets the channel silently.

use std::pin::Pin;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use super::{ChannelState, ConnectFuture, Dialer};
use crate::codec::decode_feedback_records;
use crate::errors::{ChannelError, ChannelErrorKind, ChannelKind, TransportError};
use crate::events::{ClientEvent, EventBus, FeedbackEvent};
use crate::transport::{Connection, ConnectionEvent};

/// Default delay between a close and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

enum Link {
    Disconnected { reconnect: Option<Pin<Box<Sleep>>> },
    Connecting(ConnectFuture),
    Connected { conn: Connection, pending: BytesMut },
}

/// Input the driver feeds back into [`FeedbackChannel::handle`].
#[derive(Debug)]
pub enum FeedbackInput {
    /// The pending connect attempt finished.
    Connected(Result<Connection, TransportError>),
    /// The established connection reported an event.
    Event(ConnectionEvent),
    /// The reconnect delay elapsed.
    ReconnectDue,
}

/// Feedback connection state machine and record accumulator.
pub struct FeedbackChannel {
    dialer: Dialer,
    reconnect_delay: Duration,
    started: bool,
    link: Link,
}

impl std::fmt::Debug for FeedbackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackChannel")
            .field("endpoint", self.dialer.endpoint())
            .field("state", &self.state())
            .field("started", &self.started)
            .field("reconnect_pending", &self.reconnect_pending())
            .finish_non_exhaustive()
    }
}

impl FeedbackChannel {
    /// Create an idle channel.
    pub fn new(dialer: Dialer, reconnect_delay: Duration) -> Self {
        Self {
            dialer,
            reconnect_delay,
            started: false,
            link: Link::Disconnected { reconnect: None },
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        match self.link {
            Link::Disconnected { .. } => ChannelState::Disconnected,
            Link::Connecting(_) => ChannelState::Connecting,
            Link::Connected { .. } => ChannelState::Connected,
        }
    }

    /// Whether a reconnect timer is armed.
    pub fn reconnect_pending(&self) -> bool {
        matches!(self.link, Link::Disconnected { reconnect: Some(_) })
    }

    /// Open the channel. Only the first call dials; later calls return `false`.
    pub fn start(&mut self) -> bool {
        if self.started {
            debug!("feedback listener already started");
            return false;
        }
        self.started = true;
        self.connect();
        true
    }

    /// Wait for the next thing that needs handling. Cancel-safe.
    pub async fn next_input(&mut self) -> FeedbackInput {
        match &mut self.link {
            Link::Disconnected { reconnect: Some(timer) } => {
                timer.as_mut().await;
                FeedbackInput::ReconnectDue
            }
            Link::Disconnected { reconnect: None } => std::future::pending().await,
            Link::Connecting(dial) => FeedbackInput::Connected(dial.await),
            Link::Connected { conn, .. } => FeedbackInput::Event(conn.next_event().await),
        }
    }

    /// React to a connect result, connection event or reconnect timer.
    pub fn handle(&mut self, input: FeedbackInput, bus: &mut EventBus) {
        match input {
            FeedbackInput::Connected(Ok(conn)) => {
                info!(endpoint = %self.dialer.endpoint(), "feedback connected");
                // Feedback data arrives rarely; never treat silence as failure.
                let _ = conn.set_timeout(None);
                self.link = Link::Connected {
                    conn,
                    pending: BytesMut::new(),
                };
            }
            FeedbackInput::Connected(Err(e)) => {
                warn!(endpoint = %self.dialer.endpoint(), error = %e, "feedback connect failed");
                ::metrics::counter!(crate::metrics::CONNECT_FAILURES_TOTAL, "channel" => "feedback").increment(1);
                self.link = Link::Disconnected { reconnect: None };
                emit_error(bus, ChannelErrorKind::Connect, e.to_string());
            }
            FeedbackInput::Event(event) => self.on_event(event, bus),
            FeedbackInput::ReconnectDue => {
                info!(endpoint = %self.dialer.endpoint(), "feedback reconnecting");
                self.connect();
            }
        }
    }

    fn connect(&mut self) {
        self.link = Link::Connecting(self.dialer.dial(ChannelKind::Feedback));
    }

    fn on_event(&mut self, event: ConnectionEvent, bus: &mut EventBus) {
        match event {
            ConnectionEvent::Read(bytes) => {
                let Link::Connected { pending, .. } = &mut self.link else {
                    return;
                };
                pending.extend_from_slice(&bytes);
                let (records, rest) = decode_feedback_records(pending);
                let consumed = pending.len() - rest.len();
                pending.advance(consumed);

                debug!(records = records.len(), buffered = pending.len(), "feedback read");
                ::metrics::counter!(crate::metrics::FEEDBACK_RECORDS_TOTAL).increment(records.len() as u64);
                for record in &records {
                    let _ = bus.emit(&ClientEvent::Feedback(FeedbackEvent::from(record)));
                }
            }
            ConnectionEvent::Close => {
                info!(
                    endpoint = %self.dialer.endpoint(),
                    delay_ms = self.reconnect_delay.as_millis() as u64,
                    "feedback closed, scheduling reconnect"
                );
                ::metrics::counter!(crate::metrics::FEEDBACK_RECONNECTS_TOTAL).increment(1);
                self.link = Link::Disconnected {
                    reconnect: Some(Box::pin(tokio::time::sleep(self.reconnect_delay))),
                };
            }
            ConnectionEvent::Error(cause) => {
                warn!(endpoint = %self.dialer.endpoint(), %cause, "feedback connection error");
                emit_error(bus, ChannelErrorKind::Transport, cause);
            }
            ConnectionEvent::Timeout => {
                debug!(endpoint = %self.dialer.endpoint(), "feedback timeout, resetting");
                self.link = Link::Disconnected { reconnect: None };
            }
            ConnectionEvent::Drain => {}
        }
    }
}

fn emit_error(bus: &mut EventBus, kind: ChannelErrorKind, cause: impl Into<String>) {
    let err = ChannelError::new(ChannelKind::Feedback, kind, cause);
    let _ = bus.emit(&ClientEvent::Error(err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_feedback_record;
    use crate::events::EventKind;
    use crate::transport::{
        ConnectionPeer, ConnectionRequest, Endpoint, MemoryListener, MemoryTransport, TlsConfig,
    };
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    fn channel() -> (FeedbackChannel, MemoryListener) {
        let (transport, listener) = MemoryTransport::new();
        let dialer = Dialer::new(Arc::new(transport), Endpoint::new("fb", 2196), TlsConfig::default());
        (FeedbackChannel::new(dialer, DEFAULT_RECONNECT_DELAY), listener)
    }

    fn recording_bus() -> (EventBus, Arc<Mutex<Vec<ClientEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        for kind in [EventKind::Error, EventKind::Feedback] {
            let seen = Arc::clone(&seen);
            let _ = bus.on(kind, Box::new(move |e: &ClientEvent| seen.lock().unwrap().push(e.clone())));
        }
        (bus, seen)
    }

    async fn accept(fb: &mut FeedbackChannel, listener: &mut MemoryListener, bus: &mut EventBus) -> ConnectionPeer {
        let (input, peer) = tokio::join!(fb.next_input(), async {
            listener.next_connect().await.unwrap().accept()
        });
        fb.handle(input, bus);
        peer
    }

    fn devices(seen: &Mutex<Vec<ClientEvent>>) -> Vec<String> {
        seen.lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Feedback(f) => Some(f.device.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (mut fb, _listener) = channel();
        assert!(fb.start());
        assert_eq!(fb.state(), ChannelState::Connecting);
        assert!(!fb.start());
    }

    #[tokio::test]
    async fn connect_disables_timeout() {
        let (mut fb, mut listener) = channel();
        let mut bus = EventBus::new();
        let _ = fb.start();
        let mut peer = accept(&mut fb, &mut listener, &mut bus).await;

        assert_eq!(fb.state(), ChannelState::Connected);
        assert_eq!(peer.recv().await, Some(ConnectionRequest::SetTimeout(None)));
    }

    #[tokio::test]
    async fn records_split_across_reads_are_reassembled() {
        let (mut fb, mut listener) = channel();
        let (mut bus, seen) = recording_bus();
        let _ = fb.start();
        let _peer = accept(&mut fb, &mut listener, &mut bus).await;

        let mut stream = encode_feedback_record(100, &[0x11; 32]).unwrap().to_vec();
        stream.extend_from_slice(&encode_feedback_record(200, &[0x22; 32]).unwrap());
        let (head, tail) = stream.split_at(45);

        fb.handle(FeedbackInput::Event(ConnectionEvent::Read(Bytes::copy_from_slice(head))), &mut bus);
        assert_eq!(devices(&seen), vec!["11".repeat(32)]);

        fb.handle(FeedbackInput::Event(ConnectionEvent::Read(Bytes::copy_from_slice(tail))), &mut bus);
        assert_eq!(devices(&seen), vec!["11".repeat(32), "22".repeat(32)]);

        let ClientEvent::Feedback(first) = &seen.lock().unwrap()[0] else { panic!() };
        assert_eq!(first.timestamp.timestamp(), 100);
    }

    #[tokio::test]
    async fn connect_failure_reports_without_retry() {
        let (mut fb, mut listener) = channel();
        let (mut bus, seen) = recording_bus();
        let _ = fb.start();
        let (input, ()) = tokio::join!(fb.next_input(), async {
            listener.next_connect().await.unwrap().refuse("refused");
        });
        fb.handle(input, &mut bus);

        assert_eq!(fb.state(), ChannelState::Disconnected);
        assert!(!fb.reconnect_pending());
        let seen = seen.lock().unwrap();
        let ClientEvent::Error(err) = &seen[0] else { panic!("expected error") };
        assert!(err.to_string().starts_with("feedback: "));
    }

    #[tokio::test(start_paused = true)]
    async fn close_schedules_reconnect_after_delay() {
        let (mut fb, mut listener) = channel();
        let mut bus = EventBus::new();
        let _ = fb.start();
        let peer = accept(&mut fb, &mut listener, &mut bus).await;

        fb.handle(FeedbackInput::Event(ConnectionEvent::Close), &mut bus);
        assert!(peer.is_released());
        assert!(fb.reconnect_pending());

        let started = tokio::time::Instant::now();
        let input = fb.next_input().await;
        assert!(matches!(input, FeedbackInput::ReconnectDue));
        assert!(started.elapsed() >= DEFAULT_RECONNECT_DELAY);

        fb.handle(input, &mut bus);
        assert_eq!(fb.state(), ChannelState::Connecting);
        let mut peer = accept(&mut fb, &mut listener, &mut bus).await;
        assert_eq!(peer.recv().await, Some(ConnectionRequest::SetTimeout(None)));
    }

    #[tokio::test]
    async fn error_reports_but_keeps_connection() {
        let (mut fb, mut listener) = channel();
        let (mut bus, seen) = recording_bus();
        let _ = fb.start();
        let _peer = accept(&mut fb, &mut listener, &mut bus).await;

        fb.handle(FeedbackInput::Event(ConnectionEvent::Error("reset".into())), &mut bus);
        assert_eq!(fb.state(), ChannelState::Connected);
        let ClientEvent::Error(err) = &seen.lock().unwrap()[0] else { panic!() };
        assert_eq!(err.to_string(), "feedback: reset");
    }

    #[tokio::test]
    async fn timeout_resets_silently() {
        let (mut fb, mut listener) = channel();
        let (mut bus, seen) = recording_bus();
        let _ = fb.start();
        let peer = accept(&mut fb, &mut listener, &mut bus).await;

        fb.handle(FeedbackInput::Event(ConnectionEvent::Timeout), &mut bus);
        assert_eq!(fb.state(), ChannelState::Disconnected);
        assert!(!fb.reconnect_pending());
        assert!(peer.is_released());
        assert!(seen.lock().unwrap().is_empty());
    }
}
