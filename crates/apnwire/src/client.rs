//! Client handle and the driver task behind it.
//!
//! [`ApnClient`] is a thin handle: it encodes notifications on the caller's
//! thread (so size and token errors come back synchronously) and forwards
//! everything else as commands to a single driver task. The driver owns the
//! gateway channel, the feedback channel and the event bus, and is the only
//! code that mutates them.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelState, Dialer, FeedbackChannel, GatewayChannel};
use crate::config::ClientConfig;
use crate::errors::{ApnError, Result};
use crate::events::{ClientEvent, EventBus, EventKind, Observer, SubscriptionId};
use crate::notification::{Notification, SendOptions};
use crate::transport::{TcpTransport, Transport};

enum Command {
    Send {
        packet: Bytes,
        completion: oneshot::Sender<()>,
    },
    Subscribe {
        id: SubscriptionId,
        kind: EventKind,
        once: bool,
        observer: Observer,
    },
    Unsubscribe(SubscriptionId),
    StartFeedback,
    Status(oneshot::Sender<ClientStatus>),
}

/// Snapshot of both channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStatus {
    /// Gateway connection state.
    pub gateway: ChannelState,
    /// Packets waiting for the gateway connection.
    pub queued: usize,
    /// Feedback connection state.
    pub feedback: ChannelState,
    /// Whether a feedback reconnect is scheduled.
    pub feedback_reconnect_pending: bool,
}

/// Resolves once the gateway drains after the corresponding `send`.
///
/// Completion means the packet was handed to the transport; the protocol
/// has no delivery acknowledgement. Resolves to
/// [`ApnError::ClientClosed`] if the client shuts down first.
#[derive(Debug)]
pub struct Delivery {
    rx: oneshot::Receiver<()>,
}

impl Future for Delivery {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| ApnError::ClientClosed))
    }
}

/// Push-notification client for the gateway and feedback services.
///
/// Dropping the client tears down both connections and any pending
/// feedback reconnect.
#[derive(Debug)]
pub struct ApnClient {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    driver: JoinHandle<()>,
}

impl ApnClient {
    /// Create a client over `transport`, spawning its driver on `runtime`.
    pub fn new(config: &ClientConfig, transport: impl Transport, runtime: &Handle) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let tls = config.tls();

        let gateway = GatewayChannel::new(
            Dialer::new(Arc::clone(&transport), config.gateway_endpoint(), tls.clone()),
            config.gateway_idle_timeout(),
        );
        let feedback = FeedbackChannel::new(
            Dialer::new(transport, config.feedback_endpoint(), tls),
            config.reconnect_delay(),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let driver = Driver {
            commands: rx,
            gateway,
            feedback,
            bus: EventBus::new(),
            shutdown: shutdown.clone(),
        };

        info!(
            environment = ?config.environment,
            gateway = %config.gateway_endpoint(),
            feedback = %config.feedback_endpoint(),
            "apnwire client created"
        );

        Self {
            commands: tx,
            next_id: AtomicU64::new(1),
            shutdown,
            driver: runtime.spawn(driver.run()),
        }
    }

    /// Create a client over the bundled TCP transport.
    pub fn with_tcp(config: &ClientConfig, runtime: &Handle) -> Self {
        Self::new(config, TcpTransport::new(config.connect_timeout()), runtime)
    }

    /// Queue a notification for `device_token`.
    ///
    /// Token and payload-size errors are returned here and nothing is
    /// queued. Later failures arrive through the `error` event.
    pub fn send(&self, device_token: &str, alert: &str, options: SendOptions) -> Result<Delivery> {
        let notification = Notification::new(device_token, alert, options).inspect_err(|e| {
            ::metrics::counter!(crate::metrics::NOTIFICATIONS_REJECTED_TOTAL, "reason" => "token").increment(1);
            warn!(error = %e, "rejected notification");
        })?;
        self.send_notification(&notification)
    }

    /// Queue an already-built notification.
    pub fn send_notification(&self, notification: &Notification) -> Result<Delivery> {
        let packet = notification.encode().inspect_err(|e| {
            ::metrics::counter!(crate::metrics::NOTIFICATIONS_REJECTED_TOTAL, "reason" => "payload").increment(1);
            warn!(error = %e, token = ?notification.token, "rejected notification");
        })?;

        let (completion, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { packet, completion })
            .map_err(|_| ApnError::ClientClosed)?;
        ::metrics::counter!(crate::metrics::NOTIFICATIONS_ACCEPTED_TOTAL).increment(1);
        debug!(token = ?notification.token, "notification queued");
        Ok(Delivery { rx })
    }

    /// Register a persistent observer.
    pub fn on(&self, kind: EventKind, observer: impl FnMut(&ClientEvent) + Send + 'static) -> SubscriptionId {
        self.subscribe(kind, false, Box::new(observer))
    }

    /// Register an observer for the next occurrence only.
    pub fn once(&self, kind: EventKind, observer: impl FnMut(&ClientEvent) + Send + 'static) -> SubscriptionId {
        self.subscribe(kind, true, Box::new(observer))
    }

    /// Remove an observer.
    pub fn off(&self, id: SubscriptionId) {
        let _ = self.commands.send(Command::Unsubscribe(id));
    }

    /// Open the feedback connection. Only the first call has an effect.
    pub fn start_feedback_listener(&self) {
        let _ = self.commands.send(Command::StartFeedback);
    }

    /// Current state of both channels.
    pub async fn status(&self) -> Result<ClientStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status(tx))
            .map_err(|_| ApnError::ClientClosed)?;
        rx.await.map_err(|_| ApnError::ClientClosed)
    }

    /// Stop the driver and release every connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether the driver task has exited.
    pub fn is_closed(&self) -> bool {
        self.driver.is_finished()
    }

    fn subscribe(&self, kind: EventKind, once: bool, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let _ = self.commands.send(Command::Subscribe {
            id,
            kind,
            once,
            observer,
        });
        id
    }
}

impl Drop for ApnClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Driver {
    commands: mpsc::UnboundedReceiver<Command>,
    gateway: GatewayChannel,
    feedback: FeedbackChannel,
    bus: EventBus,
    shutdown: CancellationToken,
}

impl Driver {
    #[tracing::instrument(skip_all, name = "apnwire_driver")]
    async fn run(mut self) {
        loop {
            // Transport input that is already waiting is applied before the
            // next command, so commands always see current channel state.
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                input = self.gateway.next_input() => self.gateway.handle(input, &mut self.bus),
                input = self.feedback.next_input() => self.feedback.handle(input, &mut self.bus),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }
        info!(queued = self.gateway.queued(), "apnwire driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { packet, completion } => {
                let mut completion = Some(completion);
                let _ = self.bus.once(
                    EventKind::Drain,
                    Box::new(move |_| {
                        if let Some(tx) = completion.take() {
                            let _ = tx.send(());
                        }
                    }),
                );
                self.gateway.send(packet, &mut self.bus);
            }
            Command::Subscribe {
                id,
                kind,
                once,
                observer,
            } => self.bus.insert(kind, id, once, observer),
            Command::Unsubscribe(id) => {
                let _ = self.bus.off(id);
            }
            Command::StartFeedback => {
                if self.feedback.start() {
                    info!("feedback listener started");
                }
            }
            Command::Status(reply) => {
                let _ = reply.send(ClientStatus {
                    gateway: self.gateway.state(),
                    queued: self.gateway.queued(),
                    feedback: self.feedback.state(),
                    feedback_reconnect_pending: self.feedback.reconnect_pending(),
                });
            }
        }
    }
}
