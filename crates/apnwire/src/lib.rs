//! # apnwire
//!
//! Client for the legacy binary push-notification protocol.
//!
//! Two long-lived connections are managed behind one handle:
//!
//! - **Gateway** (port 2195): outbound notifications in the simple binary
//!   framing. Packets queue while the connection is down and flush in order
//!   once it is up.
//! - **Feedback** (port 2196): inbound stream of 38-byte records naming
//!   device tokens the service rejected. Reconnects five seconds after the
//!   server closes it.
//!
//! # Key Types
//!
//! - [`ApnClient`]: the handle; `send`, `on`/`once`/`off`, `start_feedback_listener`
//! - [`SendOptions`]: badge, sound and custom payload keys
//! - [`ClientEvent`]: `error`, `drain` and `feedback` notifications
//! - [`Transport`]: connection factory; [`TcpTransport`] and [`MemoryTransport`] are bundled
//! - [`codec`]: packet encoding and feedback decoding, usable on their own
//!
//! TLS is not performed here. The certificate and key paths in
//! [`ClientConfig`] are handed to the transport untouched.

#![deny(unsafe_code)]

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod notification;
pub mod queue;
pub mod token;
pub mod transport;

pub use client::{ApnClient, ClientStatus, Delivery};
pub use codec::{FeedbackRecord, decode_feedback_records, encode_notification};
pub use config::{ClientConfig, Environment};
pub use errors::{ApnError, ChannelError, ChannelErrorKind, ChannelKind, Result, TransportError};
pub use events::{ClientEvent, EventKind, FeedbackEvent, SubscriptionId};
pub use notification::{Notification, SendOptions};
pub use token::DeviceToken;
pub use transport::{MemoryTransport, TcpTransport, Transport};
