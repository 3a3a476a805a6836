//! Error types.
//!
//! Synchronous caller errors are [`ApnError`]; they are returned directly from
//! `send`. Everything that goes wrong after a packet is queued surfaces as a
//! [`ChannelError`] through the `error` event instead.

use std::fmt;

use thiserror::Error;

/// Errors returned synchronously to the caller.
#[derive(Debug, Error)]
pub enum ApnError {
    /// Serialized JSON payload exceeds the 256-byte protocol limit.
    #[error("payload too long: {length} bytes (max {max})", max = crate::codec::MAX_PAYLOAD_LEN)]
    PayloadTooLong {
        /// Actual serialized length in bytes.
        length: usize,
    },
    /// Device token is not valid hex or has the wrong length.
    #[error("invalid device token: {reason}")]
    InvalidToken {
        /// What was wrong with it.
        reason: String,
    },
    /// A send option had the wrong type or range.
    #[error("invalid option `{key}`: {reason}")]
    InvalidOption {
        /// Option key.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
    /// JSON serialization failed.
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The client driver is no longer running.
    #[error("client is shut down")]
    ClientClosed,
}

/// Result type for caller-facing operations.
pub type Result<T> = std::result::Result<T, ApnError>;

/// Errors produced by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect to {endpoint} failed: {reason}")]
    Connect {
        /// `host:port` that was dialed.
        endpoint: String,
        /// Error description.
        reason: String,
    },
    /// The connect attempt did not finish in time.
    #[error("connect to {endpoint} timed out")]
    ConnectTimeout {
        /// `host:port` that was dialed.
        endpoint: String,
    },
    /// The connection is gone; nothing can be written to it.
    #[error("connection closed")]
    Closed,
}

/// Errors loading a [`ClientConfig`](crate::config::ClientConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file from disk.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the config file.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which of the two protocol channels an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Outbound notification delivery.
    Gateway,
    /// Inbound rejected-token stream.
    Feedback,
}

impl ChannelKind {
    /// Lowercase channel name used as the error prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gateway => "gateway",
            Self::Feedback => "feedback",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure category of a [`ChannelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelErrorKind {
    /// Transport failed to establish the channel.
    Connect,
    /// An established connection reported a runtime fault.
    Transport,
    /// The idle timeout fired on an established connection.
    Timeout,
}

/// A recoverable channel failure, delivered through the `error` event.
///
/// Displays as `"<channel>: <cause>"`, e.g. `gateway: connection refused`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{channel}: {cause}")]
pub struct ChannelError {
    /// Channel the failure happened on.
    pub channel: ChannelKind,
    /// Failure category.
    pub kind: ChannelErrorKind,
    /// Human-readable cause.
    pub cause: String,
}

impl ChannelError {
    pub(crate) fn new(channel: ChannelKind, kind: ChannelErrorKind, cause: impl Into<String>) -> Self {
        Self {
            channel,
            kind,
            cause: cause.into(),
        }
    }
}
