//! Metric names recorded through the `metrics` facade.
//!
//! The library only records; installing an exporter is up to the application.

/// Notifications accepted by `send` (counter).
pub const NOTIFICATIONS_ACCEPTED_TOTAL: &str = "apnwire_notifications_accepted_total";
/// Notifications rejected by `send` before queueing (counter, labels: reason).
pub const NOTIFICATIONS_REJECTED_TOTAL: &str = "apnwire_notifications_rejected_total";
/// Packets handed to the gateway transport (counter).
pub const PACKETS_WRITTEN_TOTAL: &str = "apnwire_packets_written_total";
/// Connect attempts (counter, labels: channel).
pub const CONNECT_ATTEMPTS_TOTAL: &str = "apnwire_connect_attempts_total";
/// Failed connect attempts (counter, labels: channel).
pub const CONNECT_FAILURES_TOTAL: &str = "apnwire_connect_failures_total";
/// Feedback records decoded (counter).
pub const FEEDBACK_RECORDS_TOTAL: &str = "apnwire_feedback_records_total";
/// Scheduled feedback reconnects (counter).
pub const FEEDBACK_RECONNECTS_TOTAL: &str = "apnwire_feedback_reconnects_total";
