//! Wire format for the gateway and feedback channels.
//!
//! Gateway packet (one per notification, big-endian):
//!
//! | offset | size | field                     |
//! |--------|------|---------------------------|
//! | 0      | 1    | command = 0               |
//! | 1      | 2    | token length = 32         |
//! | 3      | 32   | raw device token          |
//! | 35     | 2    | payload length (<= 256)   |
//! | 37     | n    | JSON payload              |
//!
//! Feedback record (streamed back to back, no delimiter):
//! `u32` timestamp, `u16` token length, token bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{ApnError, Result};
use crate::token::{DEVICE_TOKEN_LEN, DeviceToken};

/// Maximum serialized JSON payload size in bytes.
pub const MAX_PAYLOAD_LEN: usize = 256;

/// Command byte of a simple-format notification.
pub const COMMAND_SIMPLE: u8 = 0;

/// Size of the fixed feedback record header (timestamp + token length).
pub const FEEDBACK_HEADER_LEN: usize = 6;

const PACKET_HEADER_LEN: usize = 1 + 2 + DEVICE_TOKEN_LEN + 2;

#[derive(Serialize)]
struct Payload<'a> {
    aps: Aps<'a>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    custom: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct Aps<'a> {
    alert: &'a str,
    badge: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<&'a str>,
}

/// Encode one notification into a gateway packet.
///
/// The token is hex with optional embedded whitespace. Fails with
/// [`ApnError::PayloadTooLong`] when the JSON payload exceeds
/// [`MAX_PAYLOAD_LEN`]; nothing is produced in that case.
pub fn encode_notification(
    token: &str,
    alert: &str,
    badge: u32,
    sound: Option<&str>,
    custom: &Map<String, Value>,
) -> Result<Bytes> {
    let token = DeviceToken::parse(token)?;
    encode_packet(&token, alert, badge, sound, custom)
}

pub(crate) fn encode_packet(
    token: &DeviceToken,
    alert: &str,
    badge: u32,
    sound: Option<&str>,
    custom: &Map<String, Value>,
) -> Result<Bytes> {
    let payload = serde_json::to_vec(&Payload {
        aps: Aps {
            alert,
            badge,
            sound: sound.filter(|s| !s.is_empty()),
        },
        custom,
    })?;

    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ApnError::PayloadTooLong {
            length: payload.len(),
        });
    }

    let mut packet = BytesMut::with_capacity(PACKET_HEADER_LEN + payload.len());
    packet.put_u8(COMMAND_SIMPLE);
    packet.put_u16(DEVICE_TOKEN_LEN as u16);
    packet.put_slice(token.as_bytes());
    packet.put_u16(payload.len() as u16);
    packet.put_slice(&payload);
    Ok(packet.freeze())
}

/// One rejected-token report from the feedback channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRecord {
    /// Seconds since the Unix epoch at which the device rejected a notification.
    pub timestamp: u32,
    /// Raw device token bytes.
    pub token: Bytes,
}

impl FeedbackRecord {
    /// Token as lowercase hex.
    pub fn device_hex(&self) -> String {
        HEXLOWER.encode(&self.token)
    }

    /// Timestamp as a UTC date-time.
    pub fn rejected_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0).unwrap_or_default()
    }
}

/// Peel every complete feedback record off the front of `buffer`.
///
/// Returns the decoded records in stream order and the unconsumed tail,
/// which the caller must prefix to the next read.
pub fn decode_feedback_records(buffer: &[u8]) -> (Vec<FeedbackRecord>, &[u8]) {
    let mut records = Vec::new();
    let mut rest = buffer;

    while rest.len() >= FEEDBACK_HEADER_LEN {
        let mut header = &rest[..FEEDBACK_HEADER_LEN];
        let timestamp = header.get_u32();
        let token_len = usize::from(header.get_u16());

        let record_len = FEEDBACK_HEADER_LEN + token_len;
        if rest.len() < record_len {
            break;
        }

        records.push(FeedbackRecord {
            timestamp,
            token: Bytes::copy_from_slice(&rest[FEEDBACK_HEADER_LEN..record_len]),
        });
        rest = &rest[record_len..];
    }

    (records, rest)
}

/// Encode a single feedback record, the inverse of [`decode_feedback_records`].
///
/// Fails with [`ApnError::InvalidToken`] when the token does not fit the
/// 16-bit length field.
pub fn encode_feedback_record(timestamp: u32, token: &[u8]) -> Result<Bytes> {
    let token_len = u16::try_from(token.len()).map_err(|_| ApnError::InvalidToken {
        reason: format!("{} bytes exceeds the {} byte record limit", token.len(), u16::MAX),
    })?;
    let mut out = BytesMut::with_capacity(FEEDBACK_HEADER_LEN + token.len());
    out.put_u32(timestamp);
    out.put_u16(token_len);
    out.put_slice(token);
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOKEN: &str =
        "c9d4a07c fbbc21d6 ef87a47d 53e16983 1096a5d5 faa15b75 56f59ddd a715dff4";

    fn payload_of(packet: &[u8]) -> &[u8] {
        let len = usize::from(u16::from_be_bytes([packet[35], packet[36]]));
        &packet[37..37 + len]
    }

    #[test]
    fn packet_layout() {
        let packet = encode_notification(TOKEN, "New cool stuff!", 2, None, &Map::new()).unwrap();
        let token = DeviceToken::parse(TOKEN).unwrap();

        assert_eq!(packet[0], 0x00);
        assert_eq!(&packet[1..3], &[0x00, 0x20]);
        assert_eq!(&packet[3..35], token.as_bytes());

        let json = br#"{"aps":{"alert":"New cool stuff!","badge":2}}"#;
        assert_eq!(u16::from_be_bytes([packet[35], packet[36]]) as usize, json.len());
        assert_eq!(payload_of(&packet), json);
        assert_eq!(packet.len(), 37 + json.len());
    }

    #[test]
    fn sound_and_custom_included() {
        let mut custom = Map::new();
        let _ = custom.insert("thread".to_string(), json!("t-1"));
        let packet = encode_notification(TOKEN, "hi", 0, Some("chime.aiff"), &custom).unwrap();

        let value: Value = serde_json::from_slice(payload_of(&packet)).unwrap();
        assert_eq!(
            value,
            json!({"aps": {"alert": "hi", "badge": 0, "sound": "chime.aiff"}, "custom": {"thread": "t-1"}})
        );
    }

    #[test]
    fn empty_sound_omitted() {
        let packet = encode_notification(TOKEN, "hi", 1, Some(""), &Map::new()).unwrap();
        assert_eq!(payload_of(&packet), br#"{"aps":{"alert":"hi","badge":1}}"#);
    }

    #[test]
    fn payload_length_field_matches_json_for_multibyte_alert() {
        let alert = "héllo wörld ✓";
        let packet = encode_notification(TOKEN, alert, 0, None, &Map::new()).unwrap();
        let expected = serde_json::to_vec(&json!({"aps": {"alert": alert, "badge": 0}})).unwrap();
        assert_eq!(payload_of(&packet).len(), expected.len());
    }

    #[test]
    fn exactly_max_payload_accepted() {
        // {"aps":{"alert":"","badge":0}} is 30 bytes.
        let alert = "a".repeat(MAX_PAYLOAD_LEN - 30);
        let packet = encode_notification(TOKEN, &alert, 0, None, &Map::new()).unwrap();
        assert_eq!(payload_of(&packet).len(), MAX_PAYLOAD_LEN);
    }

    #[test]
    fn over_max_payload_reports_exact_length() {
        let alert = "a".repeat(300);
        let err = encode_notification(TOKEN, &alert, 0, None, &Map::new()).unwrap_err();
        assert!(matches!(err, ApnError::PayloadTooLong { length: 330 }));
    }

    #[test]
    fn invalid_token_fails_before_payload() {
        let err = encode_notification("abc", "hi", 0, None, &Map::new()).unwrap_err();
        assert!(matches!(err, ApnError::InvalidToken { .. }));
    }

    #[test]
    fn decode_empty_buffer() {
        let (records, rest) = decode_feedback_records(&[]);
        assert!(records.is_empty());
        assert!(rest.is_empty());
    }

    #[test]
    fn decode_round_trip() {
        let token = [0xab; 32];
        let bytes = encode_feedback_record(1_300_000_000, &token).unwrap();
        let (records, rest) = decode_feedback_records(&bytes);
        assert!(rest.is_empty());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, 1_300_000_000);
        assert_eq!(&records[0].token[..], &token);
        assert_eq!(records[0].device_hex(), "ab".repeat(32));
    }

    #[test]
    fn oversized_record_token_rejected() {
        let token = vec![0u8; usize::from(u16::MAX) + 1];
        let err = encode_feedback_record(1, &token).unwrap_err();
        assert!(matches!(err, ApnError::InvalidToken { .. }));

        let max = vec![0u8; usize::from(u16::MAX)];
        let bytes = encode_feedback_record(1, &max).unwrap();
        assert_eq!(&bytes[4..6], &[0xff, 0xff]);
    }

    #[test]
    fn decode_keeps_partial_header() {
        let mut stream = encode_feedback_record(7, &[1, 2, 3]).unwrap().to_vec();
        stream.extend_from_slice(&[0, 0, 0]);
        let (records, rest) = decode_feedback_records(&stream);
        assert_eq!(records.len(), 1);
        assert_eq!(rest, &[0, 0, 0]);
    }

    #[test]
    fn decode_keeps_partial_token() {
        let full = encode_feedback_record(9, &[5; 32]).unwrap();
        let (records, rest) = decode_feedback_records(&full[..20]);
        assert!(records.is_empty());
        assert_eq!(rest, &full[..20]);
    }

    #[test]
    fn decode_is_chunking_independent() {
        let mut stream = Vec::new();
        for i in 0..5u8 {
            stream.extend_from_slice(&encode_feedback_record(1000 + u32::from(i), &[i; 32]).unwrap());
        }
        let (whole, rest) = decode_feedback_records(&stream);
        assert!(rest.is_empty());
        assert_eq!(whole.len(), 5);

        for chunk_size in [1, 3, 6, 7, 37, 50] {
            let mut carried = Vec::new();
            let mut pieced = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                carried.extend_from_slice(chunk);
                let (records, rest) = decode_feedback_records(&carried);
                pieced.extend(records);
                carried = rest.to_vec();
            }
            assert!(carried.is_empty(), "chunk size {chunk_size}");
            assert_eq!(pieced, whole, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn rejected_at_converts_epoch_seconds() {
        let record = FeedbackRecord {
            timestamp: 86_400,
            token: Bytes::from_static(&[1]),
        };
        assert_eq!(record.rejected_at().to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }
}
