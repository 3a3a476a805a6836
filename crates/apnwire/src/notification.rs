//! Notification value types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec;
use crate::errors::{ApnError, Result};
use crate::token::DeviceToken;

/// Per-send options: badge, sound, and any custom keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Badge count shown on the app icon.
    #[serde(default)]
    pub badge: u32,
    /// Sound file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    /// Custom key/value pairs, sent under the payload's `custom` key.
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

impl SendOptions {
    /// Build options from a loose JSON object.
    ///
    /// `badge` must be a non-negative integer that fits in a `u32` and
    /// `sound` a string; every other key is folded into `custom`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(ApnError::InvalidOption {
                key: "options".to_string(),
                reason: "expected a JSON object".to_string(),
            });
        };

        let badge = match map.remove("badge") {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| ApnError::InvalidOption {
                    key: "badge".to_string(),
                    reason: format!("expected a non-negative integer, got {v}"),
                })?,
        };

        let sound = match map.remove("sound") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => {
                return Err(ApnError::InvalidOption {
                    key: "sound".to_string(),
                    reason: format!("expected a string, got {other}"),
                });
            }
        };

        Ok(Self {
            badge,
            sound,
            custom: map,
        })
    }

    /// Set the badge count.
    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = badge;
        self
    }

    /// Set the sound name.
    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    /// Add a custom key.
    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.custom.insert(key.into(), value);
        self
    }
}

/// A notification addressed to one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Target device.
    pub token: DeviceToken,
    /// Alert text.
    pub alert: String,
    /// Badge, sound and custom data.
    pub options: SendOptions,
}

impl Notification {
    /// Create a notification from a hex device token.
    pub fn new(token: &str, alert: impl Into<String>, options: SendOptions) -> Result<Self> {
        Ok(Self {
            token: DeviceToken::parse(token)?,
            alert: alert.into(),
            options,
        })
    }

    /// Encode into a gateway packet, enforcing the payload size limit.
    pub fn encode(&self) -> Result<Bytes> {
        codec::encode_packet(
            &self.token,
            &self.alert,
            self.options.badge,
            self.options.sound.as_deref(),
            &self.options.custom,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOKEN: &str = "c9d4a07cfbbc21d6ef87a47d53e169831096a5d5faa15b7556f59ddda715dff4";

    #[test]
    fn from_value_folds_unknown_keys_into_custom() {
        let opts = SendOptions::from_value(json!({
            "badge": 3,
            "sound": "default",
            "threadId": "abc",
            "n": 1
        }))
        .unwrap();
        assert_eq!(opts.badge, 3);
        assert_eq!(opts.sound.as_deref(), Some("default"));
        assert_eq!(opts.custom.len(), 2);
        assert_eq!(opts.custom["threadId"], "abc");
    }

    #[test]
    fn from_value_defaults() {
        let opts = SendOptions::from_value(json!({})).unwrap();
        assert_eq!(opts, SendOptions::default());
    }

    #[test]
    fn negative_badge_rejected() {
        let err = SendOptions::from_value(json!({"badge": -1})).unwrap_err();
        assert!(matches!(err, ApnError::InvalidOption { ref key, .. } if key == "badge"));
    }

    #[test]
    fn fractional_badge_rejected() {
        assert!(SendOptions::from_value(json!({"badge": 1.5})).is_err());
    }

    #[test]
    fn non_string_sound_rejected() {
        let err = SendOptions::from_value(json!({"sound": 5})).unwrap_err();
        assert!(matches!(err, ApnError::InvalidOption { ref key, .. } if key == "sound"));
    }

    #[test]
    fn non_object_rejected() {
        assert!(SendOptions::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn serde_flattens_custom() {
        let opts: SendOptions = serde_json::from_value(json!({"badge": 1, "extra": true})).unwrap();
        assert_eq!(opts.badge, 1);
        assert_eq!(opts.custom["extra"], true);
    }

    #[test]
    fn encode_uses_options() {
        let n = Notification::new(
            TOKEN,
            "hello",
            SendOptions::default().with_badge(4).with_custom("k", json!("v")),
        )
        .unwrap();
        let packet = n.encode().unwrap();
        let payload: Value = serde_json::from_slice(&packet[37..]).unwrap();
        assert_eq!(payload, json!({"aps": {"alert": "hello", "badge": 4}, "custom": {"k": "v"}}));
    }
}
