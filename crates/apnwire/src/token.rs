//! Device token parsing.

use std::fmt;
use std::str::FromStr;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};

use crate::errors::ApnError;

/// Length in bytes of a gateway device token.
pub const DEVICE_TOKEN_LEN: usize = 32;

/// A decoded gateway device token.
///
/// Parsed from hex; any embedded whitespace is ignored and digits are
/// case-insensitive. Displays as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceToken([u8; DEVICE_TOKEN_LEN]);

impl DeviceToken {
    /// Parse a hex token such as `"c9d4a07c fbbc21d6 ..."`.
    pub fn parse(hex: &str) -> Result<Self, ApnError> {
        let compact: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
        let raw = HEXLOWER_PERMISSIVE
            .decode(compact.as_bytes())
            .map_err(|e| ApnError::InvalidToken {
                reason: e.to_string(),
            })?;
        let bytes: [u8; DEVICE_TOKEN_LEN] =
            raw.try_into().map_err(|raw: Vec<u8>| ApnError::InvalidToken {
                reason: format!("expected {DEVICE_TOKEN_LEN} bytes, got {}", raw.len()),
            })?;
        Ok(Self(bytes))
    }

    /// Raw token bytes.
    pub fn as_bytes(&self) -> &[u8; DEVICE_TOKEN_LEN] {
        &self.0
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }
}

impl FromStr for DeviceToken {
    type Err = ApnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tokens identify a user's device; keep logs to a prefix.
        let hex = self.to_hex();
        write!(f, "DeviceToken({}…)", &hex[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACED: &str =
        "c9d4a07c fbbc21d6 ef87a47d 53e16983 1096a5d5 faa15b75 56f59ddd a715dff4";
    const COMPACT: &str = "c9d4a07cfbbc21d6ef87a47d53e169831096a5d5faa15b7556f59ddda715dff4";

    #[test]
    fn whitespace_is_ignored() {
        let a = DeviceToken::parse(SPACED).unwrap();
        let b = DeviceToken::parse(COMPACT).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_hex(), COMPACT);
    }

    #[test]
    fn whitespace_in_any_position() {
        let weird = format!("\t{}\n {} ", &COMPACT[..3], &COMPACT[3..]);
        let token = DeviceToken::parse(&weird).unwrap();
        assert_eq!(token.to_hex(), COMPACT);
    }

    #[test]
    fn uppercase_hex_accepted() {
        let token = DeviceToken::parse(&COMPACT.to_uppercase()).unwrap();
        assert_eq!(token.to_hex(), COMPACT);
    }

    #[test]
    fn first_bytes_decoded() {
        let token = DeviceToken::parse(SPACED).unwrap();
        assert_eq!(&token.as_bytes()[..4], &[0xc9, 0xd4, 0xa0, 0x7c]);
    }

    #[test]
    fn short_token_rejected() {
        let err = DeviceToken::parse("c9d4a07c").unwrap_err();
        assert!(matches!(err, ApnError::InvalidToken { .. }));
        assert!(err.to_string().contains("got 4"));
    }

    #[test]
    fn non_hex_rejected() {
        let bad = COMPACT.replace('c', "z");
        assert!(matches!(
            DeviceToken::parse(&bad),
            Err(ApnError::InvalidToken { .. })
        ));
    }

    #[test]
    fn odd_length_rejected() {
        assert!(DeviceToken::parse(&COMPACT[1..]).is_err());
    }

    #[test]
    fn debug_is_truncated() {
        let token: DeviceToken = COMPACT.parse().unwrap();
        assert_eq!(format!("{token:?}"), "DeviceToken(c9d4a07c…)");
    }
}
