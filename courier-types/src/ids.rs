//! Addressing types for courier.

use crate::error::ValidationError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of an [`Identity`] on the wire.
pub const IDENTITY_LEN: usize = 32;

/// A participant's long-term public key, used as its mailbox address.
///
/// 32 opaque bytes, displayed as URL-safe base64. The relay never interprets
/// the bytes; it only compares them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity([u8; IDENTITY_LEN]);

impl Identity {
    /// The all-zero sentinel recorded as sender when an unregistered connection sends.
    pub const ANONYMOUS: Identity = Identity([0u8; IDENTITY_LEN]);

    /// Create a new random Identity (for testing).
    pub fn random() -> Self {
        let mut bytes = [0u8; IDENTITY_LEN];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Wrap a fixed-size array.
    pub const fn new(bytes: [u8; IDENTITY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create an Identity from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == IDENTITY_LEN {
            let mut arr = [0u8; IDENTITY_LEN];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw bytes of this Identity.
    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// True for the anonymous-sender sentinel.
    pub fn is_anonymous(&self) -> bool {
        self.0 == [0u8; IDENTITY_LEN]
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", &self.to_string()[..8])
    }
}

/// Minimum user_id length.
pub const USER_ID_MIN_LEN: usize = 3;
/// Maximum user_id length.
pub const USER_ID_MAX_LEN: usize = 32;

/// A key directory account name.
///
/// Always matches `^[A-Za-z0-9_-]{3,32}$`; the only way to build one is [`UserId::parse`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap a user_id.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let len_ok = (USER_ID_MIN_LEN..=USER_ID_MAX_LEN).contains(&raw.len());
        let chars_ok = raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if len_ok && chars_ok {
            Ok(Self(raw.to_string()))
        } else {
            Err(ValidationError::InvalidUserId)
        }
    }

    /// The validated string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        UserId::parse(&raw).map_err(serde::de::Error::custom)
    }
}
