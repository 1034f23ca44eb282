//! Key directory documents and fixed-length key material.

use crate::error::ValidationError;
use crate::ids::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte public key (identity key, signed prekey or one-time prekey).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Number of hex characters in the encoded form.
    pub const HEX_LEN: usize = 64;

    /// Wrap raw bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse exactly 64 hex characters (either case).
    pub fn from_hex(field: &'static str, s: &str) -> Result<Self, ValidationError> {
        decode_fixed::<32>(field, s).map(Self)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, the canonical stored form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}..)", &self.to_hex()[..8])
    }
}

/// A 64-byte signature over the signed prekey.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Number of hex characters in the encoded form.
    pub const HEX_LEN: usize = 128;

    /// Wrap raw bytes.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Parse exactly 128 hex characters (either case).
    pub fn from_hex(field: &'static str, s: &str) -> Result<Self, ValidationError> {
        decode_fixed::<64>(field, s).map(Self)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Lowercase hex, the canonical stored form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({}..)", &self.to_hex()[..8])
    }
}

fn decode_fixed<const N: usize>(field: &'static str, s: &str) -> Result<[u8; N], ValidationError> {
    if s.len() != N * 2 {
        return Err(ValidationError::HexLength {
            field,
            expected: N * 2,
            actual: s.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).map_err(|_| ValidationError::NotHex { field })?;
    Ok(out)
}

/// Body of `POST /keys/upload`.
///
/// Fields arrive as hex strings; [`UploadBundle::validate`] turns them into typed material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadBundle {
    /// Account name.
    pub user_id: String,
    /// 64 hex chars.
    pub identity_key: String,
    /// 64 hex chars.
    pub signed_pre_key: String,
    /// 128 hex chars.
    pub signed_pre_key_sig: String,
    /// One-time prekeys to append to the pool, 64 hex chars each.
    #[serde(default)]
    pub one_time_pre_keys: Vec<String>,
}

/// An upload whose fixed fields have passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    /// Account name.
    pub user_id: UserId,
    /// Long-term identity key; doubles as the Ed25519 verifying key.
    pub identity_key: PublicKey,
    /// Current signed prekey.
    pub signed_pre_key: PublicKey,
    /// Signature of `signed_pre_key` by `identity_key`.
    pub signature: SignatureBytes,
    /// Well-formed one-time prekeys, in submission order.
    pub one_time_keys: Vec<PublicKey>,
    /// How many submitted one-time prekeys were malformed and dropped.
    pub skipped_one_time_keys: usize,
}

impl UploadBundle {
    /// Check user_id format and every fixed-length field.
    ///
    /// Malformed one-time prekeys are dropped and counted rather than failing the upload.
    pub fn validate(&self) -> Result<ValidatedUpload, ValidationError> {
        let user_id = UserId::parse(&self.user_id)?;
        let identity_key = PublicKey::from_hex("identity_key", &self.identity_key)?;
        let signed_pre_key = PublicKey::from_hex("signed_pre_key", &self.signed_pre_key)?;
        let signature = SignatureBytes::from_hex("signed_pre_key_sig", &self.signed_pre_key_sig)?;

        let mut one_time_keys = Vec::with_capacity(self.one_time_pre_keys.len());
        let mut skipped = 0;
        for raw in &self.one_time_pre_keys {
            match PublicKey::from_hex("one_time_pre_key", raw) {
                Ok(key) => one_time_keys.push(key),
                Err(_) => skipped += 1,
            }
        }

        Ok(ValidatedUpload {
            user_id,
            identity_key,
            signed_pre_key,
            signature,
            one_time_keys,
            skipped_one_time_keys: skipped,
        })
    }
}

/// Body of a successful `GET /keys/{user_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrekeyBundle {
    /// Pinned identity key.
    pub identity_key: String,
    /// Current signed prekey.
    pub signed_pre_key: String,
    /// Signature over the signed prekey.
    pub signed_pre_key_sig: String,
    /// One consumed one-time prekey, or null once the pool is exhausted.
    #[serde(default)]
    pub one_time_pre_key: Option<String>,
}

/// Body of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Always `"ok"`.
    pub status: String,
    /// Human-readable confirmation.
    pub message: String,
    /// Number of one-time prekeys appended to the pool.
    pub one_time_keys_added: usize,
}

impl UploadReceipt {
    /// Receipt for a stored upload.
    pub fn stored(user_id: &UserId, one_time_keys_added: usize) -> Self {
        Self {
            status: "ok".to_string(),
            message: format!("Keys stored for {user_id}"),
            one_time_keys_added,
        }
    }
}

/// Body of `GET /keys/{user_id}/one-time-count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeKeyCount {
    /// Account name.
    pub user_id: String,
    /// One-time prekeys left in the pool.
    pub remaining: u64,
}

/// Body of every non-2xx key directory response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// What went wrong.
    pub detail: String,
}
