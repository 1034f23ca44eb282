//! Storage layer for the key directory.
//!
//! Provides prekey bundle storage with trust-on-first-use identity pinning
//! and a single-use one-time prekey pool.

mod sqlite;

pub use sqlite::SqliteKeyStore;

use crate::error::StorageResult;
use async_trait::async_trait;
use courier_types::{UserId, ValidatedUpload};

/// Result of writing an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Bundle upserted and one-time prekeys appended.
    Stored {
        /// Number of one-time prekeys added to the pool.
        one_time_keys_added: usize,
    },
    /// The user_id is pinned to a different identity key; nothing was written.
    IdentityConflict,
}

/// A bundle as read back for a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBundle {
    /// Pinned identity key (lowercase hex).
    pub identity_key: String,
    /// Current signed prekey (lowercase hex).
    pub signed_pre_key: String,
    /// Signature over the signed prekey (lowercase hex).
    pub signed_pre_key_sig: String,
    /// The one-time prekey consumed by this fetch, if the pool had one.
    pub one_time_pre_key: Option<String>,
}

/// Trait for key directory storage backends.
///
/// Each method is one transaction: it commits fully or leaves nothing behind.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Pin-or-match the identity key, upsert the signed prekey and append
    /// one-time prekeys.
    async fn store_upload(&self, upload: &ValidatedUpload) -> StorageResult<UploadOutcome>;

    /// Read the bundle for `user_id`, consuming the oldest one-time prekey.
    ///
    /// Returns `None` if no bundle exists; in that case nothing is consumed.
    async fn take_bundle(&self, user_id: &UserId) -> StorageResult<Option<StoredBundle>>;

    /// Count the one-time prekeys left for `user_id`.
    ///
    /// Returns `None` if no bundle exists.
    async fn one_time_key_count(&self, user_id: &UserId) -> StorageResult<Option<u64>>;
}
