//! Prekey directory: upload, fetch and pool inspection.
//!
//! Sits between the HTTP handlers and a [`KeyStore`]. Validation and
//! signature checks happen here; pinning and one-time prekey consumption
//! happen inside the store's transactions.

use crate::error::{DirectoryError, DirectoryResult};
use crate::storage::{KeyStore, UploadOutcome};
use courier_types::{
    OneTimeKeyCount, PrekeyBundle, PublicKey, SignatureBytes, UploadBundle, UploadReceipt, UserId,
};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::sync::Arc;

/// Prekey bundle directory.
#[derive(Clone)]
pub struct KeyDirectory {
    store: Arc<dyn KeyStore>,
    enforce_signatures: bool,
}

impl std::fmt::Debug for KeyDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDirectory")
            .field("enforce_signatures", &self.enforce_signatures)
            .finish_non_exhaustive()
    }
}

/// Check that `signature` is `identity_key`'s Ed25519 signature over the raw signed prekey bytes.
///
/// An identity key that is not a valid curve point fails the same way as a bad signature.
pub fn verify_signed_prekey(
    identity_key: &PublicKey,
    signed_pre_key: &PublicKey,
    signature: &SignatureBytes,
) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(identity_key.as_bytes()) else {
        return false;
    };
    let signature = Signature::from_bytes(signature.as_bytes());
    verifying_key
        .verify(signed_pre_key.as_bytes(), &signature)
        .is_ok()
}

impl KeyDirectory {
    /// Create a directory over `store`.
    pub fn new(store: Arc<dyn KeyStore>, enforce_signatures: bool) -> Self {
        Self {
            store,
            enforce_signatures,
        }
    }

    /// Whether uploads with a bad signed prekey signature are rejected.
    pub fn enforces_signatures(&self) -> bool {
        self.enforce_signatures
    }

    /// Validate, verify and store an uploaded bundle.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::Validation`] for malformed fields (nothing is stored)
    /// - [`DirectoryError::SignatureInvalid`] when enforcing and the signature fails
    /// - [`DirectoryError::IdentityConflict`] when the user_id is pinned to another key
    /// - [`DirectoryError::Storage`] when the transaction fails and rolls back
    pub async fn upload(&self, bundle: &UploadBundle) -> DirectoryResult<UploadReceipt> {
        let upload = bundle.validate()?;

        if upload.skipped_one_time_keys > 0 {
            tracing::debug!(
                "Skipping {} malformed one-time prekeys from {}",
                upload.skipped_one_time_keys,
                upload.user_id
            );
        }

        if !verify_signed_prekey(
            &upload.identity_key,
            &upload.signed_pre_key,
            &upload.signature,
        ) {
            if self.enforce_signatures {
                tracing::warn!(
                    "Rejected upload for {}: bad signed prekey signature",
                    upload.user_id
                );
                return Err(DirectoryError::SignatureInvalid);
            }
            tracing::warn!(
                "Accepting upload for {} with unverified signed prekey (enforcement disabled)",
                upload.user_id
            );
        }

        match self.store.store_upload(&upload).await? {
            UploadOutcome::Stored {
                one_time_keys_added,
            } => {
                tracing::info!(
                    "Stored bundle for {} ({} one-time prekeys added)",
                    upload.user_id,
                    one_time_keys_added
                );
                Ok(UploadReceipt::stored(&upload.user_id, one_time_keys_added))
            }
            UploadOutcome::IdentityConflict => {
                tracing::warn!("Identity key mismatch for {}", upload.user_id);
                Err(DirectoryError::IdentityConflict {
                    user_id: upload.user_id.to_string(),
                })
            }
        }
    }

    /// Fetch the bundle for `user_id`, consuming one one-time prekey if any remain.
    pub async fn fetch(&self, user_id: &str) -> DirectoryResult<PrekeyBundle> {
        let user_id = UserId::parse(user_id).map_err(|_| DirectoryError::InvalidUserId)?;
        let stored = self
            .store
            .take_bundle(&user_id)
            .await?
            .ok_or(DirectoryError::NotFound)?;

        tracing::debug!(
            "Issued bundle for {} (one-time prekey: {})",
            user_id,
            stored.one_time_pre_key.is_some()
        );

        Ok(PrekeyBundle {
            identity_key: stored.identity_key,
            signed_pre_key: stored.signed_pre_key,
            signed_pre_key_sig: stored.signed_pre_key_sig,
            one_time_pre_key: stored.one_time_pre_key,
        })
    }

    /// Count the one-time prekeys left for `user_id` without consuming any.
    pub async fn one_time_count(&self, user_id: &str) -> DirectoryResult<OneTimeKeyCount> {
        let user_id = UserId::parse(user_id).map_err(|_| DirectoryError::InvalidUserId)?;
        let remaining = self
            .store
            .one_time_key_count(&user_id)
            .await?
            .ok_or(DirectoryError::NotFound)?;

        Ok(OneTimeKeyCount {
            user_id: user_id.to_string(),
            remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteKeyStore;
    use ed25519_dalek::{Signer, SigningKey};

    fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn signed_upload(user: &str, key: &SigningKey, one_time: &[u8]) -> UploadBundle {
        let signed_pre_key = [0x42u8; 32];
        let signature = key.sign(&signed_pre_key);
        UploadBundle {
            user_id: user.to_string(),
            identity_key: hex::encode(key.verifying_key().to_bytes()),
            signed_pre_key: hex::encode(signed_pre_key),
            signed_pre_key_sig: hex::encode(signature.to_bytes()),
            one_time_pre_keys: one_time.iter().map(|b| hex::encode([*b; 32])).collect(),
        }
    }

    async fn directory(enforce: bool) -> KeyDirectory {
        let store = SqliteKeyStore::in_memory().await.unwrap();
        KeyDirectory::new(Arc::new(store), enforce)
    }

    #[test]
    fn verify_accepts_real_signature_and_rejects_tampering() {
        let key = signing_key(7);
        let identity = PublicKey::new(key.verifying_key().to_bytes());
        let spk = PublicKey::new([0x42; 32]);
        let sig = SignatureBytes::new(key.sign(spk.as_bytes()).to_bytes());

        assert!(verify_signed_prekey(&identity, &spk, &sig));
        assert!(!verify_signed_prekey(&identity, &PublicKey::new([0x43; 32]), &sig));

        let other = PublicKey::new(signing_key(8).verifying_key().to_bytes());
        assert!(!verify_signed_prekey(&other, &spk, &sig));
    }

    #[tokio::test]
    async fn upload_and_fetch() {
        let dir = directory(true).await;
        let key = signing_key(7);

        let receipt = dir
            .upload(&signed_upload("alice", &key, &[1, 2]))
            .await
            .unwrap();
        assert_eq!(receipt.status, "ok");
        assert_eq!(receipt.message, "Keys stored for alice");
        assert_eq!(receipt.one_time_keys_added, 2);

        let bundle = dir.fetch("alice").await.unwrap();
        assert_eq!(bundle.identity_key, hex::encode(key.verifying_key().to_bytes()));
        assert_eq!(bundle.one_time_pre_key, Some(hex::encode([1u8; 32])));
        assert_eq!(dir.one_time_count("alice").await.unwrap().remaining, 1);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_when_enforcing() {
        let dir = directory(true).await;
        let mut upload = signed_upload("alice", &signing_key(7), &[1]);
        upload.signed_pre_key = hex::encode([0x99u8; 32]);

        assert!(matches!(
            dir.upload(&upload).await,
            Err(DirectoryError::SignatureInvalid)
        ));
        assert!(matches!(dir.fetch("alice").await, Err(DirectoryError::NotFound)));
    }

    #[tokio::test]
    async fn bad_signature_is_stored_when_not_enforcing() {
        let dir = directory(false).await;
        let mut upload = signed_upload("alice", &signing_key(7), &[]);
        upload.signed_pre_key_sig = "00".repeat(64);

        dir.upload(&upload).await.unwrap();
        assert!(dir.fetch("alice").await.is_ok());
    }

    #[tokio::test]
    async fn second_identity_conflicts_and_first_stays_pinned() {
        let dir = directory(true).await;
        let first = signing_key(7);
        dir.upload(&signed_upload("alice", &first, &[]))
            .await
            .unwrap();

        let err = dir
            .upload(&signed_upload("alice", &signing_key(9), &[]))
            .await
            .unwrap_err();
        assert!(
            matches!(err, DirectoryError::IdentityConflict { ref user_id } if user_id == "alice")
        );

        let bundle = dir.fetch("alice").await.unwrap();
        assert_eq!(
            bundle.identity_key,
            hex::encode(first.verifying_key().to_bytes())
        );
    }

    #[tokio::test]
    async fn uppercase_identity_key_matches_pinned_lowercase() {
        let dir = directory(true).await;
        let key = signing_key(7);
        dir.upload(&signed_upload("alice", &key, &[]))
            .await
            .unwrap();

        let mut again = signed_upload("alice", &key, &[3]);
        again.identity_key = again.identity_key.to_uppercase();
        let receipt = dir.upload(&again).await.unwrap();
        assert_eq!(receipt.one_time_keys_added, 1);
    }

    #[tokio::test]
    async fn malformed_fields_are_validation_errors() {
        let dir = directory(true).await;
        let mut upload = signed_upload("alice", &signing_key(7), &[]);
        upload.identity_key.pop();
        assert!(matches!(
            dir.upload(&upload).await,
            Err(DirectoryError::Validation(_))
        ));

        let bad_user = signed_upload("a!", &signing_key(7), &[]);
        assert!(matches!(
            dir.upload(&bad_user).await,
            Err(DirectoryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn fetch_checks_user_id_format() {
        let dir = directory(true).await;
        assert!(matches!(dir.fetch("ab").await, Err(DirectoryError::InvalidUserId)));
        assert!(matches!(
            dir.one_time_count("bad user").await,
            Err(DirectoryError::InvalidUserId)
        ));
        assert!(matches!(dir.fetch("nobody").await, Err(DirectoryError::NotFound)));
    }
}
