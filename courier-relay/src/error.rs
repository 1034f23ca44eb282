//! Error types for courier-relay.

use courier_types::{ValidationError, WireError};
use std::path::PathBuf;

/// Errors that end a relay connection.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
///
/// Any of these aborts the enclosing transaction; nothing it wrote survives.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Key directory errors.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Upload body failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Path user_id failed validation on a read.
    #[error("invalid user_id")]
    InvalidUserId,

    /// The signed prekey is not signed by the identity key.
    #[error("invalid signature: signed_pre_key not signed by identity_key")]
    SignatureInvalid,

    /// The user_id is already pinned to a different identity key.
    #[error("identity key mismatch for {user_id}: cannot overwrite existing identity")]
    IdentityConflict {
        /// The pinned account.
        user_id: String,
    },

    /// No bundle for this user_id.
    #[error("user not found")]
    NotFound,

    /// Transaction failed and was rolled back.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for key directory operations.
pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_names_the_account() {
        let err = DirectoryError::IdentityConflict {
            user_id: "alice".to_string(),
        };
        assert!(err.to_string().contains("alice"));
    }

    #[test]
    fn validation_converts() {
        let err: DirectoryError = ValidationError::InvalidUserId.into();
        assert!(matches!(err, DirectoryError::Validation(_)));
    }
}
