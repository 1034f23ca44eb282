//! Client errors.

use courier_types::WireError;
use thiserror::Error;

/// Errors from the relay and directory clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Relay connection failed or a frame was malformed.
    #[error("relay error: {0}")]
    Wire(#[from] WireError),

    /// HTTP transport failed before a status was received.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// 400: bad path user_id or bad signed prekey signature.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// 404: no bundle for this user_id.
    #[error("not found: {0}")]
    NotFound(String),

    /// 409: user_id pinned to a different identity key.
    #[error("identity conflict: {0}")]
    IdentityConflict(String),

    /// 413: body over the server's cap.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// 415: server refused the content type.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// 422: body failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// 429: rate limited, retry later.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Any other non-success status.
    #[error("server returned {status}: {detail}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// The `detail` field, or the raw body.
        detail: String,
    },
}

impl ClientError {
    /// Map a non-success HTTP status and its `detail` to a variant.
    pub fn from_status(status: u16, detail: String) -> Self {
        match status {
            400 => ClientError::BadRequest(detail),
            404 => ClientError::NotFound(detail),
            409 => ClientError::IdentityConflict(detail),
            413 => ClientError::PayloadTooLarge(detail),
            415 => ClientError::UnsupportedMediaType(detail),
            422 => ClientError::Validation(detail),
            429 => ClientError::RateLimited(detail),
            status => ClientError::Server { status, detail },
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
