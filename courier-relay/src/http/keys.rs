//! Key directory endpoints.

use crate::error::DirectoryError;
use crate::server::{CourierServer, RelayMetrics};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use courier_types::{
    ErrorBody, OneTimeKeyCount, PrekeyBundle, UploadBundle, UploadReceipt, ValidationError,
};
use std::sync::Arc;

/// Errors rendered as `{"detail": ...}` with a matching status.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed body or field.
    Validation(String),
    /// Path user_id failed format check.
    InvalidUserId,
    /// Signed prekey signature did not verify.
    SignatureInvalid,
    /// user_id pinned to another identity key.
    IdentityConflict,
    /// No bundle for this user_id.
    NotFound,
    /// Declared or actual body over the cap.
    PayloadTooLarge,
    /// State-mutating request without a JSON content type.
    UnsupportedMediaType,
    /// Source or global rate limit hit.
    RateLimited,
    /// Storage failure; the transaction was rolled back.
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InvalidUserId | ApiError::SignatureInvalid => StatusCode::BAD_REQUEST,
            ApiError::IdentityConflict => StatusCode::CONFLICT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Validation(reason) => reason.clone(),
            ApiError::InvalidUserId => "Invalid User ID".to_string(),
            ApiError::SignatureInvalid => {
                "Invalid Signature: SignedPreKey not signed by IdentityKey".to_string()
            }
            ApiError::IdentityConflict => {
                "Identity Key Mismatch! Cannot overwrite existing identity.".to_string()
            }
            ApiError::NotFound => "User not found".to_string(),
            ApiError::PayloadTooLarge => "Payload too large".to_string(),
            ApiError::UnsupportedMediaType => {
                "Unsupported Media Type. Use application/json".to_string()
            }
            ApiError::RateLimited => "Rate limit exceeded. Try again later.".to_string(),
            ApiError::Internal => "Internal storage error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.detail(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Validation(e) => ApiError::Validation(e.to_string()),
            DirectoryError::InvalidUserId => ApiError::InvalidUserId,
            DirectoryError::SignatureInvalid => ApiError::SignatureInvalid,
            DirectoryError::IdentityConflict { .. } => ApiError::IdentityConflict,
            DirectoryError::NotFound => ApiError::NotFound,
            DirectoryError::Storage(e) => {
                tracing::error!("Key directory storage failure: {}", e);
                ApiError::Internal
            }
        }
    }
}

/// `POST /keys/upload`
pub async fn upload_handler(
    Extension(server): Extension<Arc<CourierServer>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<UploadReceipt>, ApiError> {
    let metrics = server.metrics();
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            RelayMetrics::incr(&metrics.perimeter_rejections);
            ApiError::PayloadTooLarge
        } else {
            ApiError::Validation(rejection.body_text())
        }
    })?;

    let bundle: UploadBundle = serde_json::from_slice(&body).map_err(|e| {
        ApiError::Validation(ValidationError::MalformedBody(e.to_string()).to_string())
    })?;

    match server.directory().upload(&bundle).await {
        Ok(receipt) => {
            RelayMetrics::incr(&metrics.uploads_total);
            Ok(Json(receipt))
        }
        Err(e) => {
            match e {
                DirectoryError::IdentityConflict { .. } => {
                    RelayMetrics::incr(&metrics.identity_conflicts)
                }
                DirectoryError::SignatureInvalid => {
                    RelayMetrics::incr(&metrics.signature_rejections)
                }
                _ => {}
            }
            Err(e.into())
        }
    }
}

/// `GET /keys/{user_id}`
pub async fn fetch_handler(
    Extension(server): Extension<Arc<CourierServer>>,
    Path(user_id): Path<String>,
) -> Result<Json<PrekeyBundle>, ApiError> {
    fetch_bundle(&server, &user_id).await
}

/// `GET /keys/upload`
///
/// The static upload route shadows `/keys/{user_id}` for a user named `upload`,
/// so the GET half of that route serves the fetch.
pub async fn fetch_upload_user_handler(
    Extension(server): Extension<Arc<CourierServer>>,
) -> Result<Json<PrekeyBundle>, ApiError> {
    fetch_bundle(&server, "upload").await
}

async fn fetch_bundle(
    server: &CourierServer,
    user_id: &str,
) -> Result<Json<PrekeyBundle>, ApiError> {
    let bundle = server.directory().fetch(user_id).await?;

    let metrics = server.metrics();
    RelayMetrics::incr(&metrics.bundle_fetches_total);
    if bundle.one_time_pre_key.is_some() {
        RelayMetrics::incr(&metrics.one_time_keys_issued);
    }
    Ok(Json(bundle))
}

/// `GET /keys/{user_id}/one-time-count`
pub async fn one_time_count_handler(
    Extension(server): Extension<Arc<CourierServer>>,
    Path(user_id): Path<String>,
) -> Result<Json<OneTimeKeyCount>, ApiError> {
    Ok(Json(server.directory().one_time_count(&user_id).await?))
}
