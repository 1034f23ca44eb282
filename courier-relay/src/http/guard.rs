//! Request perimeter: hardening headers, size cap, content-type check and rate limiting.

use super::keys::ApiError;
use crate::server::{CourierServer, RelayMetrics};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

/// Headers set on every response.
const SECURITY_HEADERS: [(header::HeaderName, &str); 4] = [
    (
        header::STRICT_TRANSPORT_SECURITY,
        "max-age=31536000; includeSubDomains",
    ),
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
];

/// Add the hardening header set to whatever the inner service produced.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
    response
}

/// Reject requests whose declared `Content-Length` exceeds the cap, before the body is read.
pub async fn limit_payload_size(
    State(server): State<Arc<CourierServer>>,
    request: Request,
    next: Next,
) -> Response {
    let max = server.config().limits.max_payload_bytes;
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    if let Some(len) = declared {
        if len > max as u64 {
            RelayMetrics::incr(&server.metrics().perimeter_rejections);
            tracing::warn!("Rejected {} byte body for {} (cap {})", len, request.uri(), max);
            return ApiError::PayloadTooLarge.into_response();
        }
    }
    next.run(request).await
}

/// Require a JSON content type on state-mutating requests.
pub async fn require_json(request: Request, next: Next) -> Response {
    if matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH) {
        let is_json = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
            .unwrap_or(false);

        if !is_json {
            if let Some(server) = request.extensions().get::<Arc<CourierServer>>() {
                RelayMetrics::incr(&server.metrics().perimeter_rejections);
            }
            tracing::warn!("Rejected {} {}: not application/json", request.method(), request.uri());
            return ApiError::UnsupportedMediaType.into_response();
        }
    }
    next.run(request).await
}

/// Per-source sliding window plus the global ceiling.
///
/// The source is the TCP peer address; without connection info every request
/// counts against `0.0.0.0`.
pub async fn rate_limit(
    State(server): State<Arc<CourierServer>>,
    request: Request,
    next: Next,
) -> Response {
    let source = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    let limits = server.rate_limits();
    let admitted = limits
        .check_global()
        .and_then(|()| limits.check_source(source));
    if let Err(e) = admitted {
        RelayMetrics::incr(&server.metrics().rate_limit_hits);
        tracing::warn!("Rate limited {}: {}", source, e);
        return ApiError::RateLimited.into_response();
    }
    next.run(request).await
}
