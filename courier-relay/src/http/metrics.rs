//! Prometheus metrics endpoint.

use crate::server::CourierServer;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::fmt::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format: gauges for current mailbox
/// state, counters (monotonic since startup) for everything else.
pub async fn metrics_handler(
    Extension(server): Extension<Arc<CourierServer>>,
) -> impl IntoResponse {
    let m = server.metrics();
    let stats = server.mailboxes().stats().await;

    let gauges = [
        (
            "online_identities",
            "Identities with a live relay connection",
            stats.online_identities as u64,
        ),
        ("mailboxes", "Mailboxes held in memory", stats.mailboxes as u64),
        ("queued_messages", "Messages waiting across all mailboxes", stats.queued_messages as u64),
        (
            "rate_limit_sources",
            "Source addresses with a rate window",
            server.rate_limits().tracked_sources() as u64,
        ),
    ];

    let counters = [
        ("connections_total", "Relay connections accepted", &m.connections_total),
        ("registrations_total", "REGISTER commands handled", &m.registrations_total),
        ("sends_total", "SEND commands stored", &m.sends_total),
        ("fetches_total", "FETCH commands answered", &m.fetches_total),
        ("messages_delivered_total", "Messages handed out by FETCH", &m.messages_delivered),
        ("bytes_received_total", "Payload bytes received by SEND", &m.bytes_received),
        ("bytes_sent_total", "Payload bytes sent in FETCH replies", &m.bytes_sent),
        (
            "protocol_errors_total",
            "Relay connections ended by a malformed frame",
            &m.protocol_errors,
        ),
        ("uploads_total", "Prekey bundles accepted", &m.uploads_total),
        ("bundle_fetches_total", "Prekey bundles served", &m.bundle_fetches_total),
        ("one_time_keys_issued_total", "One-time prekeys handed out", &m.one_time_keys_issued),
        ("identity_conflicts_total", "Uploads rejected by identity pinning", &m.identity_conflicts),
        (
            "signature_rejections_total",
            "Uploads rejected for a bad signature",
            &m.signature_rejections,
        ),
        ("rate_limit_hits_total", "Requests rejected by rate limiting", &m.rate_limit_hits),
        (
            "perimeter_rejections_total",
            "Requests rejected by the size or content-type guard",
            &m.perimeter_rejections,
        ),
    ];

    let mut body = String::new();
    let _ = writeln!(body, "# HELP courier_info Server information");
    let _ = writeln!(body, "# TYPE courier_info gauge");
    let _ = writeln!(
        body,
        "courier_info{{version=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION")
    );

    for (name, help, value) in gauges {
        let _ = write!(
            body,
            "\n# HELP courier_{name} {help}\n# TYPE courier_{name} gauge\ncourier_{name} {value}\n"
        );
    }
    for (name, help, counter) in counters {
        let value = counter.load(Ordering::Relaxed);
        let _ = write!(
            body,
            "\n# HELP courier_{name} {help}\n# TYPE courier_{name} counter\ncourier_{name} {value}\n"
        );
    }

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
