//! Shared server state.
//!
//! One [`CourierServer`] owns the mailboxes, the key directory, the rate
//! limiters and the counters. Relay sessions and HTTP handlers hold it
//! behind an `Arc`.

use crate::config::Config;
use crate::directory::KeyDirectory;
use crate::limits::RateLimits;
use crate::mailbox::{ConnectionId, Mailboxes};
use crate::storage::KeyStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Operational metrics for monitoring relay and directory activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Relay connections accepted.
    pub connections_total: AtomicU64,
    /// REGISTER commands handled.
    pub registrations_total: AtomicU64,
    /// SEND commands stored.
    pub sends_total: AtomicU64,
    /// FETCH commands answered (registered or not).
    pub fetches_total: AtomicU64,
    /// Messages handed out by FETCH.
    pub messages_delivered: AtomicU64,
    /// Payload bytes received by SEND.
    pub bytes_received: AtomicU64,
    /// Payload bytes sent in FETCH replies.
    pub bytes_sent: AtomicU64,
    /// Relay connections ended by a malformed frame.
    pub protocol_errors: AtomicU64,
    /// Bundles accepted by the directory.
    pub uploads_total: AtomicU64,
    /// Bundles served by the directory.
    pub bundle_fetches_total: AtomicU64,
    /// One-time prekeys handed out.
    pub one_time_keys_issued: AtomicU64,
    /// Uploads rejected by identity pinning.
    pub identity_conflicts: AtomicU64,
    /// Uploads rejected for a bad signed prekey signature.
    pub signature_rejections: AtomicU64,
    /// Requests rejected by the per-source window or the global ceiling.
    pub rate_limit_hits: AtomicU64,
    /// Requests rejected by the size or content-type guard.
    pub perimeter_rejections: AtomicU64,
}

impl RelayMetrics {
    /// Bump a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Main server state.
pub struct CourierServer {
    config: Config,
    mailboxes: Mailboxes,
    directory: KeyDirectory,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
    next_connection_id: AtomicU64,
}

impl std::fmt::Debug for CourierServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierServer")
            .field("config", &self.config)
            .field("directory", &self.directory)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl CourierServer {
    /// Create a server over `store`.
    pub fn new(config: Config, store: Arc<dyn KeyStore>) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        let directory = KeyDirectory::new(store, config.directory.enforce_signatures);
        Self {
            config,
            mailboxes: Mailboxes::new(),
            directory,
            rate_limits,
            metrics: RelayMetrics::default(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the shared mailboxes.
    pub fn mailboxes(&self) -> &Mailboxes {
        &self.mailboxes
    }

    /// Get the key directory.
    pub fn directory(&self) -> &KeyDirectory {
        &self.directory
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Hand out a fresh connection token.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}
