//! Rate limiting for the key directory HTTP surface.
//!
//! Two layers:
//! - A per-source sliding window: each remote address keeps the timestamps of
//!   its recent admitted requests. A request is rejected when the number of
//!   timestamps inside the window already meets the threshold. Stale
//!   timestamps are pruned on each check, and every [`SWEEP_INTERVAL`]
//!   checks the map drops sources whose newest request has aged out.
//! - A global ceiling (governor direct limiter) that caps aggregate
//!   throughput even when every source is individually within limits.
//!
//! State is process-local and never persisted.

use crate::config::LimitsConfig;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Checks between sweeps of idle sources.
pub const SWEEP_INTERVAL: u64 = 256;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the key directory.
#[derive(Clone)]
pub struct RateLimits {
    /// Per-source sliding windows, keyed by remote IP.
    windows: Arc<DashMap<IpAddr, VecDeque<Instant>>>,
    /// Requests admitted per source per window.
    max_requests: usize,
    /// Width of the sliding window.
    window: Duration,
    /// Global rate limiter across all sources.
    global_limiter: Arc<DirectLimiter>,
    /// Source checks since startup, for scheduling sweeps.
    checks: Arc<AtomicU64>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("tracked_sources", &self.windows.len())
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// Zero values are rejected earlier by `Config::validate`; here they are clamped to one.
    pub fn new(config: &LimitsConfig) -> Self {
        let global_rps =
            NonZeroU32::new(config.global_requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            windows: Arc::new(DashMap::new()),
            max_requests: config.requests_per_minute.max(1) as usize,
            window: Duration::from_secs(config.window_secs.max(1)),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_rps))),
            checks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Check and record one request from `source`.
    ///
    /// # Returns
    ///
    /// `Ok(())` if admitted, `Err` with reason if rate limited. Rejected
    /// requests are not recorded.
    pub fn check_source(&self, source: IpAddr) -> Result<(), RateLimitError> {
        self.check_source_at(source, Instant::now())
    }

    /// [`RateLimits::check_source`] with an explicit clock reading.
    pub fn check_source_at(&self, source: IpAddr, now: Instant) -> Result<(), RateLimitError> {
        let result = self.record(source, now);

        // The entry guard from `record` is gone; `retain` locks every shard.
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            self.sweep(now);
        }
        result
    }

    fn record(&self, source: IpAddr, now: Instant) -> Result<(), RateLimitError> {
        let mut window = self.windows.entry(source).or_default();

        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.max_requests {
            return Err(RateLimitError::SourceLimitExceeded);
        }
        window.push_back(now);
        Ok(())
    }

    /// Drop every source with no request inside the window at `now`.
    fn sweep(&self, now: Instant) {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) < self.window)
        });
        let dropped = before.saturating_sub(self.windows.len());
        if dropped > 0 {
            tracing::debug!("Dropped {} idle rate limit windows", dropped);
        }
    }

    /// Check if the global request rate is within limits.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Number of source addresses with a window (for metrics).
    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many requests from this source address.
    #[error("per-source rate limit exceeded")]
    SourceLimitExceeded,
    /// Global request rate exceeded across all sources.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}
