//! Process-wide service counters.
//!
//! One `Metrics` instance lives for the whole process and is shared as
//! `Arc<Metrics>` by the gateway, the outbound client, the dialogue engine
//! and the keep-alive worker. Increments are relaxed atomics; readers take
//! an immutable [`MetricsSnapshot`] for /health, /debug, /metrics and the
//! /status command.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

pub struct Metrics {
    started_at: Instant,
    total_requests: AtomicU64,
    successful_sends: AtomicU64,
    errors: AtomicU64,
    api_calls: AtomicU64,
    rate_limit_hits: AtomicU64,
    retry_attempts: AtomicU64,
    keepalive_pings: AtomicU64,
    sleep_wake_cycles: AtomicU64,
    last_activity_unix: AtomicI64,
}

/// Point-in-time copy of every counter, serialized as-is on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub successful_sends: u64,
    pub errors: u64,
    pub api_calls: u64,
    pub rate_limit_hits: u64,
    pub retry_attempts: u64,
    pub keepalive_pings: u64,
    pub sleep_wake_cycles: u64,
    pub last_activity_unix: i64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            successful_sends: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            api_calls: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            retry_attempts: AtomicU64::new(0),
            keepalive_pings: AtomicU64::new(0),
            sleep_wake_cycles: AtomicU64::new(0),
            last_activity_unix: AtomicI64::new(chrono::Utc::now().timestamp()),
        }
    }

    /// One inbound webhook delivery accepted by the gateway.
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.touch_activity();
    }

    /// One quiz poll confirmed delivered.
    pub fn record_successful_send(&self) {
        self.successful_sends.fetch_add(1, Ordering::Relaxed);
    }

    /// One failed logical operation. Counted once per operation, not per
    /// attempt.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// One outbound HTTP attempt, retries included.
    pub fn record_api_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// A 429 from the remote, or a local limiter rejection.
    pub fn record_rate_limit_hit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keepalive_ping(&self) {
        self.keepalive_pings.fetch_add(1, Ordering::Relaxed);
    }

    /// Host suspension detected from a keep-alive tick gap. One increment
    /// per detected gap.
    pub fn record_sleep_wake_cycle(&self) {
        self.sleep_wake_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn touch_activity(&self) {
        self.last_activity_unix
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_sends: self.successful_sends.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            api_calls: self.api_calls.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
            keepalive_pings: self.keepalive_pings.load(Ordering::Relaxed),
            sleep_wake_cycles: self.sleep_wake_cycles.load(Ordering::Relaxed),
            last_activity_unix: self.last_activity_unix.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
