//! Per-upstream DNS client pools (§4.C).
//!
//! Four transports share one contract ([`Upstream`]): `query` performs a
//! round trip and converts the response uniformly via [`common::to_rrcache`];
//! `is_failing`/`report_failure` track a cooldown window the resolver core
//! uses for its two-pass orchestration (§4.D).

pub mod common;
pub mod doh;
pub mod tcp;
pub mod udp;
pub mod wire;

use async_trait::async_trait;
use intel_model::{Query, RRCache, ResolverError};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// How long an upstream stays "failing" after [`Upstream::report_failure`]
/// before the first orchestration pass will try it again (§4.D).
pub const FAILURE_COOLDOWN_MS: i64 = 30_000;

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn query(&self, query: &Query) -> Result<RRCache, ResolverError>;
    fn is_failing(&self) -> bool;
    fn report_failure(&self);
    fn report_healthy(&self);
}

/// Shared failure-cooldown bookkeeping, composed into each transport.
#[derive(Default)]
pub struct FailureTracker {
    last_failure_unix_ms: AtomicI64,
}

impl FailureTracker {
    pub fn is_failing(&self) -> bool {
        let last = self.last_failure_unix_ms.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        now_unix_ms().saturating_sub(last) < FAILURE_COOLDOWN_MS
    }

    pub fn report_failure(&self) {
        self.last_failure_unix_ms
            .store(now_unix_ms(), Ordering::Relaxed);
    }

    pub fn report_healthy(&self) {
        self.last_failure_unix_ms.store(0, Ordering::Relaxed);
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Injected collaborator so transports can report a failed connection to
/// netenv without this crate depending on it directly (same inversion of
/// control as `netenv::online_status::DnsProbe`).
pub trait ConnectionFailureSink: Send + Sync {
    fn notify_connection_failed(&self, resolver_name: &str);
}

pub struct NullFailureSink;
impl ConnectionFailureSink for NullFailureSink {
    fn notify_connection_failed(&self, _resolver_name: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_starts_healthy_and_cools_down_after_failure() {
        let tracker = FailureTracker::default();
        assert!(!tracker.is_failing());
        tracker.report_failure();
        assert!(tracker.is_failing());
        tracker.report_healthy();
        assert!(!tracker.is_failing());
    }
}
