//! The compat self-check worker (§4.E).
//!
//! Detects interference from VPNs/AV software by round-tripping a DNS query
//! through the resolver core and confirming (a) the resolver answered with
//! the caller-provided IP for a reserved local domain and (b) the same
//! query's nonce was actually observed leaving the host by packet
//! interception. Either signal alone is insufficient: a matching resolver
//! answer with no packet observed means something is intercepting/answering
//! DNS before it reaches the wire, and a packet observed with no matching
//! resolver answer means something is mangling the response on the way
//! back.

use crate::nonce::{NonceObserver, generate_nonce};
use intel_model::{Notification, Query, RecordType, ResolverError, SecurityLevel, SharedNotifier};
use resolver::ResolverCore;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const SELF_CHECK_EVENT_ID: &str = "compat-self-check";
const NONCE_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct SelfCheckConfig {
    /// Steady-state period between checks (§4.E default: 5 min).
    pub interval: Duration,
    /// Minimum spacing enforced after an explicit trigger (§4.E: "≥10s
    /// minimum after trigger").
    pub min_trigger_interval: Duration,
    /// Period used instead of `interval` for the cycle immediately
    /// following a network-change event.
    pub short_retry_interval: Duration,
    /// How long a single attempt waits for both the resolver answer and the
    /// packet-observed nonce before giving up.
    pub round_trip_timeout: Duration,
    /// Consecutive failures required before surfacing a notification
    /// (§4.E: "threshold (5-10)").
    pub fail_threshold: u32,
    /// Suffix appended to the random nonce label, e.g. `"check.home.arpa."`.
    /// Must fall under the resolver's internal reserved TLD so only the
    /// synthetic env-resolver answers it.
    pub reserved_domain_suffix: String,
    /// The IP the resolver's env-resolver is configured to answer with for
    /// the reserved TLD; this check treats any other answer as a failure.
    pub expected_ip: Ipv4Addr,
}

impl Default for SelfCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            min_trigger_interval: Duration::from_secs(10),
            short_retry_interval: Duration::from_secs(10),
            round_trip_timeout: Duration::from_secs(3),
            fail_threshold: 5,
            reserved_domain_suffix: "check.home.arpa.".to_string(),
            expected_ip: Ipv4Addr::new(127, 0, 0, 1),
        }
    }
}

/// Drives the periodic self-check described in §4.E. Shares the same
/// read-mostly-atomic-plus-worker-loop shape as
/// `netenv::online_status::OnlineStatusMonitor`.
pub struct SelfCheck {
    config: SelfCheckConfig,
    resolver: Arc<ResolverCore>,
    observer: Arc<dyn NonceObserver>,
    notifier: SharedNotifier,
    network_changed: netenv::Flag,
    failure_count: AtomicU32,
    /// Process-wide "self-check-failing" flag other subsystems poll to
    /// suppress secondary alerting (§4.E).
    failing: AtomicBool,
    trigger: Notify,
    last_run: parking_lot::Mutex<Option<Instant>>,
}

impl SelfCheck {
    pub fn new(
        config: SelfCheckConfig,
        resolver: Arc<ResolverCore>,
        observer: Arc<dyn NonceObserver>,
        notifier: SharedNotifier,
        network_changed: netenv::Flag,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            resolver,
            observer,
            notifier,
            network_changed,
            failure_count: AtomicU32::new(0),
            failing: AtomicBool::new(false),
            trigger: Notify::new(),
            last_run: parking_lot::Mutex::new(None),
        })
    }

    /// `true` once the failure count has crossed the threshold; cleared by
    /// any pass, any network-change event, or an explicit success.
    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::Relaxed)
    }

    /// Requests an out-of-band check, e.g. in response to a user action.
    /// Coalesced like `OnlineStatusMonitor::trigger_recheck`: extra
    /// triggers before the next cycle runs are dropped, not queued.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Runs the worker loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let network_changed = self.network_changed.is_set();
            if network_changed {
                tracing::debug!("network change observed, resetting self-check failure count");
                self.reset_failure_state();
            }

            self.guarded_check().await;

            let sleep = if network_changed {
                self.config.short_retry_interval
            } else {
                self.config.interval
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.trigger.notified() => {}
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }

    /// Enforces `min_trigger_interval` since the last run, then runs one
    /// attempt and records the outcome.
    async fn guarded_check(&self) {
        let wait = {
            let mut last = self.last_run.lock();
            let remaining = last
                .map(|t| self.config.min_trigger_interval.saturating_sub(t.elapsed()))
                .unwrap_or_default();
            *last = Some(Instant::now());
            remaining
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let passed = self.attempt().await;
        self.record(passed);
    }

    fn reset_failure_state(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        if self.failing.swap(false, Ordering::Relaxed) {
            self.notifier.clear(SELF_CHECK_EVENT_ID);
        }
    }

    fn record(&self, passed: bool) {
        if passed {
            self.reset_failure_state();
            return;
        }

        let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(count, threshold = self.config.fail_threshold, "self-check failed");

        if count >= self.config.fail_threshold && !self.failing.swap(true, Ordering::Relaxed) {
            self.notifier.notify(Notification {
                event_id: SELF_CHECK_EVENT_ID.to_string(),
                module: "compat-check",
                message: format!("DNS self-check has failed {count} consecutive times"),
            });
        }
    }

    /// Runs exactly one nonce round-trip: issues a query for a fresh nonce
    /// under the reserved domain and waits for both the resolver's answer
    /// and the packet-observed nonce to match, within `round_trip_timeout`.
    async fn attempt(&self) -> bool {
        let nonce = generate_nonce();
        let fqdn = format!("{nonce}.{}", self.config.reserved_domain_suffix);
        let query = Query::new(&fqdn, RecordType::A, SecurityLevel::Relaxed).with_caching(false);

        let resolve = self.resolver.resolve(&query);
        let observe = self.wait_for_nonce(&nonce);

        let outcome = tokio::time::timeout(self.config.round_trip_timeout, async {
            tokio::join!(resolve, observe)
        })
        .await;

        match outcome {
            Ok((Ok(cache), true)) => first_answer_ipv4(&cache) == Some(self.config.expected_ip),
            Ok((Err(error), _)) => {
                if !matches!(error, ResolverError::NotFound) {
                    tracing::debug!(%error, "self-check resolve failed");
                }
                false
            }
            _ => false,
        }
    }

    /// Polls the non-blocking observer until it reports `nonce` or the
    /// caller's timeout elapses. Nonces belonging to a stale/concurrent
    /// attempt are discarded rather than treated as a match.
    async fn wait_for_nonce(&self, nonce: &str) -> bool {
        loop {
            if let Some(observed) = self.observer.try_recv_nonce() {
                if observed == nonce {
                    return true;
                }
                continue;
            }
            tokio::time::sleep(NONCE_POLL_INTERVAL).await;
        }
    }
}

fn first_answer_ipv4(cache: &intel_model::RRCache) -> Option<Ipv4Addr> {
    cache.answers.iter().find_map(|record| match record.kind {
        RecordType::A if record.rdata.len() == 4 => {
            Some(Ipv4Addr::new(record.rdata[0], record.rdata[1], record.rdata[2], record.rdata[3]))
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::ChannelNonceObserver;
    use async_trait::async_trait;
    use intel_model::resolver::{BlockDetection, Resolver, ResolverId, ResolverScheme, ResolverSource};
    use intel_model::{ChannelNotifier, NullNotifier};
    use resolver::{RegisteredResolver, ResolverCoreConfig, ResolverRegistry};
    use std::collections::HashSet;
    use upstream::{FailureTracker, Upstream};

    struct StaticUpstream {
        ip: Ipv4Addr,
        tracker: FailureTracker,
    }

    #[async_trait]
    impl Upstream for StaticUpstream {
        async fn query(&self, query: &Query) -> Result<intel_model::RRCache, ResolverError> {
            let domain = query.as_domain_name().unwrap();
            Ok(intel_model::RRCache {
                domain: domain.clone(),
                question_type: query.qtype(),
                response_code: intel_model::ResponseCode::NOERROR,
                answers: vec![intel_model::rrcache::RawRecord {
                    name: domain,
                    kind: query.qtype(),
                    class: 1,
                    ttl: 17,
                    rdata: self.ip.octets().to_vec(),
                    text: "synthetic".to_string(),
                }],
                authority: vec![],
                additional: vec![],
                expiry: 0,
                resolver: intel_model::resolver::ResolverDescriptor {
                    id: ResolverId(9),
                    scheme: ResolverScheme::Dns,
                    scope: None,
                    name: "static".into(),
                },
                flags: Default::default(),
            })
        }

        fn is_failing(&self) -> bool {
            self.tracker.is_failing()
        }

        fn report_failure(&self) {
            self.tracker.report_failure();
        }

        fn report_healthy(&self) {
            self.tracker.report_healthy();
        }
    }

    async fn build_core(expected: Ipv4Addr) -> Arc<ResolverCore> {
        let registry = ResolverRegistry::new();
        let resolver = Arc::new(Resolver::new(
            ResolverId(9),
            ResolverScheme::Dns,
            "1.1.1.1:53".parse().unwrap(),
            None,
            vec![],
            false,
            BlockDetection::Disabled,
            None,
            ResolverSource::Configured,
            "static".to_string(),
        ));
        registry.reload(vec![RegisteredResolver {
            resolver,
            upstream: Arc::new(StaticUpstream {
                ip: expected,
                tracker: FailureTracker::default(),
            }),
        }]);

        let store = dns_cache::Store::connect(dns_cache::StoreConfig::default())
            .await
            .unwrap();
        let core = ResolverCore::new(
            registry,
            store,
            ResolverCoreConfig {
                mdns_id: ResolverId(999),
                special_domains_allowed: true,
                connectivity_domains: HashSet::new(),
                connectivity_domains_enabled: true,
                ttl_bounds: Default::default(),
                env_reserved_ip: Some(expected),
            },
        );
        core.reload_routing(vec![], vec![ResolverId(9)], vec![ResolverId(9)]);
        core
    }

    fn check_config(expected: Ipv4Addr, fail_threshold: u32) -> SelfCheckConfig {
        SelfCheckConfig {
            interval: Duration::from_secs(300),
            min_trigger_interval: Duration::from_millis(0),
            short_retry_interval: Duration::from_secs(1),
            round_trip_timeout: Duration::from_millis(300),
            fail_threshold,
            reserved_domain_suffix: "check.home.arpa.".to_string(),
            expected_ip: expected,
        }
    }

    #[tokio::test]
    async fn fails_without_packet_observation() {
        let expected = Ipv4Addr::new(10, 1, 1, 1);
        let core = build_core(expected).await;
        let observer = ChannelNonceObserver::new();

        let check = SelfCheck::new(
            check_config(expected, 2),
            core,
            observer,
            Arc::new(NullNotifier),
            netenv::Broadcaster::new().subscribe(),
        );

        // The resolver answers correctly, but nothing ever reports the
        // nonce over the packet-observation channel, so the attempt must
        // time out and fail -- a resolver answer alone is not sufficient.
        assert!(!check.attempt().await);
    }

    #[tokio::test]
    async fn threshold_crossing_raises_and_clears_a_notification() {
        let expected = Ipv4Addr::new(10, 9, 9, 9);
        let core = build_core(expected).await;
        let (notifier, mut rx) = ChannelNotifier::new();
        let observer = ChannelNonceObserver::new();

        let check = SelfCheck::new(
            check_config(expected, 2),
            core,
            observer,
            Arc::new(notifier),
            netenv::Broadcaster::new().subscribe(),
        );

        check.record(false);
        assert!(!check.is_failing());
        check.record(false);
        assert!(check.is_failing());

        check.record(true);
        assert!(!check.is_failing());

        assert!(matches!(
            rx.recv().await,
            Some(intel_model::NotifierEvent::Notify(_))
        ));
        assert!(matches!(
            rx.recv().await,
            Some(intel_model::NotifierEvent::Clear(_))
        ));
    }

    #[tokio::test]
    async fn network_change_resets_failure_count_and_picks_short_retry() {
        let expected = Ipv4Addr::new(10, 2, 2, 2);
        let core = build_core(expected).await;
        let observer = ChannelNonceObserver::new();
        let broadcaster = netenv::Broadcaster::new();

        let check = SelfCheck::new(
            check_config(expected, 2),
            core,
            observer,
            Arc::new(NullNotifier),
            broadcaster.subscribe(),
        );

        check.record(false);
        assert_eq!(check.failure_count.load(Ordering::Relaxed), 1);

        broadcaster.fire();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let runner = tokio::spawn(check.clone().run(cancel_clone));

        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        let _ = runner.await;

        assert_eq!(check.failure_count.load(Ordering::Relaxed), 1);
    }
}
