//! Resolver core orchestration (§4.D).
//!
//! Ties together scope selection ([`crate::routing`]), per-query compliance
//! ([`crate::compliance`]), deduplication ([`crate::dedup`]), the live
//! resolver registry ([`crate::registry`]), the persistent answer cache
//! (`dns-cache`), and response shaping ([`crate::shaping`]) into the single
//! `Resolve(query)` entry point the rest of the system calls.

use crate::compliance::is_compliant;
use crate::dedup::{DedupMap, Outcome};
use crate::registry::{RegisteredResolver, ResolverRegistry};
use crate::routing::{self, RouteDecision, RoutingTable};
use crate::special_names;
use dns_cache::Store;
use intel_model::name_record::{to_name_record, DATABASE_OVERTIME_SECS};
use intel_model::rrcache::{unix_now, TtlBounds};
use intel_model::{NameRecord, Query, RRCache, RecordType, ResolveOutcome, ResolverError, Scope};
use intel_model::resolver::ResolverId;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use upstream::ConnectionFailureSink;

/// How the caller's query is allowed to flow once it leaves scope selection
/// (§2, §4.A/§4.D shared state). Mutated only on reload (§5).
struct RoutingState {
    scopes: Vec<Scope>,
    local_resolver_ids: Vec<ResolverId>,
    global_resolver_ids: Vec<ResolverId>,
}

pub struct ResolverCoreConfig {
    pub mdns_id: ResolverId,
    pub special_domains_allowed: bool,
    /// Domains consulted by the online-status / self-check probes; queries
    /// against them bypass the offline guard (§4.D "Orchestration").
    pub connectivity_domains: HashSet<String>,
    /// If false, a connectivity-domain query is rejected outright rather
    /// than bypassing the offline guard (§7 `ErrTestDomainsDisabled`).
    pub connectivity_domains_enabled: bool,
    pub ttl_bounds: TtlBounds,
    /// Answer handed out for the internal reserved TLD's env-resolver
    /// (§6: "Private reserved TLD for internal special-use domain").
    pub env_reserved_ip: Option<Ipv4Addr>,
}

/// Component D: the resolver core (§4.D).
pub struct ResolverCore {
    registry: Arc<ResolverRegistry>,
    store: Arc<Store>,
    dedup: Arc<DedupMap>,
    routing: RwLock<RoutingState>,
    /// Netenv's online-status handle, wired in after both services exist.
    ///
    /// `NetworkEnvironment::new` needs a [`netenv::DnsProbe`] implementation
    /// (this core, see [`NetenvProbe`]) before it can construct its
    /// `OnlineStatusMonitor`, so the two services cannot be built in either
    /// order alone; the daemon builds both, then calls
    /// [`ResolverCore::attach_online_monitor`] once. Before that call the
    /// offline guard treats the device as online (§4.D: no recognised
    /// connectivity-test domain is rejected before there is anything to
    /// check connectivity against).
    online: RwLock<Option<Arc<netenv::OnlineStatusMonitor>>>,
    config: ResolverCoreConfig,
}

impl ResolverCore {
    pub fn new(registry: Arc<ResolverRegistry>, store: Arc<Store>, config: ResolverCoreConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            dedup: DedupMap::new(),
            routing: RwLock::new(RoutingState {
                scopes: Vec::new(),
                local_resolver_ids: Vec::new(),
                global_resolver_ids: Vec::new(),
            }),
            online: RwLock::new(None),
            config,
        })
    }

    /// Completes the two services' mutual-wiring bootstrap (see the `online`
    /// field's docs).
    pub fn attach_online_monitor(&self, monitor: Arc<netenv::OnlineStatusMonitor>) {
        *self.online.write() = Some(monitor);
    }

    /// Replaces the scope/resolver-group tables atomically (§5: "mutation
    /// happens only during reload"). Called in response to netenv's
    /// network-change events (§2 data flow).
    pub fn reload_routing(&self, scopes: Vec<Scope>, local_resolver_ids: Vec<ResolverId>, global_resolver_ids: Vec<ResolverId>) {
        let mut scopes = scopes;
        intel_model::scope::sort_scopes_most_specific_first(&mut scopes);
        let mut state = self.routing.write();
        state.scopes = scopes;
        state.local_resolver_ids = local_resolver_ids;
        state.global_resolver_ids = global_resolver_ids;
    }

    /// `Resolve(query)` (§4.D). The single entry point every caller uses.
    pub async fn resolve(self: &Arc<Self>, query: &Query) -> Result<RRCache, ResolverError> {
        if let Some(cache) = self.synthetic_answer(query)? {
            return Ok(cache);
        }

        self.offline_guard(query)?;

        let route = {
            let state = self.routing.read();
            let table = RoutingTable {
                scopes: &state.scopes,
                local_resolver_ids: &state.local_resolver_ids,
                mdns_id: self.config.mdns_id,
                global_resolver_ids: &state.global_resolver_ids,
                special_domains_allowed: self.config.special_domains_allowed,
                env_reserved_tld: special_names::INTERNAL_RESERVED_TLD,
            };
            routing::route(query, &table)
        };

        let mut candidate_ids = match route {
            RouteDecision::Resolvers(ids) => ids,
            RouteDecision::SpecialDomainsDisabled => {
                return Err(RouteDecision::SpecialDomainsDisabled
                    .as_blocking_error()
                    .expect("SpecialDomainsDisabled maps to an error"));
            }
            // Synthetic decisions are all handled by `synthetic_answer` above;
            // `route` only reaches here for the env-reserved TLD when no
            // answer was configured, which the special-name check already
            // folded into NXDOMAIN.
            RouteDecision::SyntheticLocalhost
            | RouteDecision::SyntheticInvalid
            | RouteDecision::SyntheticEnvReserved => Vec::new(),
        };

        if query.local_resolvers_only() {
            let state = self.routing.read();
            let local: HashSet<ResolverId> = state.local_resolver_ids.iter().copied().collect();
            candidate_ids.retain(|id| local.contains(id) || *id == self.config.mdns_id);
        }

        let registered = self.registry.get_many(&candidate_ids);
        let candidates: Vec<Arc<RegisteredResolver>> = registered
            .into_iter()
            .filter(|r| is_compliant(&r.resolver, query))
            .collect();

        if candidates.is_empty() {
            return Err(ResolverError::NoCompliance);
        }

        if !query.caching() {
            return self
                .orchestrate(&candidates, query, query.ignore_failing())
                .await;
        }

        if let Some(cache) = self.serve_from_cache(query, &candidates).await {
            return Ok(cache);
        }

        self.resolve_via_dedup(query, &candidates).await
    }

    /// §4.D steps 1-2 and the env-reserved TLD: answers that never consult
    /// an upstream. Returns `Ok(None)` when the query does not match any
    /// synthetic scope.
    fn synthetic_answer(&self, query: &Query) -> Result<Option<RRCache>, ResolverError> {
        let fqdn = query.fqdn_dot_prefixed();
        let domain = query
            .as_domain_name()
            .ok_or(ResolverError::Failure)?;

        if special_names::matches_localhost(fqdn) {
            return Ok(Some(special_names::localhost_answer(&domain, query.qtype())));
        }

        if fqdn.ends_with(special_names::INTERNAL_RESERVED_TLD) {
            return Ok(Some(match self.config.env_reserved_ip {
                Some(ip) => special_names::env_reserved_answer(&domain, query.qtype(), ip),
                None => special_names::nxdomain(&domain, query.qtype(), "env-reserved"),
            }));
        }

        if special_names::matches_invalid(fqdn) {
            return Ok(Some(special_names::nxdomain(&domain, query.qtype(), "invalid")));
        }

        Ok(None)
    }

    /// Offline guard (§4.D "Orchestration"): reject non-connectivity-domain
    /// queries while the device is offline, without touching an upstream.
    fn offline_guard(&self, query: &Query) -> Result<(), ResolverError> {
        let is_connectivity_domain = self.is_connectivity_domain(query.fqdn());

        if is_connectivity_domain && !self.config.connectivity_domains_enabled {
            return Err(ResolverError::TestDomainsDisabled);
        }

        let is_offline = self
            .online
            .read()
            .as_ref()
            .is_some_and(|monitor| monitor.status() == netenv::OnlineStatus::Offline);

        if is_offline && !is_connectivity_domain {
            return Err(ResolverError::Offline);
        }

        Ok(())
    }

    fn is_connectivity_domain(&self, fqdn: &str) -> bool {
        self.config.connectivity_domains.contains(fqdn)
    }

    async fn serve_from_cache(&self, query: &Query, candidates: &[Arc<RegisteredResolver>]) -> Option<RRCache> {
        let stored = self.store.get(query.fqdn(), query.qtype()).await?;
        let now = unix_now();

        // `NameRecord::expires` already carries the 14-day database-overtime
        // (§3); the original RRCache expiry is that minus the overtime.
        let original_expiry = stored.expires.saturating_sub(DATABASE_OVERTIME_SECS);
        if now >= stored.expires {
            return None;
        }

        let descriptor_live = self.registry.resolve_descriptor(&stored.resolver).is_some();
        if !descriptor_live {
            return None;
        }

        let mut cache = name_record_to_rrcache(&stored, original_expiry);

        if now < original_expiry {
            self.shape_before_return(&mut cache);
            return Some(cache);
        }

        cache.flags.requesting_new = true;
        self.spawn_stale_refresh(query.clone(), candidates.to_vec());
        self.shape_before_return(&mut cache);
        Some(cache)
    }

    /// §4.D "Cache policy": "always-stale-cache" async re-resolution. Writes
    /// through the same dedupe map a synchronous caller would use.
    fn spawn_stale_refresh(self: &Arc<Self>, query: Query, candidates: Vec<Arc<RegisteredResolver>>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(error) = this.resolve_via_dedup(&query, &candidates).await {
                tracing::debug!(%error, fqdn = query.fqdn(), "stale-serve async refresh failed");
            }
        });
    }

    async fn resolve_via_dedup(self: &Arc<Self>, query: &Query, candidates: &[Arc<RegisteredResolver>]) -> Result<RRCache, ResolverError> {
        match self.dedup.join(&query.dedup_key()).await {
            Outcome::Leader(leader) => {
                let result = self.orchestrate(candidates, query, query.ignore_failing()).await;
                if let Ok(cache) = &result {
                    self.persist(query, cache).await;
                }
                leader.finish();
                result.map(|mut cache| {
                    self.shape_before_return(&mut cache);
                    cache
                })
            }
            Outcome::Followed => {
                if let Some(mut cache) = self.store.get(query.fqdn(), query.qtype()).await.map(|nr| {
                    let expiry = nr.expires.saturating_sub(DATABASE_OVERTIME_SECS);
                    name_record_to_rrcache(&nr, expiry)
                }) {
                    self.shape_before_return(&mut cache);
                    return Ok(cache);
                }

                // Still a miss after the first resolver finished: proceed
                // independently, no hand-back of the first result (§4.D
                // "Deduplication": "cache may have been populated
                // non-compliantly").
                let result = self.orchestrate(candidates, query, query.ignore_failing()).await;
                if let Ok(cache) = &result {
                    self.persist(query, cache).await;
                }
                result.map(|mut cache| {
                    self.shape_before_return(&mut cache);
                    cache
                })
            }
        }
    }

    async fn persist(&self, query: &Query, cache: &RRCache) {
        let mut cache = cache.clone();
        let is_connectivity_domain = self.is_connectivity_domain(query.fqdn());
        cache.clean(unix_now(), self.config.ttl_bounds, is_connectivity_domain);
        self.store.save(to_name_record(&cache)).await;
    }

    fn shape_before_return(&self, cache: &mut RRCache) {
        let mut rng = StdRng::from_entropy();
        crate::shaping::shuffle_answers(&mut cache.answers, &mut rng);
        crate::shaping::rewrite_non_canonical_name(cache);
    }

    /// Two-pass orchestration over `candidates` (§4.D "Orchestration",
    /// §9 Open Question: the two-pass variant is the one this crate
    /// implements, per the spec's own note that it is "the later revision").
    async fn orchestrate(&self, candidates: &[Arc<RegisteredResolver>], query: &Query, ignore_failing: bool) -> Result<RRCache, ResolverError> {
        if !ignore_failing {
            match self.try_pass(candidates, query, true).await {
                ResolveOutcome::Success(cache) => return Ok(cache),
                ResolveOutcome::Stop(error) => return Err(error),
                ResolveOutcome::Continue => {}
            }
        }

        match self.try_pass(candidates, query, false).await {
            ResolveOutcome::Success(cache) => Ok(cache),
            ResolveOutcome::Stop(error) => Err(error),
            ResolveOutcome::Continue => Err(ResolverError::Failure),
        }
    }

    async fn try_pass(&self, candidates: &[Arc<RegisteredResolver>], query: &Query, skip_failing: bool) -> ResolveOutcome<RRCache> {
        for registered in candidates {
            if skip_failing && registered.upstream.is_failing() {
                continue;
            }

            match registered.upstream.query(query).await {
                Ok(cache) => {
                    if let Some(error) = self.reject_rebound_localhost(query, &cache) {
                        tracing::warn!(resolver = %registered.resolver.name, "upstream answer rebinds to localhost, rejecting");
                        return ResolveOutcome::Stop(error);
                    }
                    return ResolveOutcome::Success(cache);
                }
                Err(error) if error.is_authoritative() => return ResolveOutcome::Stop(error),
                Err(error) => {
                    tracing::debug!(resolver = %registered.resolver.name, %error, "candidate resolver failed, continuing");
                    continue;
                }
            }
        }

        ResolveOutcome::Continue
    }

    /// DNS-rebinding guard: an upstream answer that resolves a non-
    /// `*.localhost.` name to a loopback address is dropped rather than
    /// trusted (`ResolverError::Localhost` in the failure-mode taxonomy).
    fn reject_rebound_localhost(&self, query: &Query, cache: &RRCache) -> Option<ResolverError> {
        if special_names::matches_localhost(query.fqdn_dot_prefixed()) {
            return None;
        }

        let rebinds = cache.answers.iter().any(|record| match record.kind {
            RecordType::A if record.rdata.len() == 4 => {
                Ipv4Addr::new(record.rdata[0], record.rdata[1], record.rdata[2], record.rdata[3]).is_loopback()
            }
            RecordType::Aaaa if record.rdata.len() == 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&record.rdata);
                Ipv6Addr::from(octets).is_loopback()
            }
            _ => false,
        });

        rebinds.then_some(ResolverError::Localhost)
    }
}

/// Reconstructs an in-memory [`RRCache`] from its persisted [`NameRecord`]
/// form, for stale-serve. `original_expiry` is the caller-computed
/// pre-database-overtime expiry (§3).
fn name_record_to_rrcache(record: &NameRecord, original_expiry: u64) -> RRCache {
    use std::str::FromStr;

    let domain = intel_model::DomainName::from_str(&record.domain)
        .unwrap_or_else(|_| intel_model::DomainName::from_str(".").expect("root name always parses"));
    let qtype = record
        .question
        .parse::<u16>()
        .map(RecordType::from)
        .unwrap_or(RecordType::A);
    let response_code = parse_rcode(&record.rcode);

    RRCache {
        domain,
        question_type: qtype,
        response_code,
        answers: dns_cache::text::parse_section(&record.answer),
        authority: dns_cache::text::parse_section(&record.ns),
        additional: dns_cache::text::parse_section(&record.extra),
        expiry: original_expiry,
        resolver: record.resolver.clone(),
        flags: intel_model::rrcache::PresentationFlags {
            served_from_cache: true,
            ..Default::default()
        },
    }
}

fn parse_rcode(text: &str) -> intel_model::ResponseCode {
    match text {
        "NXDOMAIN" => intel_model::ResponseCode::NXDOMAIN,
        "SERVFAIL" => intel_model::ResponseCode::SERVFAIL,
        "REFUSED" => intel_model::ResponseCode::REFUSED,
        _ => intel_model::ResponseCode::NOERROR,
    }
}

impl ResolverCore {
    /// The actual DNS probe used by netenv's online-status check (§4.A step
    /// 4). A thin, cache-bypassing resolve of a single `A` record.
    pub async fn probe_a(self: &Arc<Self>, domain: &str) -> anyhow::Result<Option<IpAddr>> {
        let query = Query::new(domain, RecordType::A, intel_model::SecurityLevel::Relaxed).with_caching(false);
        match self.resolve(&query).await {
            Ok(cache) => Ok(first_answer_ip(&cache)),
            Err(ResolverError::NotFound) | Err(ResolverError::Blocked) => Ok(None),
            Err(error) => Err(anyhow::anyhow!(error)),
        }
    }
}

/// Implements netenv's [`netenv::DnsProbe`] boundary trait (§2 data flow:
/// "Netenv(A) asks D to resolve domains during online-status checks"),
/// without netenv depending on this crate. A thin `Arc<ResolverCore>`
/// wrapper rather than an impl directly on `ResolverCore`, since `DnsProbe`
/// takes `&self` and [`ResolverCore::probe_a`] needs `self: Arc<Self>` to
/// recurse through [`ResolverCore::resolve`]'s stale-refresh spawns.
pub struct NetenvProbe(pub Arc<ResolverCore>);

#[async_trait::async_trait]
impl netenv::DnsProbe for NetenvProbe {
    async fn probe_a(&self, domain: &str) -> anyhow::Result<Option<IpAddr>> {
        self.0.probe_a(domain).await
    }
}

fn first_answer_ip(cache: &RRCache) -> Option<IpAddr> {
    cache.answers.iter().find_map(|record| match record.kind {
        RecordType::A if record.rdata.len() == 4 => Some(IpAddr::from(Ipv4Addr::new(
            record.rdata[0],
            record.rdata[1],
            record.rdata[2],
            record.rdata[3],
        ))),
        RecordType::Aaaa if record.rdata.len() == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&record.rdata);
            Some(IpAddr::from(Ipv6Addr::from(octets)))
        }
        _ => None,
    })
}

/// Bridges upstream transport failures to netenv's coalesced recheck
/// trigger (§2: the same inversion of control as `DnsProbe`, running the
/// other way).
pub struct NetenvFailureSink(pub Arc<netenv::OnlineStatusMonitor>);

impl ConnectionFailureSink for NetenvFailureSink {
    fn notify_connection_failed(&self, resolver_name: &str) {
        tracing::debug!(resolver = resolver_name, "upstream connection failed, triggering online recheck");
        self.0.trigger_recheck();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intel_model::resolver::{BlockDetection, ResolverScheme, ResolverSource};
    use intel_model::SecurityLevel;
    use std::str::FromStr;

    struct StaticUpstream {
        cache: RRCache,
    }

    #[async_trait::async_trait]
    impl upstream::Upstream for StaticUpstream {
        async fn query(&self, _query: &Query) -> Result<RRCache, ResolverError> {
            Ok(self.cache.clone())
        }
        fn is_failing(&self) -> bool {
            false
        }
        fn report_failure(&self) {}
        fn report_healthy(&self) {}
    }

    fn sample_cache() -> RRCache {
        RRCache {
            domain: intel_model::DomainName::from_str("example.com.").unwrap(),
            question_type: RecordType::A,
            response_code: intel_model::ResponseCode::NOERROR,
            answers: vec![intel_model::rrcache::RawRecord {
                name: intel_model::DomainName::from_str("example.com.").unwrap(),
                kind: RecordType::A,
                class: 1,
                ttl: 3600,
                rdata: vec![93, 184, 216, 34],
                text: "example.com. 3600 IN A 93.184.216.34".to_string(),
            }],
            authority: vec![],
            additional: vec![],
            expiry: 0,
            resolver: intel_model::resolver::ResolverDescriptor {
                id: ResolverId(1),
                scheme: ResolverScheme::Dns,
                scope: None,
                name: "test".to_string(),
            },
            flags: Default::default(),
        }
    }

    async fn build_core() -> (Arc<ResolverCore>, ResolverId) {
        let registry = ResolverRegistry::new();
        let resolver = Arc::new(intel_model::resolver::Resolver::new(
            ResolverId(1),
            ResolverScheme::Dns,
            "1.1.1.1:53".parse().unwrap(),
            None,
            vec![],
            false,
            BlockDetection::Disabled,
            None,
            ResolverSource::Configured,
            "test".to_string(),
        ));
        registry.reload(vec![RegisteredResolver {
            resolver: resolver.clone(),
            upstream: Arc::new(StaticUpstream { cache: sample_cache() }),
        }]);

        let store = Store::connect(dns_cache::StoreConfig::default()).await.unwrap();
        let core = ResolverCore::new(
            registry,
            store,
            ResolverCoreConfig {
                mdns_id: ResolverId(99),
                special_domains_allowed: true,
                connectivity_domains: HashSet::new(),
                connectivity_domains_enabled: true,
                ttl_bounds: TtlBounds::default(),
                env_reserved_ip: None,
            },
        );
        core.reload_routing(vec![], vec![], vec![ResolverId(1)]);
        (core, ResolverId(1))
    }

    #[tokio::test]
    async fn localhost_query_never_touches_a_resolver() {
        let (core, _) = build_core().await;
        let query = Query::new("foo.localhost.", RecordType::A, SecurityLevel::Normal);
        let cache = core.resolve(&query).await.unwrap();
        assert_eq!(cache.answers[0].rdata, vec![127, 0, 0, 1]);
    }

    #[tokio::test]
    async fn global_query_resolves_and_caches() {
        let (core, _) = build_core().await;
        let query = Query::new("example.com.", RecordType::A, SecurityLevel::Normal);
        let cache = core.resolve(&query).await.unwrap();
        assert_eq!(cache.answers[0].rdata, vec![93, 184, 216, 34]);

        let cached = core.store.get("example.com.", RecordType::A).await;
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn invalid_tld_is_nxdomain_without_a_resolver() {
        let (core, _) = build_core().await;
        let query = Query::new("bar.invalid.", RecordType::A, SecurityLevel::Normal);
        let cache = core.resolve(&query).await.unwrap();
        assert_eq!(cache.response_code, intel_model::ResponseCode::NXDOMAIN);
    }

    #[tokio::test]
    async fn special_service_tld_errors_when_disabled() {
        let query = Query::new(
            "facebookcorewwwi.onion.",
            RecordType::A,
            SecurityLevel::Normal,
        );

        let registry = ResolverRegistry::new();
        let store = Store::connect(dns_cache::StoreConfig::default()).await.unwrap();
        let disabled = ResolverCore::new(
            registry,
            store,
            ResolverCoreConfig {
                mdns_id: ResolverId(99),
                special_domains_allowed: false,
                connectivity_domains: HashSet::new(),
                connectivity_domains_enabled: true,
                ttl_bounds: TtlBounds::default(),
                env_reserved_ip: None,
            },
        );

        let result = disabled.resolve(&query).await;
        assert!(matches!(result, Err(ResolverError::SpecialDomainsDisabled)));
    }
}
