use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wire transport a [`Resolver`] speaks (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ResolverScheme {
    Dns,
    Tcp,
    Dot,
    Doh,
}

impl ResolverScheme {
    pub fn default_port(&self) -> u16 {
        match self {
            ResolverScheme::Dns | ResolverScheme::Tcp => 53,
            ResolverScheme::Dot => 853,
            ResolverScheme::Doh => 443,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, ResolverScheme::Dot | ResolverScheme::Doh)
    }
}

/// Upstream-block detection heuristic mode (§3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum BlockDetection {
    #[default]
    Disabled,
    EmptyAnswer,
    Refused,
    ZeroIp,
}

/// Where a resolver came from, relevant to per-query compliance (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ResolverSource {
    /// Explicitly configured upstream.
    Configured,
    /// Learned from the operating system's resolver configuration.
    OperatingSystem,
    /// The local mDNS responder.
    Mdns,
}

/// Stable identifier for a [`Resolver`], used to break the cyclic
/// resolver -> cache -> resolver-info ownership (§9 design note: "Cyclic
/// ownership"). Cache records only ever store a [`ResolverDescriptor`];
/// the live [`Resolver`] is looked up through a registry by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ResolverId(pub u64);

/// Immutable, persistable stand-in for a [`Resolver`] (§3 "resolver info").
///
/// Stored inside [`crate::RRCache`]/[`crate::NameRecord`] instead of a live
/// `Resolver` reference so cache entries remain plain data. A descriptor
/// whose `id` is no longer present in the registry is treated as stale and
/// the cache entry is ignored (§9).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResolverDescriptor {
    pub id: ResolverId,
    pub scheme: ResolverScheme,
    pub scope: Option<String>,
    pub name: String,
}

/// Configuration-derived resolver value (§3).
#[derive(Debug)]
pub struct Resolver {
    pub id: ResolverId,
    pub scheme: ResolverScheme,
    pub address: std::net::SocketAddr,
    pub verify_domain: Option<String>,
    pub search_domains: Vec<String>,
    pub search_only: bool,
    pub block_detection: BlockDetection,
    pub path: Option<String>,
    pub source: ResolverSource,
    pub name: String,
    /// FQDN this resolver must never be asked to resolve (prevents DoH
    /// bootstrap self-resolution loops, §4.D compliance).
    pub skip_fqdn: Option<String>,
    last_failure_unix_ms: AtomicI64,
}

impl Resolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ResolverId,
        scheme: ResolverScheme,
        address: std::net::SocketAddr,
        verify_domain: Option<String>,
        search_domains: Vec<String>,
        search_only: bool,
        block_detection: BlockDetection,
        path: Option<String>,
        source: ResolverSource,
        name: String,
    ) -> Self {
        Self {
            id,
            scheme,
            address,
            verify_domain,
            search_domains,
            search_only,
            block_detection,
            path,
            source,
            name,
            skip_fqdn: None,
            last_failure_unix_ms: AtomicI64::new(0),
        }
    }

    pub fn descriptor(&self) -> ResolverDescriptor {
        ResolverDescriptor {
            id: self.id,
            scheme: self.scheme,
            scope: self.search_domains.first().cloned(),
            name: self.name.clone(),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.address.ip()
    }

    pub fn mark_failing(&self) {
        let now = now_unix_ms();
        self.last_failure_unix_ms.store(now, Ordering::Relaxed);
    }

    pub fn mark_healthy(&self) {
        self.last_failure_unix_ms.store(0, Ordering::Relaxed);
    }

    /// True while this resolver is inside its failure cooldown window.
    ///
    /// The cooldown itself (how long "failing" lasts) is owned by the
    /// `upstream` crate's per-transport failure accounting; this just
    /// exposes the raw timestamp so orchestration can make its own call.
    pub fn is_failing(&self, cooldown_ms: i64) -> bool {
        let last = self.last_failure_unix_ms.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        now_unix_ms().saturating_sub(last) < cooldown_ms
    }

    pub fn last_failure_unix_ms(&self) -> i64 {
        self.last_failure_unix_ms.load(Ordering::Relaxed)
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
