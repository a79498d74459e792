//! Component construction and worker spawning.

use crate::config::{resolver_id, DaemonConfig, ResolverConfigEntry};
use compat_check::{ChannelNonceObserver, SelfCheck, SelfCheckConfig};
use conn_store::{ConnStoreConfig, FeedSender};
use intel_model::resolver::{ResolverDescriptor, ResolverScheme};
use intel_model::{NullNotifier, SharedNotifier};
use netenv::{InterfaceProvider, NetworkEnvironment, OnlineStatusConfig, StaticInterfaceProvider};
use resolver::{NetenvFailureSink, NetenvProbe, RegisteredResolver, ResolverCore, ResolverCoreConfig, ResolverRegistry};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use upstream::{ConnectionFailureSink, NullFailureSink, Upstream};

/// Swappable [`ConnectionFailureSink`] (§2 data flow: the upstream
/// transports and netenv's online monitor are mutually wired, so the
/// transports are built before netenv exists and told about it afterwards).
struct DeferredFailureSink {
    inner: parking_lot::RwLock<Arc<dyn ConnectionFailureSink>>,
}

impl DeferredFailureSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: parking_lot::RwLock::new(Arc::new(NullFailureSink)),
        })
    }

    fn set(&self, sink: Arc<dyn ConnectionFailureSink>) {
        *self.inner.write() = sink;
    }
}

impl ConnectionFailureSink for DeferredFailureSink {
    fn notify_connection_failed(&self, resolver_name: &str) {
        self.inner.read().notify_connection_failed(resolver_name);
    }
}

/// Handles the caller (an external `PacketSource`, out of scope here per
/// SPEC_FULL §1) needs to actually drive traffic through the system.
pub struct Handles {
    pub conn_feed: FeedSender,
    pub history_feed: Option<FeedSender>,
    pub resolver: Arc<ResolverCore>,
    pub netenv: Arc<NetworkEnvironment>,
    /// The query API's actual bound address, useful when `bind_addr` in the
    /// configuration used an ephemeral port (`:0`).
    pub query_api_addr: SocketAddr,
}

fn build_upstream(
    entry: &ResolverConfigEntry,
    failure_sink: Arc<dyn ConnectionFailureSink>,
    cancel: CancellationToken,
) -> anyhow::Result<Arc<dyn Upstream>> {
    let port = entry.port.unwrap_or_else(|| entry.scheme.default_port());
    let descriptor = ResolverDescriptor {
        id: resolver_id(entry.id),
        scheme: entry.scheme,
        scope: None,
        name: entry.name.clone(),
    };

    let upstream: Arc<dyn Upstream> = match entry.scheme {
        ResolverScheme::Dns => {
            let address: SocketAddr = format!("{}:{port}", entry.host).parse()?;
            Arc::new(upstream::udp::UdpUpstream::new(
                address,
                descriptor,
                entry.block_detection,
                failure_sink,
            ))
        }
        ResolverScheme::Tcp => {
            let address: SocketAddr = format!("{}:{port}", entry.host).parse()?;
            Arc::new(upstream::tcp::TcpUpstream::new(
                address,
                None,
                descriptor,
                entry.block_detection,
                failure_sink,
                cancel,
            ))
        }
        ResolverScheme::Dot => {
            let address: SocketAddr = format!("{}:{port}", entry.host).parse()?;
            Arc::new(upstream::tcp::TcpUpstream::new(
                address,
                entry.verify_domain.clone(),
                descriptor,
                entry.block_detection,
                failure_sink,
                cancel,
            ))
        }
        ResolverScheme::Doh => Arc::new(upstream::doh::DohUpstream::new(
            &entry.host,
            entry.port,
            entry.path.as_deref(),
            descriptor,
            entry.block_detection,
        )?),
    };

    Ok(upstream)
}

/// The `Resolver` model's address field is descriptive (displayed/cached
/// alongside the id); the actual DoH round trip goes through the host
/// string directly in [`upstream::doh::DohUpstream`], so a hostname here
/// (§6: "host... may be a hostname for doh") falls back to the unspecified
/// address rather than failing construction.
fn resolver_address(entry: &ResolverConfigEntry) -> anyhow::Result<SocketAddr> {
    let port = entry.port.unwrap_or_else(|| entry.scheme.default_port());
    if let Ok(ip) = entry.host.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    if entry.scheme == ResolverScheme::Doh {
        return Ok(SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), port));
    }
    anyhow::bail!("resolver {} ({:?}) requires a literal IP host", entry.name, entry.scheme)
}

/// Builds every long-lived collaborator and spawns its worker(s) under
/// `cancel`, returning the join handles plus the handles an external
/// packet-capture collaborator needs to feed connections in.
pub async fn run(config: DaemonConfig, cancel: CancellationToken) -> anyhow::Result<(Handles, Vec<tokio::task::JoinHandle<()>>)> {
    let dns_cache_store = dns_cache::Store::connect(dns_cache::StoreConfig {
        sqlite_path: config.dns_cache_sqlite_path.clone(),
    })
    .await?;

    let failure_sink = DeferredFailureSink::new();
    let registry = ResolverRegistry::new();

    let mut registered = Vec::with_capacity(config.resolvers.len());
    for entry in &config.resolvers {
        let upstream = build_upstream(entry, failure_sink.clone(), cancel.clone())?;
        let resolver = Arc::new(intel_model::Resolver::new(
            resolver_id(entry.id),
            entry.scheme,
            resolver_address(entry)?,
            entry.verify_domain.clone(),
            entry.search_domains.clone(),
            entry.search_only,
            entry.block_detection,
            entry.path.clone(),
            entry.source,
            entry.name.clone(),
        ));
        registered.push(RegisteredResolver { resolver, upstream });
    }

    if let Some(mdns_id) = config.mdns_resolver_id {
        let descriptor = ResolverDescriptor {
            id: resolver_id(mdns_id),
            scheme: ResolverScheme::Dns,
            scope: None,
            name: "mdns".to_string(),
        };
        let upstream: Arc<dyn Upstream> = Arc::new(resolver::MdnsResolver::new(descriptor.clone())?);
        let resolver = Arc::new(intel_model::Resolver::new(
            descriptor.id,
            ResolverScheme::Dns,
            resolver::mdns::MDNS_GROUP.parse()?,
            None,
            Vec::new(),
            false,
            intel_model::resolver::BlockDetection::Disabled,
            None,
            intel_model::resolver::ResolverSource::Mdns,
            "mdns".to_string(),
        ));
        registered.push(RegisteredResolver { resolver, upstream });
    }

    registry.reload(registered);

    let resolver_core = ResolverCore::new(
        registry,
        dns_cache_store.clone(),
        ResolverCoreConfig {
            mdns_id: config.mdns_resolver_id.map(resolver_id).unwrap_or(resolver_id(u64::MAX)),
            special_domains_allowed: config.special_domains_allowed,
            connectivity_domains: config.connectivity_domains.iter().cloned().collect::<HashSet<_>>(),
            connectivity_domains_enabled: config.connectivity_domains_enabled,
            ttl_bounds: Default::default(),
            env_reserved_ip: config.env_reserved_ip,
        },
    );

    resolver_core.reload_routing(
        config
            .scopes
            .iter()
            .map(|s| {
                let mut scope = intel_model::Scope::new(s.suffix.clone());
                scope.resolvers = s.resolver_ids.iter().copied().map(resolver_id).collect();
                scope
            })
            .collect(),
        config.local_resolver_ids.iter().copied().map(resolver_id).collect(),
        config.global_resolver_ids.iter().copied().map(resolver_id).collect(),
    );

    let interfaces: Arc<dyn InterfaceProvider> = Arc::new(StaticInterfaceProvider(Vec::new()));
    let netenv = NetworkEnvironment::new(
        OnlineStatusConfig::default(),
        interfaces,
        Arc::new(NetenvProbe(resolver_core.clone())),
        config.online_probe_destination,
    )?;

    resolver_core.attach_online_monitor(netenv.online.clone());
    failure_sink.set(Arc::new(NetenvFailureSink(netenv.online.clone())));

    let conn_store = conn_store::Store::connect(ConnStoreConfig {
        sqlite_path: config.conn_store_sqlite_path.clone(),
        cleanup_interval: config.conn_store_cleanup_interval(),
        retention: config.conn_store_retention(),
    })
    .await?;

    let (conn_feed, conn_worker) = conn_store::channel(conn_store.clone());
    let conn_cleanup = conn_store::Cleanup::new(
        conn_store.clone(),
        config.conn_store_cleanup_interval(),
        config.conn_store_retention(),
    );

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(conn_worker.run(cancel.clone())));
    tasks.push(tokio::spawn(conn_cleanup.run(cancel.clone())));
    tasks.push(tokio::spawn(netenv.clone().run(cancel.clone())));
    tasks.push(tokio::spawn(dns_cache_store.run(cancel.clone())));

    let history_feed = if let Some(history) = &config.history {
        let history_store = conn_store::Store::connect(ConnStoreConfig {
            sqlite_path: history.sqlite_path.clone(),
            cleanup_interval: config.conn_store_cleanup_interval(),
            retention: std::time::Duration::from_secs(history.retention_secs),
        })
        .await?;
        let (history_sender, history_worker) = conn_store::channel(history_store.clone());
        let history_cleanup = conn_store::Cleanup::new(
            history_store.clone(),
            config.conn_store_cleanup_interval(),
            std::time::Duration::from_secs(history.retention_secs),
        );
        tasks.push(tokio::spawn(history_worker.run(cancel.clone())));
        tasks.push(tokio::spawn(history_cleanup.run(cancel.clone())));
        Some(history_sender)
    } else {
        None
    };

    if config.self_check_enabled {
        let observer = ChannelNonceObserver::new();
        let notifier: SharedNotifier = Arc::new(NullNotifier);
        let self_check = SelfCheck::new(
            SelfCheckConfig::default(),
            resolver_core.clone(),
            observer,
            notifier,
            netenv.network_change.changed.subscribe(),
        );
        tasks.push(tokio::spawn(self_check.run(cancel.clone())));
    }

    let api_state = query_engine::QueryApiState::new(conn_store.pool().clone(), config.dev_mode);
    let router = query_engine::router(api_state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let query_api_addr = listener.local_addr()?;
    tracing::info!(addr = %query_api_addr, "query API listening");

    let serve_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            serve_cancel.cancelled().await;
        });
        if let Err(error) = server.await {
            tracing::error!(%error, "query API server exited with an error");
        }
    }));

    Ok((
        Handles {
            conn_feed,
            history_feed,
            resolver: resolver_core,
            netenv,
            query_api_addr,
        },
        tasks,
    ))
}
