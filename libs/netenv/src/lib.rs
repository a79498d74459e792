//! Network environment service (§3, §4.A): interface/gateway enumeration,
//! the online-status state machine, network-change detection, and
//! device-location approximation, wired together behind one shared handle.

pub mod flag;
pub mod interfaces;
pub mod location;
pub mod network_change;
pub mod online_status;

pub use flag::{Broadcaster, Flag};
pub use interfaces::{InterfaceAddr, InterfaceProvider, StaticInterfaceProvider};
pub use network_change::NetworkChangeDetector;
pub use online_status::{CaptivePortal, DnsProbe, OnlineStatus, OnlineStatusConfig, OnlineStatusMonitor};

use intel_model::device_location::DeviceLocation;
use parking_lot::RwLock;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// `myNetworks` refresh floor (§4.A): interface enumeration is cheap but
/// not free, so reads within this window return the cached snapshot.
const MY_NETWORKS_REFRESH_FLOOR: Duration = Duration::from_secs(1);

struct CachedNetworks {
    addrs: Vec<InterfaceAddr>,
    fetched_at: Instant,
}

/// Top-level handle for component A. Owns the online-status monitor and the
/// network-change detector (two independent workers, see
/// [`network_change`]'s module docs), plus the `myNetworks` read cache and
/// the last computed device-location set.
pub struct NetworkEnvironment {
    interfaces: Arc<dyn InterfaceProvider>,
    pub online: Arc<OnlineStatusMonitor>,
    pub network_change: Arc<NetworkChangeDetector>,
    my_networks: RwLock<Option<CachedNetworks>>,
    locations: RwLock<Vec<DeviceLocation>>,
    probe_destination: Ipv4Addr,
}

impl NetworkEnvironment {
    pub fn new(
        config: OnlineStatusConfig,
        interfaces: Arc<dyn InterfaceProvider>,
        dns_probe: Arc<dyn DnsProbe>,
        probe_destination: Ipv4Addr,
    ) -> anyhow::Result<Arc<Self>> {
        let online = Arc::new(OnlineStatusMonitor::new(
            config,
            interfaces.clone(),
            dns_probe,
        )?);
        let network_change = Arc::new(NetworkChangeDetector::new(interfaces.clone(), online.clone()));

        Ok(Arc::new(Self {
            interfaces,
            online,
            network_change,
            my_networks: RwLock::new(None),
            locations: RwLock::new(Vec::new()),
            probe_destination,
        }))
    }

    /// Returns the current set of local interface addresses, refreshed at
    /// most once per [`MY_NETWORKS_REFRESH_FLOOR`].
    pub fn my_networks(&self) -> Vec<InterfaceAddr> {
        {
            let cached = self.my_networks.read();
            if let Some(c) = cached.as_ref() {
                if c.fetched_at.elapsed() < MY_NETWORKS_REFRESH_FLOOR {
                    return c.addrs.clone();
                }
            }
        }

        let addrs = self.interfaces.current();
        *self.my_networks.write() = Some(CachedNetworks {
            addrs: addrs.clone(),
            fetched_at: Instant::now(),
        });
        addrs
    }

    pub fn device_locations(&self) -> Vec<DeviceLocation> {
        self.locations.read().clone()
    }

    /// Recomputes the device-location set via traceroute + interface
    /// addresses + timezone fallback (§4.A), storing the result for
    /// [`NetworkEnvironment::device_locations`].
    pub async fn refresh_locations(&self) -> anyhow::Result<()> {
        let global: Vec<std::net::IpAddr> = self
            .my_networks()
            .into_iter()
            .filter(|i| i.is_global())
            .map(|i| i.address)
            .collect();

        let locations = location::locate(self.probe_destination, global).await?;
        *self.locations.write() = locations;
        Ok(())
    }

    /// Runs the online-status monitor and network-change detector workers
    /// until `cancel` fires, plus a coarse periodic location refresh.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let online_task = tokio::spawn(self.online.clone().run(cancel.clone()));
        let change_task = tokio::spawn(self.network_change.clone().run(cancel.clone()));

        let location_task = tokio::spawn({
            let this = self.clone();
            let cancel = cancel.clone();
            async move {
                loop {
                    if let Err(error) = this.refresh_locations().await {
                        tracing::warn!(%error, "device-location refresh failed");
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(300)) => {}
                    }
                }
            }
        });

        let _ = tokio::join!(online_task, change_task, location_task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    struct NeverResolves;

    #[async_trait::async_trait]
    impl DnsProbe for NeverResolves {
        async fn probe_a(&self, _domain: &str) -> anyhow::Result<Option<IpAddr>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn my_networks_serves_cached_snapshot_within_refresh_floor() {
        let interfaces: Arc<dyn InterfaceProvider> = Arc::new(StaticInterfaceProvider(vec![InterfaceAddr {
            interface_name: "eth0".into(),
            flags: 0,
            address: "10.0.0.5".parse().unwrap(),
        }]));

        let env = NetworkEnvironment::new(
            OnlineStatusConfig::default(),
            interfaces,
            Arc::new(NeverResolves),
            "1.1.1.1".parse().unwrap(),
        )
        .unwrap();

        let first = env.my_networks();
        let second = env.my_networks();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].address, second[0].address);
    }
}
