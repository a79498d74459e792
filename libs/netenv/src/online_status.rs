use crate::flag::Broadcaster;
use crate::interfaces::InterfaceProvider;
use parking_lot::RwLock;
use rand::Rng;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Process-wide online status (§3, §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum OnlineStatus {
    Unknown = 0,
    Offline = 1,
    Limited = 2,
    Portal = 3,
    SemiOnline = 4,
    Online = 5,
}

impl OnlineStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => OnlineStatus::Offline,
            2 => OnlineStatus::Limited,
            3 => OnlineStatus::Portal,
            4 => OnlineStatus::SemiOnline,
            5 => OnlineStatus::Online,
            _ => OnlineStatus::Unknown,
        }
    }

    /// Recheck period for the current state (§4.A). `None` means "no timer".
    fn recheck_period(&self) -> Option<Duration> {
        let mut rng = rand::thread_rng();
        match self {
            OnlineStatus::Offline => Some(Duration::from_secs(rng.gen_range(5..=10))),
            OnlineStatus::Limited | OnlineStatus::Portal => {
                Some(Duration::from_secs(rng.gen_range(10..=60)))
            }
            OnlineStatus::SemiOnline => Some(Duration::from_secs(rng.gen_range(60..=300))),
            OnlineStatus::Online | OnlineStatus::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptivePortal {
    pub url: Option<String>,
    pub domain: Option<String>,
    pub ip: Option<IpAddr>,
}

impl CaptivePortal {
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.domain.is_none() && self.ip.is_none()
    }
}

/// Injected collaborator for the DNS probe in step 4 of the online-status
/// check (§4.A). Implemented by the resolver core; kept as a trait here so
/// `netenv` never depends on the `resolver` crate (that dependency runs the
/// other way: resolver reloads its upstream set from netenv's change
/// events).
#[async_trait::async_trait]
pub trait DnsProbe: Send + Sync {
    async fn probe_a(&self, domain: &str) -> anyhow::Result<Option<IpAddr>>;
}

pub struct OnlineStatusConfig {
    pub test_url: String,
    pub probe_domain: String,
    pub expected_ip: IpAddr,
}

impl Default for OnlineStatusConfig {
    fn default() -> Self {
        Self {
            test_url: "http://netenv-check.invalid/generate_204".to_string(),
            probe_domain: "netenv-check.invalid.".to_string(),
            expected_ip: IpAddr::from([127, 0, 0, 1]),
        }
    }
}

/// Owns the authoritative online status and drives the state-machine
/// worker loop described in §4.A.
pub struct OnlineStatusMonitor {
    config: OnlineStatusConfig,
    interfaces: Arc<dyn InterfaceProvider>,
    dns_probe: Arc<dyn DnsProbe>,
    http: reqwest::Client,
    /// Read-mostly fast-path cache of the authoritative status (§9: "the
    /// atomic 'online' fast-path bool is a read-mostly cache of the
    /// authoritative integer status and is derived, not primary").
    fast_path: AtomicU8,
    portal: RwLock<CaptivePortal>,
    trigger: Notify,
    pub network_changed: Broadcaster,
}

impl OnlineStatusMonitor {
    pub fn new(
        config: OnlineStatusConfig,
        interfaces: Arc<dyn InterfaceProvider>,
        dns_probe: Arc<dyn DnsProbe>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            config,
            interfaces,
            dns_probe,
            http,
            fast_path: AtomicU8::new(OnlineStatus::Unknown as u8),
            portal: RwLock::new(CaptivePortal::default()),
            trigger: Notify::new(),
            network_changed: Broadcaster::new(),
        })
    }

    pub fn status(&self) -> OnlineStatus {
        OnlineStatus::from_u8(self.fast_path.load(Ordering::Relaxed))
    }

    pub fn is_online_fast_path(&self) -> bool {
        self.status() == OnlineStatus::Online
    }

    pub fn captive_portal(&self) -> CaptivePortal {
        self.portal.read().clone()
    }

    /// Coalesced explicit recheck trigger: "extra sends are dropped" (§4.A).
    pub fn trigger_recheck(&self) {
        self.trigger.notify_one();
    }

    /// The worker loop. Runs until `cancel` is triggered.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let previous = self.status();
            let next = self.check_once().await;
            self.fast_path.store(next as u8, Ordering::Relaxed);

            if next != previous {
                tracing::info!(?previous, ?next, "online status changed");
                // Captive-portal substate is already updated by `check_once`
                // before this point, so this publish happens strictly after
                // it (§5 ordering guarantee).
            }

            self.network_changed.fire();

            let sleep = match next.recheck_period() {
                Some(d) => d,
                None => Duration::from_secs(3600), // effectively "no timer"
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.trigger.notified() => {}
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }

    /// Runs exactly one iteration of the check described in §4.A.
    pub async fn check_once(&self) -> OnlineStatus {
        let interfaces = self.interfaces.current();

        // Step 1: any global IPv4 -> Online immediately.
        if interfaces.iter().any(|i| i.is_global_ipv4()) {
            *self.portal.write() = CaptivePortal::default();
            return OnlineStatus::Online;
        }

        // Step 2: only site-local present -> proceed; nothing -> Offline.
        if !interfaces.iter().any(|i| i.is_site_local()) {
            return OnlineStatus::Offline;
        }

        // Step 3: captive-portal probe.
        match self.probe_captive_portal().await {
            CaptiveProbeResult::Portal(portal) => {
                *self.portal.write() = portal;
                return OnlineStatus::Portal;
            }
            CaptiveProbeResult::NoPortal | CaptiveProbeResult::Inconclusive => {
                *self.portal.write() = CaptivePortal::default();
            }
        }

        // Step 4: DNS probe against the expected IP.
        match self.dns_probe.probe_a(&self.config.probe_domain).await {
            Ok(Some(ip)) if ip == self.config.expected_ip => OnlineStatus::Online,
            Ok(_) => OnlineStatus::SemiOnline,
            Err(_) => OnlineStatus::SemiOnline,
        }
    }

    async fn probe_captive_portal(&self) -> CaptiveProbeResult {
        let response = match self.http.get(&self.config.test_url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return CaptiveProbeResult::NoPortal,
            Err(_) => return CaptiveProbeResult::Inconclusive,
        };

        match response.status().as_u16() {
            200 => {
                if let Some(location) = response.headers().get(reqwest::header::LOCATION) {
                    let url = location.to_str().unwrap_or_default().to_string();
                    return CaptiveProbeResult::Portal(CaptivePortal {
                        url: Some(url),
                        domain: None,
                        ip: None,
                    });
                }

                // 200 with an unexpected body: synthesize a host-only portal record.
                CaptiveProbeResult::Portal(CaptivePortal {
                    url: None,
                    domain: Some("unknown-captive-portal.invalid".to_string()),
                    ip: None,
                })
            }
            300..=399 => CaptiveProbeResult::Portal(CaptivePortal {
                url: response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                domain: None,
                ip: None,
            }),
            _ => CaptiveProbeResult::Inconclusive,
        }
    }
}

enum CaptiveProbeResult {
    Portal(CaptivePortal),
    NoPortal,
    Inconclusive,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{InterfaceAddr, StaticInterfaceProvider};

    struct AlwaysMismatch;

    #[async_trait::async_trait]
    impl DnsProbe for AlwaysMismatch {
        async fn probe_a(&self, _domain: &str) -> anyhow::Result<Option<IpAddr>> {
            Ok(Some(IpAddr::from([10, 0, 0, 1])))
        }
    }

    #[tokio::test]
    async fn global_ipv4_interface_is_online_without_probing() {
        let monitor = OnlineStatusMonitor::new(
            OnlineStatusConfig::default(),
            Arc::new(StaticInterfaceProvider(vec![InterfaceAddr {
                interface_name: "eth0".into(),
                flags: 0,
                address: "93.184.216.34".parse().unwrap(),
            }])),
            Arc::new(AlwaysMismatch),
        )
        .unwrap();

        assert_eq!(monitor.check_once().await, OnlineStatus::Online);
    }

    #[tokio::test]
    async fn no_interfaces_is_offline() {
        let monitor = OnlineStatusMonitor::new(
            OnlineStatusConfig::default(),
            Arc::new(StaticInterfaceProvider(vec![])),
            Arc::new(AlwaysMismatch),
        )
        .unwrap();

        assert_eq!(monitor.check_once().await, OnlineStatus::Offline);
    }
}
