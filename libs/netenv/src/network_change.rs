use crate::flag::Broadcaster;
use crate::interfaces::InterfaceProvider;
use crate::online_status::{OnlineStatus, OnlineStatusMonitor};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodic hash-based change detector (§4.A "Network-change detection").
///
/// Distinct worker from [`OnlineStatusMonitor`]'s own loop: it has its own
/// period (driven by the *current* online status) and its own broadcast
/// flag, even though both ultimately signal "recheck everything that cares
/// about the network".
pub struct NetworkChangeDetector {
    interfaces: Arc<dyn InterfaceProvider>,
    online: Arc<OnlineStatusMonitor>,
    last_hash: parking_lot::Mutex<Option<u64>>,
    pub changed: Broadcaster,
}

impl NetworkChangeDetector {
    pub fn new(interfaces: Arc<dyn InterfaceProvider>, online: Arc<OnlineStatusMonitor>) -> Self {
        Self {
            interfaces,
            online,
            last_hash: parking_lot::Mutex::new(None),
            changed: Broadcaster::new(),
        }
    }

    fn current_hash(&self) -> u64 {
        let mut tuples: Vec<String> = self
            .interfaces
            .current()
            .iter()
            .map(|i| i.change_tuple())
            .collect();
        tuples.sort();

        let mut hasher = DefaultHasher::new();
        tuples.join(",").hash(&mut hasher);
        hasher.finish()
    }

    /// Checks the current hash against the last-seen one; fires `changed` on
    /// a difference, skipping the very first observation (no prior hash to
    /// compare against).
    pub fn check_once(&self) -> bool {
        let hash = self.current_hash();
        let mut last = self.last_hash.lock();

        let changed = match *last {
            Some(previous) if previous != hash => true,
            Some(_) => false,
            None => false, // first observation: nothing to compare against yet
        };

        *last = Some(hash);

        if changed {
            self.changed.fire();
            self.online.trigger_recheck();
        }

        changed
    }

    fn period(&self) -> Duration {
        match self.online.status() {
            OnlineStatus::Offline | OnlineStatus::Unknown => Duration::from_secs(1),
            _ => Duration::from_secs(30),
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            self.check_once();

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.period()) => {}
            }
        }
    }
}
