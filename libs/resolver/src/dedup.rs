//! Query deduplication (§4.D "Deduplication", §5 ordering guarantee,
//! §8 "Dedupe" property).
//!
//! A process-wide map keeps one [`tokio::sync::Notify`] per in-flight
//! `fqdn|qtype` key. The first caller for a key becomes the leader and
//! resolves the query; later callers follow: they wait for the leader, then
//! re-check the cache themselves. The leader only removes its own map entry
//! (via [`LeaderGuard::finish`]) after publishing its result to the cache,
//! so the cache write happens-before any follower's re-check.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

pub struct DedupMap {
    inflight: Mutex<HashMap<String, Arc<Notify>>>,
}

pub enum Outcome {
    Leader(LeaderGuard),
    Followed,
}

impl DedupMap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Enters the dedup map for `key`. The first caller becomes the leader
    /// and must resolve the query itself; every later caller is suspended
    /// here until the leader calls [`LeaderGuard::finish`] (or is dropped),
    /// then returns so the caller can re-check the cache.
    ///
    /// Registers interest in the leader's notification (`enable`) before
    /// re-checking whether the leader is still in flight, so a leader that
    /// finishes between the initial lookup and the registration is never
    /// missed (the classic `Notify` "enable, then check, then await"
    /// pattern).
    pub async fn join(self: &Arc<Self>, key: &str) -> Outcome {
        let notify = {
            let mut map = self.inflight.lock();
            match map.get(key) {
                Some(existing) => existing.clone(),
                None => {
                    let notify = Arc::new(Notify::new());
                    map.insert(key.to_string(), notify);
                    return Outcome::Leader(LeaderGuard {
                        map: self.clone(),
                        key: key.to_string(),
                        finished: false,
                    });
                }
            }
        };

        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.inflight.lock().contains_key(key) {
            // The leader already finished and removed the key before we
            // registered; the notification may already have fired.
            return Outcome::Followed;
        }

        notified.await;
        Outcome::Followed
    }
}

pub struct LeaderGuard {
    map: Arc<DedupMap>,
    key: String,
    finished: bool,
}

impl LeaderGuard {
    /// Removes this key from the in-flight map and wakes every follower.
    /// Call only once the result is visible to a follower's cache re-check.
    pub fn finish(mut self) {
        self.finish_inner();
    }

    fn finish_inner(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let notify = self.map.inflight.lock().remove(&self.key);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.finish_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_arrival_follows_until_leader_finishes() {
        let map = DedupMap::new();

        let leader = match map.join("example.com.|1").await {
            Outcome::Leader(guard) => guard,
            Outcome::Followed => panic!("first caller must be the leader"),
        };

        let map2 = map.clone();
        let follower = tokio::spawn(async move { map2.join("example.com.|1").await });

        // Give the follower a chance to register before the leader finishes.
        tokio::task::yield_now().await;
        leader.finish();

        match tokio::time::timeout(std::time::Duration::from_secs(1), follower)
            .await
            .expect("follower should be woken promptly")
            .unwrap()
        {
            Outcome::Followed => {}
            Outcome::Leader(_) => panic!("second caller must not become a leader"),
        }
    }

    #[tokio::test]
    async fn key_is_free_again_once_the_leader_finishes() {
        let map = DedupMap::new();

        let leader = match map.join("k").await {
            Outcome::Leader(guard) => guard,
            Outcome::Followed => unreachable!(),
        };
        leader.finish();

        match map.join("k").await {
            Outcome::Leader(_) => {}
            Outcome::Followed => panic!("key should have been freed"),
        }
    }
}
