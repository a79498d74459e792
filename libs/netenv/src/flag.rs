use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A broadcast "something changed" signal that many independent observers
/// can watch without coordinating with each other (§4.A: "a broadcast
/// 'network-changed' flag that any observer can obtain a private copy of").
///
/// The owner calls [`Broadcaster::fire`] once per change. Each
/// [`Flag::is_set`] call returns `true` exactly once per broadcast the
/// observer hasn't yet observed, then returns `false` until the next
/// broadcast -- "`IsSet()` returns true once after each broadcast until the
/// owner explicitly refreshes" is implemented by each `Flag` remembering the
/// broadcaster's generation counter it last observed.
#[derive(Clone)]
pub struct Broadcaster {
    generation: Arc<AtomicU64>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Announces a change to every [`Flag`] derived from this broadcaster.
    pub fn fire(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Obtains a private observer handle, per "any observer can obtain a
    /// private copy of" the flag.
    pub fn subscribe(&self) -> Flag {
        Flag {
            generation: self.generation.clone(),
            last_seen: AtomicU64::new(self.generation.load(Ordering::SeqCst)),
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Flag {
    generation: Arc<AtomicU64>,
    last_seen: AtomicU64,
}

impl Flag {
    /// Returns `true` exactly once per broadcast since this flag was last
    /// observed (or created), then `false` until the next one.
    pub fn is_set(&self) -> bool {
        let current = self.generation.load(Ordering::SeqCst);
        let last = self.last_seen.swap(current, Ordering::SeqCst);
        current != last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_broadcast() {
        let broadcaster = Broadcaster::new();
        let flag = broadcaster.subscribe();

        assert!(!flag.is_set());

        broadcaster.fire();

        assert!(flag.is_set());
        assert!(!flag.is_set());
    }

    #[test]
    fn each_subscriber_gets_an_independent_view() {
        let broadcaster = Broadcaster::new();
        let a = broadcaster.subscribe();
        let b = broadcaster.subscribe();

        broadcaster.fire();

        assert!(a.is_set());
        // `b` hasn't consumed its view yet; consuming it independently still
        // observes the same broadcast.
        assert!(b.is_set());
        assert!(!b.is_set());
    }
}
