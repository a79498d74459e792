//! Resolver registry (§9 "Cyclic ownership" design note, §5 "Shared
//! resources").
//!
//! Cache records only ever store an immutable [`ResolverDescriptor`]; the
//! live [`Resolver`] (and its bound [`Upstream`] transport) is looked up
//! here by [`ResolverId`]. A descriptor whose id is no longer present is
//! stale and the caller should treat the cache entry as invalid, per the
//! design note. The whole table is replaced atomically on reload and is
//! otherwise read-only, matching "the global resolver list... is guarded by
//! a single RWMutex; mutation happens only during reload" (§5).

use intel_model::resolver::{Resolver, ResolverDescriptor, ResolverId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use upstream::Upstream;

pub struct RegisteredResolver {
    pub resolver: Arc<Resolver>,
    pub upstream: Arc<dyn Upstream>,
}

pub struct ResolverRegistry {
    entries: RwLock<HashMap<ResolverId, Arc<RegisteredResolver>>>,
}

impl ResolverRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Atomically replaces the entire table (§5: "mutation happens only
    /// during reload").
    pub fn reload(&self, entries: Vec<RegisteredResolver>) {
        let mut table = self.entries.write();
        table.clear();
        for entry in entries {
            table.insert(entry.resolver.id, Arc::new(entry));
        }
    }

    pub fn get(&self, id: ResolverId) -> Option<Arc<RegisteredResolver>> {
        self.entries.read().get(&id).cloned()
    }

    pub fn get_many(&self, ids: &[ResolverId]) -> Vec<Arc<RegisteredResolver>> {
        let table = self.entries.read();
        ids.iter().filter_map(|id| table.get(id).cloned()).collect()
    }

    /// Looks up the live resolver behind a cached [`ResolverDescriptor`],
    /// returning `None` (stale descriptor) if the id has since been
    /// removed from the registry.
    pub fn resolve_descriptor(&self, descriptor: &ResolverDescriptor) -> Option<Arc<RegisteredResolver>> {
        self.get(descriptor.id)
    }

    pub fn ids(&self) -> Vec<ResolverId> {
        self.entries.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intel_model::resolver::{BlockDetection, ResolverScheme, ResolverSource};

    struct NeverFails;
    #[async_trait::async_trait]
    impl Upstream for NeverFails {
        async fn query(
            &self,
            _query: &intel_model::Query,
        ) -> Result<intel_model::RRCache, intel_model::ResolverError> {
            Err(intel_model::ResolverError::Failure)
        }
        fn is_failing(&self) -> bool {
            false
        }
        fn report_failure(&self) {}
        fn report_healthy(&self) {}
    }

    #[test]
    fn stale_descriptor_after_reload_resolves_to_none() {
        let registry = ResolverRegistry::new();
        let resolver = Arc::new(Resolver::new(
            intel_model::resolver::ResolverId(1),
            ResolverScheme::Dns,
            "1.1.1.1:53".parse().unwrap(),
            None,
            vec![],
            false,
            BlockDetection::Disabled,
            None,
            ResolverSource::Configured,
            "cloudflare".to_string(),
        ));
        let descriptor = resolver.descriptor();

        registry.reload(vec![RegisteredResolver {
            resolver,
            upstream: Arc::new(NeverFails),
        }]);
        assert!(registry.resolve_descriptor(&descriptor).is_some());

        registry.reload(vec![]);
        assert!(registry.resolve_descriptor(&descriptor).is_none());
    }
}
