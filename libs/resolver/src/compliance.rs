//! Per-query compliance filtering (§4.D "Per-query compliance").

use intel_model::resolver::{Resolver, ResolverScheme, ResolverSource};
use intel_model::Query;

/// Whether `resolver` may be used for `query`, per §4.D: reject insecure
/// transports and OS/mDNS resolvers when policy forbids them, and reject a
/// resolver whose `skip_fqdn` matches the query (DoH self-resolution-loop
/// guard).
pub fn is_compliant(resolver: &Resolver, query: &Query) -> bool {
    let security = query.security_level();

    if !resolver.scheme.is_encrypted() && security.forbids_insecure_transport() {
        return false;
    }

    if resolver.source == ResolverSource::OperatingSystem && security.forbids_os_resolvers() {
        return false;
    }

    // mDNS is unauthenticated local-network discovery: the same policy that
    // forbids OS-assigned resolvers forbids it too.
    if resolver.source == ResolverSource::Mdns && security.forbids_os_resolvers() {
        return false;
    }

    if let Some(skip) = &resolver.skip_fqdn {
        if skip == query.fqdn() {
            return false;
        }
    }

    true
}
