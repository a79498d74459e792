//! Scope selection (§4.D "Scope selection"): builds the ordered candidate
//! resolver list for a query, or a synthetic/error decision that bypasses
//! upstreams entirely.

use crate::special_names as special;
use intel_model::resolver::ResolverId;
use intel_model::{Query, ResolverError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// `*.localhost.` (§4.D step 1).
    SyntheticLocalhost,
    /// `*.invalid.` (§4.D step 2).
    SyntheticInvalid,
    /// The internal reserved TLD, consulted only by the env-resolver.
    SyntheticEnvReserved,
    /// An ordered list of candidate resolvers, not yet filtered for
    /// per-query compliance.
    Resolvers(Vec<ResolverId>),
    /// Special-service TLD (`.onion.`/`.bit.`) but local resolution is
    /// disabled by policy (§4.D step 5: "else error").
    SpecialDomainsDisabled,
}

/// Resolver ids grouped by how §4.D's scope selection can route to them.
pub struct RoutingTable<'a> {
    /// Suffix-scoped resolver groups, most-specific-first
    /// (see [`intel_model::scope::sort_scopes_most_specific_first`]).
    pub scopes: &'a [intel_model::Scope],
    /// Every resolver considered "local" (search-scoped, not global pool).
    pub local_resolver_ids: &'a [ResolverId],
    pub mdns_id: ResolverId,
    pub global_resolver_ids: &'a [ResolverId],
    /// Whether special-service TLDs (`.onion.`/`.bit.`) may resolve via the
    /// local resolver set at all (§4.D step 5: "if policy permits").
    pub special_domains_allowed: bool,
    pub env_reserved_tld: &'a str,
}

/// Implements §4.D's six-step scope selection. Compliance filtering,
/// deduplication, and orchestration happen downstream of this decision.
pub fn route(query: &Query, table: &RoutingTable<'_>) -> RouteDecision {
    let fqdn = query.fqdn_dot_prefixed();

    if special::matches_localhost(fqdn) {
        return RouteDecision::SyntheticLocalhost;
    }

    if fqdn.ends_with(table.env_reserved_tld) {
        return RouteDecision::SyntheticEnvReserved;
    }

    if special::matches_invalid(fqdn) {
        return RouteDecision::SyntheticInvalid;
    }

    if let Some(scope) = intel_model::scope::find_matching_scope(table.scopes, fqdn) {
        let mut ids = scope.resolvers.clone();
        ids.push(table.mdns_id);
        return RouteDecision::Resolvers(ids);
    }

    if special::matches_local_tld(fqdn) || special::matches_local_reverse_arpa(fqdn) {
        let mut ids = table.local_resolver_ids.to_vec();
        ids.push(table.mdns_id);
        return RouteDecision::Resolvers(ids);
    }

    if special::matches_special_service_tld(fqdn) {
        return if table.special_domains_allowed {
            RouteDecision::Resolvers(table.local_resolver_ids.to_vec())
        } else {
            RouteDecision::SpecialDomainsDisabled
        };
    }

    RouteDecision::Resolvers(table.global_resolver_ids.to_vec())
}

impl RouteDecision {
    /// Converts a non-`Resolvers` decision directly into the error/synthetic
    /// outcome the caller should short-circuit on, if applicable.
    pub fn as_blocking_error(&self) -> Option<ResolverError> {
        match self {
            RouteDecision::SpecialDomainsDisabled => Some(ResolverError::SpecialDomainsDisabled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intel_model::{RecordType, Scope, SecurityLevel};

    fn query(fqdn: &str) -> Query {
        Query::new(fqdn, RecordType::A, SecurityLevel::Normal)
    }

    #[test]
    fn localhost_routes_synthetic() {
        let table = RoutingTable {
            scopes: &[],
            local_resolver_ids: &[],
            mdns_id: ResolverId(99),
            global_resolver_ids: &[ResolverId(1)],
            special_domains_allowed: true,
            env_reserved_tld: ".home.arpa.",
        };
        assert_eq!(
            route(&query("foo.localhost."), &table),
            RouteDecision::SyntheticLocalhost
        );
    }

    #[test]
    fn scoped_suffix_wins_over_global() {
        let mut scope = Scope::new(".home.");
        scope.resolvers.push(ResolverId(5));
        let scopes = vec![scope];

        let table = RoutingTable {
            scopes: &scopes,
            local_resolver_ids: &[],
            mdns_id: ResolverId(99),
            global_resolver_ids: &[ResolverId(1)],
            special_domains_allowed: true,
            env_reserved_tld: ".home.arpa.",
        };

        match route(&query("printer.home."), &table) {
            RouteDecision::Resolvers(ids) => {
                assert_eq!(ids, vec![ResolverId(5), ResolverId(99)]);
            }
            other => panic!("expected Resolvers, got {other:?}"),
        }
    }

    #[test]
    fn special_service_tld_blocked_when_disabled() {
        let table = RoutingTable {
            scopes: &[],
            local_resolver_ids: &[],
            mdns_id: ResolverId(99),
            global_resolver_ids: &[ResolverId(1)],
            special_domains_allowed: false,
            env_reserved_tld: ".home.arpa.",
        };
        assert_eq!(
            route(&query("facebookcorewwwi.onion."), &table),
            RouteDecision::SpecialDomainsDisabled
        );
    }

    #[test]
    fn unmatched_query_falls_back_to_global() {
        let table = RoutingTable {
            scopes: &[],
            local_resolver_ids: &[],
            mdns_id: ResolverId(99),
            global_resolver_ids: &[ResolverId(1), ResolverId(2)],
            special_domains_allowed: true,
            env_reserved_tld: ".home.arpa.",
        };
        assert_eq!(
            route(&query("example.com."), &table),
            RouteDecision::Resolvers(vec![ResolverId(1), ResolverId(2)])
        );
    }
}
