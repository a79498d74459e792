use crate::resolver::ResolverId;

/// A DNS suffix plus the resolvers that advertised it (§3, §4.D).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Dot-terminated, dot-prefixed suffix, e.g. `.home.`.
    pub suffix: String,
    pub resolvers: Vec<ResolverId>,
}

impl Scope {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            resolvers: Vec::new(),
        }
    }

    pub fn matches(&self, fqdn_dot_prefixed: &str) -> bool {
        fqdn_dot_prefixed.ends_with(&self.suffix)
    }
}

/// Sorts scopes by descending suffix length so "longer (more specific) scope
/// suffixes match first" (§4.D) and the order is stable under insertion
/// (§8: "Scope ordering... total order is stable under insertion").
pub fn sort_scopes_most_specific_first(scopes: &mut [Scope]) {
    scopes.sort_by(|a, b| b.suffix.len().cmp(&a.suffix.len()));
}

/// Returns the first scope (in most-specific-first order) whose suffix
/// matches `fqdn_dot_prefixed`, if any.
pub fn find_matching_scope<'a>(
    scopes: &'a [Scope],
    fqdn_dot_prefixed: &str,
) -> Option<&'a Scope> {
    scopes.iter().find(|s| s.matches(fqdn_dot_prefixed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longer_suffix_sorts_first() {
        let mut scopes = vec![Scope::new(".local."), Scope::new(".intranet.local.")];
        sort_scopes_most_specific_first(&mut scopes);
        assert_eq!(scopes[0].suffix, ".intranet.local.");
    }

    #[test]
    fn matching_picks_most_specific() {
        let mut scopes = vec![Scope::new(".local."), Scope::new(".intranet.local.")];
        sort_scopes_most_specific_first(&mut scopes);

        let found = find_matching_scope(&scopes, ".host.intranet.local.").unwrap();
        assert_eq!(found.suffix, ".intranet.local.");
    }

    #[test]
    fn stable_under_insertion_order_for_equal_length() {
        let mut scopes = vec![Scope::new(".aaaa."), Scope::new(".bbbb.")];
        sort_scopes_most_specific_first(&mut scopes);
        // Equal length: original relative order is preserved (stable sort).
        assert_eq!(scopes[0].suffix, ".aaaa.");
        assert_eq!(scopes[1].suffix, ".bbbb.");
    }
}
