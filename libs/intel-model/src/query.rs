use crate::{DomainName, RecordType, canonicalize_fqdn, dot_prefixed};
use std::str::FromStr;

/// Security level a query was issued under (§3, §4.D compliance checks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum SecurityLevel {
    /// No restrictions: insecure transports, OS resolvers, mDNS all permitted.
    Relaxed,
    /// Default level used by most callers.
    Normal,
    /// Forbids insecure transports (plain DNS) and OS resolvers.
    Fortress,
    /// `Fortress` plus special-use TLDs (`.onion.`, `.bit.`) are rejected.
    FortressNoSpecialDomains,
}

impl SecurityLevel {
    pub fn forbids_insecure_transport(&self) -> bool {
        matches!(
            self,
            SecurityLevel::Fortress | SecurityLevel::FortressNoSpecialDomains
        )
    }

    pub fn forbids_os_resolvers(&self) -> bool {
        matches!(
            self,
            SecurityLevel::Fortress | SecurityLevel::FortressNoSpecialDomains
        )
    }

    pub fn forbids_special_domains(&self) -> bool {
        matches!(self, SecurityLevel::FortressNoSpecialDomains)
    }
}

/// An immutable DNS query request (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    fqdn: String,
    fqdn_dot_prefixed: String,
    qtype: RecordType,
    security_level: SecurityLevel,
    caching: bool,
    ignore_failing: bool,
    local_resolvers_only: bool,
}

impl Query {
    pub fn new(fqdn: &str, qtype: RecordType, security_level: SecurityLevel) -> Self {
        let fqdn = canonicalize_fqdn(fqdn);
        let fqdn_dot_prefixed = dot_prefixed(&fqdn);

        Self {
            fqdn,
            fqdn_dot_prefixed,
            qtype,
            security_level,
            caching: true,
            ignore_failing: false,
            local_resolvers_only: false,
        }
    }

    pub fn with_caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }

    pub fn with_ignore_failing(mut self, ignore_failing: bool) -> Self {
        self.ignore_failing = ignore_failing;
        self
    }

    pub fn with_local_resolvers_only(mut self, local_only: bool) -> Self {
        self.local_resolvers_only = local_only;
        self
    }

    pub fn fqdn(&self) -> &str {
        &self.fqdn
    }

    /// Dot-prefixed form used for suffix matching, e.g. `.mail.google.com.`.
    pub fn fqdn_dot_prefixed(&self) -> &str {
        &self.fqdn_dot_prefixed
    }

    pub fn qtype(&self) -> RecordType {
        self.qtype
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    pub fn caching(&self) -> bool {
        self.caching
    }

    pub fn ignore_failing(&self) -> bool {
        self.ignore_failing
    }

    pub fn local_resolvers_only(&self) -> bool {
        self.local_resolvers_only
    }

    /// Dedup key: `fqdn|qtype` (§4.D).
    pub fn dedup_key(&self) -> String {
        format!("{}|{}", self.fqdn, u16::from(self.qtype))
    }

    pub fn as_domain_name(&self) -> Option<DomainName> {
        DomainName::from_str(&self.fqdn).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_trailing_dot() {
        let q = Query::new("example.com", RecordType::A, SecurityLevel::Normal);
        assert_eq!(q.fqdn(), "example.com.");
        assert_eq!(q.fqdn_dot_prefixed(), ".example.com.");
    }

    #[test]
    fn dedup_key_is_fqdn_and_qtype() {
        let a = Query::new("example.com.", RecordType::A, SecurityLevel::Normal);
        let b = Query::new("example.com.", RecordType::Aaaa, SecurityLevel::Normal);
        assert_ne!(a.dedup_key(), b.dedup_key());
    }
}
