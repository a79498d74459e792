/// For one remote IP, the domains (with CNAME chain) observed to resolve to
/// it (§3). Insertion-ordered, deduplicated on domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IpInfo {
    pub ip: String,
    /// `(domain, cname_chain)` pairs, insertion order, one per domain.
    pub resolved_domains: Vec<(String, Vec<String>)>,
    /// Relative expiry (seconds since epoch), refreshed on every write (§3: 24h).
    pub expires: u64,
}

/// Relative expiry applied on every write (§3, §6).
pub const IP_INFO_RELATIVE_EXPIRY_SECS: u64 = 24 * 60 * 60;

impl IpInfo {
    pub fn key(ip: &str) -> String {
        format!("cache:intel/ipInfo/{ip}")
    }

    pub fn new(ip: String) -> Self {
        Self {
            ip,
            resolved_domains: Vec::new(),
            expires: 0,
        }
    }

    /// Records that `domain` (with the given CNAME chain) resolved to this
    /// IP, deduplicating on domain and refreshing the relative expiry.
    pub fn record(&mut self, domain: String, cname_chain: Vec<String>, now: u64) {
        if let Some(entry) = self.resolved_domains.iter_mut().find(|(d, _)| *d == domain) {
            entry.1 = cname_chain;
        } else {
            self.resolved_domains.push((domain, cname_chain));
        }
        self.expires = now + IP_INFO_RELATIVE_EXPIRY_SECS;
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_dedups_on_domain() {
        let mut info = IpInfo::new("93.184.216.34".into());
        info.record("example.com.".into(), vec![], 0);
        info.record("example.com.".into(), vec!["cname.example.com.".into()], 10);

        assert_eq!(info.resolved_domains.len(), 1);
        assert_eq!(info.expires, 10 + IP_INFO_RELATIVE_EXPIRY_SECS);
    }
}
