use crate::resolver::ResolverDescriptor;
use crate::rrcache::{RRCache, RawRecord};
use crate::RecordType;

/// Additional absolute time (seconds) a [`NameRecord`] stays in the
/// persistent store past its [`RRCache`] expiry, to support stale-serve
/// (§3, §6: "database-overtime").
pub const DATABASE_OVERTIME_SECS: u64 = 14 * 24 * 60 * 60;

/// Textual, persisted serialization of an [`RRCache`] (§3).
///
/// Records/sections are kept as presentation-form (wire-textual, one RR per
/// line, per §4.B) strings rather than structured `domain` types, matching
/// the teacher's pattern of storing a presentation-form string alongside the
/// structured form it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NameRecord {
    pub domain: String,
    pub question: String,
    pub rcode: String,
    pub answer: Vec<String>,
    pub ns: Vec<String>,
    pub extra: Vec<String>,
    /// Absolute expiry = [`RRCache::expiry`] + [`DATABASE_OVERTIME_SECS`].
    pub expires: u64,
    pub resolver: ResolverDescriptor,
}

impl NameRecord {
    /// Database key prefix per §6: `cache:intel/nameRecord/<fqdn><qtype>`.
    pub fn key(domain: &str, qtype: RecordType) -> String {
        format!("cache:intel/nameRecord/{domain}{}", u16::from(qtype))
    }

    pub fn own_key(&self) -> String {
        Self::key(&self.domain, self.question_type())
    }

    fn question_type(&self) -> RecordType {
        self.question
            .parse::<u16>()
            .map(RecordType::from)
            .unwrap_or(RecordType::A)
    }

    /// A record with no resolver descriptor is forward-compatibility invalid
    /// per §4.B and must not be returned from a `Get`.
    pub fn is_valid(&self) -> bool {
        !self.resolver.name.is_empty()
    }

    pub fn is_database_expired(&self, now: u64) -> bool {
        now >= self.expires
    }
}

/// Converts a structured [`RRCache`] to its persisted [`NameRecord`] form.
///
/// Each RR is rendered through `domain`'s `Display` impl, matching "wire
/// format parse/serialize round-trip... one line per RR" (§4.B).
pub fn to_name_record(cache: &RRCache) -> NameRecord {
    let render = |records: &[RawRecord]| {
        records.iter().map(|r| r.text.clone()).collect::<Vec<_>>()
    };

    NameRecord {
        domain: cache.domain.to_string(),
        question: u16::from(cache.question_type).to_string(),
        rcode: cache.response_code.to_string(),
        answer: render(&cache.answers),
        ns: render(&cache.authority),
        extra: render(&cache.additional),
        expires: cache.expiry.saturating_add(DATABASE_OVERTIME_SECS),
        resolver: cache.resolver.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_includes_domain_and_qtype() {
        let key = NameRecord::key("example.com.", RecordType::A);
        assert_eq!(key, "cache:intel/nameRecord/example.com.1");
    }

    #[test]
    fn missing_resolver_descriptor_is_invalid() {
        let nr = NameRecord {
            domain: "example.com.".into(),
            question: "1".into(),
            rcode: "NOERROR".into(),
            answer: vec![],
            ns: vec![],
            extra: vec![],
            expires: 0,
            resolver: ResolverDescriptor {
                id: crate::resolver::ResolverId(0),
                scheme: crate::resolver::ResolverScheme::Dns,
                scope: None,
                name: String::new(),
            },
        };
        assert!(!nr.is_valid());
    }
}
