//! Synthetic handling for reserved TLDs that never reach an upstream
//! (§4.D steps 1-2, 5; RFC 6761).

use intel_model::resolver::{ResolverDescriptor, ResolverId, ResolverScheme};
use intel_model::rrcache::{PresentationFlags, RRCache};
use intel_model::{DomainName, RecordType, ResponseCode};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Reserved zones consulted only by the synthetic resolvers in this module
/// (§6: "Private reserved TLD for internal special-use domain... is
/// consulted only by the resolver's synthetic env-resolver; any other
/// resolver sees NXDOMAIN for it").
pub const INTERNAL_RESERVED_TLD: &str = ".home.arpa.";

/// The id every synthetic answer's [`ResolverDescriptor`] carries. Not a
/// real registry entry: no upstream ever gets dialed for these, so there is
/// nothing to look up by id, but cache entries still need a descriptor.
pub const SYNTHETIC_RESOLVER_ID: ResolverId = ResolverId(0);

fn synthetic_descriptor(name: &str) -> ResolverDescriptor {
    ResolverDescriptor {
        id: SYNTHETIC_RESOLVER_ID,
        scheme: ResolverScheme::Dns,
        scope: None,
        name: name.to_string(),
    }
}

pub fn matches_localhost(fqdn_dot_prefixed: &str) -> bool {
    fqdn_dot_prefixed.ends_with(".localhost.") || fqdn_dot_prefixed == ".localhost."
}

pub fn matches_invalid(fqdn_dot_prefixed: &str) -> bool {
    fqdn_dot_prefixed.ends_with(".invalid.")
}

pub fn matches_local_tld(fqdn_dot_prefixed: &str) -> bool {
    fqdn_dot_prefixed.ends_with(".local.")
}

pub fn matches_special_service_tld(fqdn_dot_prefixed: &str) -> bool {
    fqdn_dot_prefixed.ends_with(".onion.") || fqdn_dot_prefixed.ends_with(".bit.")
}

/// RFC 6303 private reverse zones: queries under these never leave the
/// local resolver set, mirroring "the local-reverse-arpa set" in §4.D.
const LOCAL_REVERSE_ARPA_SUFFIXES: &[&str] = &[
    ".10.in-addr.arpa.",
    ".16.172.in-addr.arpa.",
    ".17.172.in-addr.arpa.",
    ".18.172.in-addr.arpa.",
    ".19.172.in-addr.arpa.",
    ".20.172.in-addr.arpa.",
    ".21.172.in-addr.arpa.",
    ".22.172.in-addr.arpa.",
    ".23.172.in-addr.arpa.",
    ".24.172.in-addr.arpa.",
    ".25.172.in-addr.arpa.",
    ".26.172.in-addr.arpa.",
    ".27.172.in-addr.arpa.",
    ".28.172.in-addr.arpa.",
    ".29.172.in-addr.arpa.",
    ".30.172.in-addr.arpa.",
    ".31.172.in-addr.arpa.",
    ".168.192.in-addr.arpa.",
    ".254.169.in-addr.arpa.",
    ".d.f.ip6.arpa.",
];

pub fn matches_local_reverse_arpa(fqdn_dot_prefixed: &str) -> bool {
    LOCAL_REVERSE_ARPA_SUFFIXES
        .iter()
        .any(|suffix| fqdn_dot_prefixed.ends_with(suffix))
}

/// Builds the synthetic `*.localhost.` answer (§4.D step 1, §8 scenario 2):
/// A -> 127.0.0.1, AAAA -> ::1, anything else -> NXDOMAIN.
pub fn localhost_answer(domain: &DomainName, qtype: RecordType) -> RRCache {
    let (response_code, rdata, text) = match qtype {
        RecordType::A => (
            ResponseCode::NOERROR,
            Ipv4Addr::LOCALHOST.octets().to_vec(),
            format!("{domain} 17 IN A 127.0.0.1"),
        ),
        RecordType::Aaaa => (
            ResponseCode::NOERROR,
            Ipv6Addr::LOCALHOST.octets().to_vec(),
            format!("{domain} 17 IN AAAA ::1"),
        ),
        _ => {
            return nxdomain(domain, qtype, "localhost");
        }
    };

    RRCache {
        domain: domain.clone(),
        question_type: qtype,
        response_code,
        answers: vec![intel_model::rrcache::RawRecord {
            name: domain.clone(),
            kind: qtype,
            class: 1,
            ttl: 17,
            rdata,
            text,
        }],
        authority: vec![],
        additional: vec![],
        expiry: 0,
        resolver: synthetic_descriptor("localhost"),
        flags: PresentationFlags::default(),
    }
}

/// Builds the synthetic NXDOMAIN answer for `*.invalid.` (§4.D step 2,
/// §8 scenario 3) and for unsupported `*.localhost.` query types.
pub fn nxdomain(domain: &DomainName, qtype: RecordType, source: &str) -> RRCache {
    RRCache {
        domain: domain.clone(),
        question_type: qtype,
        response_code: ResponseCode::NXDOMAIN,
        answers: vec![],
        authority: vec![],
        additional: vec![],
        expiry: 0,
        resolver: synthetic_descriptor(source),
        flags: PresentationFlags::default(),
    }
}

/// Env-resolver for [`INTERNAL_RESERVED_TLD`]; the caller supplies the
/// answer IP since the reserved domain is configuration-driven.
pub fn env_reserved_answer(domain: &DomainName, qtype: RecordType, ip: Ipv4Addr) -> RRCache {
    if qtype != RecordType::A {
        return nxdomain(domain, qtype, "env-reserved");
    }

    RRCache {
        domain: domain.clone(),
        question_type: qtype,
        response_code: ResponseCode::NOERROR,
        answers: vec![intel_model::rrcache::RawRecord {
            name: domain.clone(),
            kind: qtype,
            class: 1,
            ttl: 17,
            rdata: ip.octets().to_vec(),
            text: format!("{domain} 17 IN A {ip}"),
        }],
        authority: vec![],
        additional: vec![],
        expiry: 0,
        resolver: synthetic_descriptor("env-reserved"),
        flags: PresentationFlags::default(),
    }
}

pub fn parse_domain(fqdn: &str) -> Option<DomainName> {
    DomainName::from_str(fqdn).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_a_resolves_to_loopback() {
        let domain = parse_domain("foo.localhost.").unwrap();
        let cache = localhost_answer(&domain, RecordType::A);
        assert_eq!(cache.response_code, ResponseCode::NOERROR);
        assert_eq!(cache.answers[0].rdata, vec![127, 0, 0, 1]);
    }

    #[test]
    fn localhost_mx_is_nxdomain() {
        let domain = parse_domain("foo.localhost.").unwrap();
        let cache = localhost_answer(&domain, RecordType::Mx);
        assert_eq!(cache.response_code, ResponseCode::NXDOMAIN);
        assert!(cache.answers.is_empty());
    }

    #[test]
    fn recognises_reserved_suffixes() {
        assert!(matches_localhost(".foo.localhost."));
        assert!(matches_invalid(".bar.invalid."));
        assert!(matches_local_tld(".host.local."));
        assert!(matches_special_service_tld(".facebookcorewwwi.onion."));
        assert!(matches_local_reverse_arpa(".1.168.192.in-addr.arpa."));
        assert!(!matches_local_reverse_arpa(".1.34.in-addr.arpa."));
    }
}
