//! Shared data model for the network intelligence core.
//!
//! Grounded on `firezone-firezone/rust/libs/connlib/dns-types` for the DNS
//! wire-format type aliases (`DomainName`, `RecordType`, ...) and on
//! `firezone-firezone/rust/libs/connlib/model` for the "small, `Copy`-able
//! value type per concept" style used throughout this crate.

pub mod connection;
pub mod device_location;
pub mod error;
pub mod ip_info;
pub mod name_record;
pub mod notify;
pub mod query;
pub mod resolver;
pub mod rrcache;
pub mod scope;

pub use connection::{Connection, ConnectionType, IpScope, Verdict};
pub use device_location::{DeviceLocation, LocationSource};
pub use error::{ResolveOutcome, ResolverError};
pub use ip_info::IpInfo;
pub use name_record::NameRecord;
pub use notify::{ChannelNotifier, Notification, Notifier, NotifierEvent, NullNotifier, SharedNotifier};
pub use query::{Query, SecurityLevel};
pub use resolver::{BlockDetection, Resolver, ResolverDescriptor, ResolverId, ResolverSource};
pub use rrcache::{PresentationFlags, RRCache, ResolverInfo};
pub use scope::Scope;

/// DNS name type used everywhere a fully-qualified domain name is stored.
///
/// Mirrors `dns_types::DomainName` in the teacher crate: an owned,
/// heap-backed `domain::base::Name`.
pub type DomainName = domain::base::Name<Vec<u8>>;
pub type RecordType = domain::base::iana::Rtype;
pub type ResponseCode = domain::base::iana::Rcode;

/// Normalizes a user-supplied name into a canonical, dot-terminated FQDN.
///
/// Per §3: "FQDN (must be canonicalised to end in a trailing dot)".
pub fn canonicalize_fqdn(input: &str) -> String {
    let lower = input.to_ascii_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{lower}.")
    }
}

/// The dot-prefixed form of an FQDN used for suffix matching against scopes.
///
/// `"mail.google.com."` -> `".mail.google.com."`
pub fn dot_prefixed(fqdn: &str) -> String {
    if fqdn.starts_with('.') {
        fqdn.to_string()
    } else {
        format!(".{fqdn}")
    }
}
