use crate::resolver::ResolverDescriptor;
use crate::{DomainName, RecordType, ResponseCode};
use std::time::{SystemTime, UNIX_EPOCH};

/// Resolver provenance attached to a cache entry (§3: "resolver info
/// (type+ID+scope+name)"). Alias of [`ResolverDescriptor`]; kept as a
/// distinct name in this module because the spec's data model talks about
/// "resolver info" as a property of the cache record, not of the resolver
/// registry.
pub type ResolverInfo = ResolverDescriptor;

/// Presentation-only flags (§3 ownership note: "shared-immutable afterward
/// except for the three presentation flags").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentationFlags {
    pub served_from_cache: bool,
    pub requesting_new: bool,
    pub is_backup: bool,
    pub filtered: bool,
}

/// Minimum/maximum TTL clamp used by [`RRCache::clean`] (§3 invariant).
#[derive(Debug, Clone, Copy)]
pub struct TtlBounds {
    pub min_ttl: u32,
    pub max_ttl: u32,
}

impl Default for TtlBounds {
    fn default() -> Self {
        Self {
            min_ttl: 60,
            max_ttl: 24 * 60 * 60,
        }
    }
}

/// TTL set on every RR by [`RRCache::clean`] before persistence (§4.D).
pub const CLEANED_RR_TTL: u32 = 17;

/// Error-response TTL cap: "stricter clamping on error response codes (≤10s)".
pub const ERROR_RESPONSE_MAX_TTL: u32 = 10;

/// Connectivity-domain TTL cap: "on connectivity-domain responses (≤3s)".
pub const CONNECTIVITY_DOMAIN_MAX_TTL: u32 = 3;

/// A single resource record kept in both structured and textual form.
///
/// §9 design note ("duck-typed record wrappers... replace with a tagged-
/// variant carrier: `{kind, bytes}` where `kind` selects the parser") is
/// implemented directly here: `kind` selects how `rdata` is interpreted, and
/// no runtime type assertions are needed in the hot (cache lookup) path.
/// `text` is the presentation form used for persistence (§4.B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub name: DomainName,
    pub kind: RecordType,
    pub class: u16,
    pub ttl: u32,
    /// Wire-format rdata bytes.
    pub rdata: Vec<u8>,
    /// Presentation-form rendering, e.g. `"example.com. 300 IN A 93.184.216.34"`.
    pub text: String,
}

/// A resolved record set for one [`crate::Query`] (§3).
#[derive(Debug, Clone)]
pub struct RRCache {
    pub domain: DomainName,
    pub question_type: RecordType,
    pub response_code: ResponseCode,
    pub answers: Vec<RawRecord>,
    pub authority: Vec<RawRecord>,
    pub additional: Vec<RawRecord>,
    /// Absolute expiry, seconds since epoch.
    pub expiry: u64,
    pub resolver: ResolverInfo,
    pub flags: PresentationFlags,
}

impl RRCache {
    /// `min(TTL)` across all RRs in all three sections, or `None` when there
    /// are no records at all (e.g. NXDOMAIN).
    pub fn min_rr_ttl(&self) -> Option<u32> {
        self.answers
            .iter()
            .chain(self.authority.iter())
            .chain(self.additional.iter())
            .map(|r| r.ttl)
            .min()
    }

    /// Clamps the minimum observed TTL into `[bounds.min_ttl, bounds.max_ttl]`,
    /// then applies the tighter error/connectivity-domain caps per §3's
    /// invariant, then sets every RR's TTL to [`CLEANED_RR_TTL`] and
    /// recomputes [`Self::expiry`] from `now`.
    ///
    /// `is_connectivity_domain` mirrors "connectivity-domain responses" from
    /// §3; it is supplied by the caller (the resolver core consults the
    /// shared `ConnectivityDomains` set, see `SPEC_FULL.md` §2).
    pub fn clean(&mut self, now: u64, bounds: TtlBounds, is_connectivity_domain: bool) {
        let observed = self.min_rr_ttl().unwrap_or(bounds.min_ttl);

        let mut ttl = observed.clamp(bounds.min_ttl, bounds.max_ttl);

        if self.response_code != ResponseCode::NOERROR {
            ttl = ttl.min(ERROR_RESPONSE_MAX_TTL);
        }
        if is_connectivity_domain {
            ttl = ttl.min(CONNECTIVITY_DOMAIN_MAX_TTL);
        }

        for record in self
            .answers
            .iter_mut()
            .chain(self.authority.iter_mut())
            .chain(self.additional.iter_mut())
        {
            record.ttl = CLEANED_RR_TTL;
        }

        self.expiry = now.saturating_add(u64::from(ttl));
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiry
    }

    pub fn ttl_remaining(&self, now: u64) -> i64 {
        self.expiry as i64 - now as i64
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
