//! Resolver error taxonomy (§7).
//!
//! Every error kind that a caller might need to filter on is its own
//! `thiserror` variant so callers match on kind, never on identity, per
//! "Every error wraps a base kind so callers filter by kind, never by
//! identity." `ResolveOutcome::Continue` is the internal `ErrContinue`
//! sentinel (§9 design note) and is intentionally not part of this enum:
//! it must never be observable outside the orchestration loop.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("no record found")]
    NotFound,

    #[error("domain is blocked")]
    Blocked,

    /// Wraps [`ResolverError::Blocked`]: an upstream's response matched its
    /// configured upstream-block-detection heuristic.
    #[error("upstream {upstream} reported a blocked response: {reason}")]
    BlockedUpstream { upstream: String, reason: String },

    #[error("query resolves to localhost but policy forbids it")]
    Localhost,

    #[error("query timed out")]
    Timeout,

    #[error("device is offline")]
    Offline,

    #[error("resolution failed")]
    Failure,

    #[error("no compliant resolver available for this query")]
    NoCompliance,

    #[error("connectivity test domains are disabled")]
    TestDomainsDisabled,

    #[error("special-use domains are disabled")]
    SpecialDomainsDisabled,
}

impl ResolverError {
    /// Authoritative errors short-circuit the resolver list (§4.D, §7):
    /// they must not be masked by trying further resolvers.
    pub fn is_authoritative(&self) -> bool {
        matches!(
            self,
            ResolverError::NotFound
                | ResolverError::Blocked
                | ResolverError::BlockedUpstream { .. }
        )
    }

    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            ResolverError::Blocked | ResolverError::BlockedUpstream { .. }
        )
    }
}

/// Internal control-flow signal for the two-pass orchestration loop (§4.D, §9).
///
/// This is deliberately not a [`ResolverError`] variant: `Continue` must
/// never propagate to a caller. It only exists to let a single resolver
/// attempt say "try the next resolver" without that being indistinguishable
/// from an authoritative failure.
#[derive(Debug)]
pub enum ResolveOutcome<T> {
    Success(T),
    /// Try the next resolver in the list (former `ErrContinue`).
    Continue,
    /// Stop immediately and surface this error to the caller.
    Stop(ResolverError),
}
