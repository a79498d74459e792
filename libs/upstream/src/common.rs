//! Shared response-to-[`RRCache`] conversion and upstream-block detection
//! (§4.C: "All transports convert responses uniformly").

use crate::wire::ParsedMessage;
use intel_model::resolver::{BlockDetection, ResolverDescriptor};
use intel_model::rrcache::{PresentationFlags, RRCache};
use intel_model::{DomainName, RecordType, ResolverError};

/// Builds the raw (un-cleaned; TTL clamping is the resolver core's job per
/// §4.D cache policy) [`RRCache`] from a parsed wire response, then applies
/// the configured upstream-block heuristic.
pub fn to_rrcache(
    domain: DomainName,
    question_type: RecordType,
    parsed: ParsedMessage,
    resolver: ResolverDescriptor,
    block_detection: BlockDetection,
) -> Result<RRCache, ResolverError> {
    let response_code = intel_model::ResponseCode::from(parsed.rcode);

    let cache = RRCache {
        domain,
        question_type,
        response_code,
        answers: parsed.answers,
        authority: parsed.authority,
        additional: parsed.additional,
        expiry: 0,
        resolver,
        flags: PresentationFlags::default(),
    };

    check_blocked(&cache, block_detection)?;
    Ok(cache)
}

fn check_blocked(cache: &RRCache, mode: BlockDetection) -> Result<(), ResolverError> {
    let blocked = match mode {
        BlockDetection::Disabled => false,
        BlockDetection::EmptyAnswer => {
            cache.answers.is_empty() && cache.response_code == intel_model::ResponseCode::NOERROR
        }
        BlockDetection::Refused => cache.response_code == intel_model::ResponseCode::REFUSED,
        BlockDetection::ZeroIp => cache.answers.iter().any(is_zero_ip),
    };

    if blocked {
        return Err(ResolverError::BlockedUpstream {
            upstream: cache.resolver.name.clone(),
            reason: format!("{mode:?}"),
        });
    }

    Ok(())
}

fn is_zero_ip(record: &intel_model::rrcache::RawRecord) -> bool {
    match record.kind {
        RecordType::A => record.rdata == [0, 0, 0, 0],
        RecordType::Aaaa => record.rdata.iter().all(|b| *b == 0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intel_model::resolver::{ResolverId, ResolverScheme};
    use std::str::FromStr;

    fn descriptor() -> ResolverDescriptor {
        ResolverDescriptor {
            id: ResolverId(1),
            scheme: ResolverScheme::Dns,
            scope: None,
            name: "test".to_string(),
        }
    }

    #[test]
    fn empty_answer_mode_flags_empty_noerror_responses() {
        let parsed = ParsedMessage {
            id: 1,
            rcode: 0,
            answers: vec![],
            authority: vec![],
            additional: vec![],
        };

        let result = to_rrcache(
            DomainName::from_str("example.com.").unwrap(),
            RecordType::A,
            parsed,
            descriptor(),
            BlockDetection::EmptyAnswer,
        );

        assert!(matches!(result, Err(ResolverError::BlockedUpstream { .. })));
    }
}
