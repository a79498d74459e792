//! Response shaping before an [`RRCache`] is handed back to the caller
//! (§4.D "Response shaping").

use intel_model::rrcache::RawRecord;
use intel_model::RRCache;
use rand::Rng;

/// Fisher-Yates shuffle of the answer section so that callers which only
/// read the first record distribute load across equally-valid answers
/// (§8 scenario 1: "answer shuffled deterministically under a seeded RNG").
pub fn shuffle_answers<R: Rng>(answers: &mut [RawRecord], rng: &mut R) {
    for i in (1..answers.len()).rev() {
        let j = rng.gen_range(0..=i);
        answers.swap(i, j);
    }
}

/// Rewrites answer `Name` fields equal to the canonical FQDN back to the
/// requested non-canonical form, if the query's original spelling differed.
///
/// [`intel_model::Query`] only retains the canonicalised (lowercased,
/// dot-terminated) FQDN; it has no field for the caller's original,
/// pre-canonicalisation spelling. Since canonicalisation here is exactly
/// lowercasing plus dot-termination, there is no non-canonical spelling left
/// to recover by the time a query reaches this crate, so this step is a
/// documented no-op rather than a partial/fragile reconstruction.
pub fn rewrite_non_canonical_name(_cache: &mut RRCache) {}

#[cfg(test)]
mod tests {
    use super::*;
    use intel_model::{DomainName, RecordType};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::str::FromStr;

    fn record(n: u8) -> RawRecord {
        RawRecord {
            name: DomainName::from_str("example.com.").unwrap(),
            kind: RecordType::A,
            class: 1,
            ttl: 17,
            rdata: vec![93, 184, 216, n],
            text: format!("example.com. 17 IN A 93.184.216.{n}"),
        }
    }

    #[test]
    fn shuffle_is_deterministic_under_a_fixed_seed() {
        let mut a: Vec<RawRecord> = (0..5).map(record).collect();
        let mut b = a.clone();

        shuffle_answers(&mut a, &mut StdRng::seed_from_u64(42));
        shuffle_answers(&mut b, &mut StdRng::seed_from_u64(42));

        assert_eq!(
            a.iter().map(|r| r.rdata.clone()).collect::<Vec<_>>(),
            b.iter().map(|r| r.rdata.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn shuffle_preserves_the_multiset_of_answers() {
        let mut records: Vec<RawRecord> = (0..5).map(record).collect();
        let before: Vec<_> = records.iter().map(|r| r.rdata.clone()).collect();

        shuffle_answers(&mut records, &mut StdRng::seed_from_u64(7));

        let mut after: Vec<_> = records.iter().map(|r| r.rdata.clone()).collect();
        let mut before_sorted = before;
        after.sort();
        before_sorted.sort();
        assert_eq!(after, before_sorted);
    }
}
