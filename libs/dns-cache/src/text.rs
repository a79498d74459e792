//! Wire-textual presentation parsing (§4.B: "parse failures on stored
//! records are logged and the offending RR is dropped; partial records are
//! still returned").

use intel_model::rrcache::RawRecord;
use intel_model::{DomainName, RecordType};
use std::str::FromStr;

/// Parses one presentation-form line (`name ttl class type rdata...`) back
/// into a [`RawRecord`]. Returns `None` on malformed input instead of
/// erroring, so callers can drop the offending line and keep the rest.
pub fn parse_line(line: &str) -> Option<RawRecord> {
    let mut parts = line.split_whitespace();

    let name_str = parts.next()?;
    let ttl: u32 = parts.next()?.parse().ok()?;
    let class_str = parts.next()?;
    let type_str = parts.next()?;
    let rdata_text: String = parts.collect::<Vec<_>>().join(" ");

    if class_str != "IN" {
        return None;
    }

    let name = DomainName::from_str(name_str).ok()?;
    let kind = RecordType::from_str(type_str).ok()?;

    Some(RawRecord {
        name,
        kind,
        class: 1, // IN
        ttl,
        rdata: rdata_text.as_bytes().to_vec(),
        text: line.to_string(),
    })
}

/// Parses a whole section (answer/ns/extra), logging and dropping any line
/// that fails to parse rather than failing the whole record.
pub fn parse_section(lines: &[String]) -> Vec<RawRecord> {
    lines
        .iter()
        .filter_map(|line| match parse_line(line) {
            Some(record) => Some(record),
            None => {
                tracing::warn!(%line, "dropping unparseable cached resource record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_line() {
        let record = parse_line("example.com. 300 IN A 93.184.216.34").unwrap();
        assert_eq!(record.ttl, 300);
        assert_eq!(record.kind, RecordType::A);
    }

    #[test]
    fn drops_malformed_lines_without_panicking() {
        assert!(parse_line("not a valid record").is_none());
        let section = vec![
            "example.com. 300 IN A 93.184.216.34".to_string(),
            "garbage".to_string(),
        ];
        assert_eq!(parse_section(&section).len(), 1);
    }
}
