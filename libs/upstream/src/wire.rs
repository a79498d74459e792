//! Minimal DNS message codec (RFC 1035 §4).
//!
//! The rest of the crate works in terms of [`intel_model::RawRecord`]
//! rather than `domain`'s structured record types (see the grounding note
//! on `RawRecord` in `intel-model`), so this module only needs to get bytes
//! on and off the wire, not model every RR type. Supports name compression
//! on the decode side (every real-world resolver uses it) and plain labels
//! on the encode side.

use intel_model::rrcache::RawRecord;
use intel_model::{DomainName, RecordType};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

pub const HEADER_LEN: usize = 12;
const MAX_POINTER_HOPS: usize = 16;

pub struct ParsedMessage {
    pub id: u16,
    pub rcode: u8,
    pub answers: Vec<RawRecord>,
    pub authority: Vec<RawRecord>,
    pub additional: Vec<RawRecord>,
}

/// Encodes a single-question query for `fqdn`/`qtype` with transaction id
/// `id`, recursion desired.
pub fn build_query(id: u16, fqdn: &str, qtype: RecordType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&[0x01, 0x00]); // RD=1, standard query
    buf.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    buf.extend_from_slice(&0u16.to_be_bytes()); // ancount
    buf.extend_from_slice(&0u16.to_be_bytes()); // nscount
    buf.extend_from_slice(&0u16.to_be_bytes()); // arcount

    encode_name(&mut buf, fqdn);
    buf.extend_from_slice(&u16::from(qtype).to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // IN

    buf
}

fn encode_name(buf: &mut Vec<u8>, fqdn: &str) {
    for label in fqdn.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        let bytes = label.as_bytes();
        buf.push(bytes.len() as u8);
        buf.extend_from_slice(bytes);
    }
    buf.push(0);
}

/// Decodes a complete message (UDP datagram, or a TCP/DoT frame with the
/// 2-byte length prefix already stripped).
pub fn parse_message(buf: &[u8]) -> anyhow::Result<ParsedMessage> {
    anyhow::ensure!(buf.len() >= HEADER_LEN, "message shorter than a DNS header");

    let id = u16::from_be_bytes([buf[0], buf[1]]);
    let rcode = buf[3] & 0x0f;
    let qdcount = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let ancount = u16::from_be_bytes([buf[6], buf[7]]) as usize;
    let nscount = u16::from_be_bytes([buf[8], buf[9]]) as usize;
    let arcount = u16::from_be_bytes([buf[10], buf[11]]) as usize;

    let mut offset = HEADER_LEN;
    for _ in 0..qdcount {
        let (_name, next) = decode_name(buf, offset)?;
        anyhow::ensure!(buf.len() >= next + 4, "truncated question section");
        offset = next + 4; // qtype + qclass
    }

    let mut answers = Vec::with_capacity(ancount);
    for _ in 0..ancount {
        let (record, next) = decode_rr(buf, offset)?;
        offset = next;
        answers.push(record);
    }

    let mut authority = Vec::with_capacity(nscount);
    for _ in 0..nscount {
        let (record, next) = decode_rr(buf, offset)?;
        offset = next;
        authority.push(record);
    }

    let mut additional = Vec::with_capacity(arcount);
    for _ in 0..arcount {
        let (record, next) = decode_rr(buf, offset)?;
        offset = next;
        additional.push(record);
    }

    Ok(ParsedMessage {
        id,
        rcode,
        answers,
        authority,
        additional,
    })
}

fn decode_rr(buf: &[u8], offset: usize) -> anyhow::Result<(RawRecord, usize)> {
    let (name, after_name) = decode_name(buf, offset)?;
    anyhow::ensure!(buf.len() >= after_name + 10, "truncated RR header");

    let rtype = u16::from_be_bytes([buf[after_name], buf[after_name + 1]]);
    let class = u16::from_be_bytes([buf[after_name + 2], buf[after_name + 3]]);
    let ttl = u32::from_be_bytes([
        buf[after_name + 4],
        buf[after_name + 5],
        buf[after_name + 6],
        buf[after_name + 7],
    ]);
    let rdlength = u16::from_be_bytes([buf[after_name + 8], buf[after_name + 9]]) as usize;
    let rdata_start = after_name + 10;
    let rdata_end = rdata_start + rdlength;
    anyhow::ensure!(buf.len() >= rdata_end, "truncated RR rdata");

    let rdata = buf[rdata_start..rdata_end].to_vec();
    let kind = RecordType::from(rtype);
    let domain_name =
        DomainName::from_str(&name).map_err(|_| anyhow::anyhow!("invalid RR name {name:?}"))?;
    let text = render_presentation(&name, ttl, kind, &rdata);

    Ok((
        RawRecord {
            name: domain_name,
            kind,
            class,
            ttl,
            rdata,
            text,
        },
        rdata_end,
    ))
}

fn render_presentation(name: &str, ttl: u32, kind: RecordType, rdata: &[u8]) -> String {
    let rdata_text = match kind {
        RecordType::A if rdata.len() == 4 => {
            Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]).to_string()
        }
        RecordType::Aaaa if rdata.len() == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(rdata);
            Ipv6Addr::from(octets).to_string()
        }
        _ => hex::encode(rdata),
    };

    format!("{name} {ttl} IN {kind} {rdata_text}")
}

/// Decodes a possibly-compressed name starting at `offset`, returning the
/// dot-terminated presentation string and the offset just past the name
/// *as it appears in the original message* (i.e. past the first pointer,
/// not past whatever it points to).
fn decode_name(buf: &[u8], offset: usize) -> anyhow::Result<(String, usize)> {
    let mut labels = Vec::new();
    let mut cursor = offset;
    let mut end_of_name: Option<usize> = None;
    let mut hops = 0;

    loop {
        anyhow::ensure!(cursor < buf.len(), "name pointer out of bounds");
        let len = buf[cursor];

        if len == 0 {
            if end_of_name.is_none() {
                end_of_name = Some(cursor + 1);
            }
            break;
        }

        if len & 0xc0 == 0xc0 {
            anyhow::ensure!(cursor + 1 < buf.len(), "truncated name pointer");
            if end_of_name.is_none() {
                end_of_name = Some(cursor + 2);
            }
            hops += 1;
            anyhow::ensure!(hops <= MAX_POINTER_HOPS, "too many name compression pointers");

            let pointer = (((len & 0x3f) as usize) << 8) | buf[cursor + 1] as usize;
            anyhow::ensure!(pointer < cursor, "non-backward name pointer");
            cursor = pointer;
            continue;
        }

        let label_len = len as usize;
        anyhow::ensure!(cursor + 1 + label_len <= buf.len(), "truncated label");
        let label = std::str::from_utf8(&buf[cursor + 1..cursor + 1 + label_len])
            .unwrap_or("")
            .to_string();
        labels.push(label);
        cursor += 1 + label_len;
    }

    let name = if labels.is_empty() {
        ".".to_string()
    } else {
        format!("{}.", labels.join("."))
    };

    Ok((name, end_of_name.unwrap_or(cursor)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_well_formed_header_and_question() {
        let packet = build_query(0x1234, "example.com.", RecordType::A);
        assert_eq!(&packet[0..2], &[0x12, 0x34]);
        assert_eq!(&packet[4..6], &1u16.to_be_bytes()); // qdcount
    }

    #[test]
    fn round_trips_an_a_record_without_compression() {
        let mut msg = Vec::new();
        msg.extend_from_slice(&0x0042u16.to_be_bytes());
        msg.extend_from_slice(&[0x81, 0x80]); // response, RA, no error
        msg.extend_from_slice(&1u16.to_be_bytes()); // qdcount
        msg.extend_from_slice(&1u16.to_be_bytes()); // ancount
        msg.extend_from_slice(&0u16.to_be_bytes());
        msg.extend_from_slice(&0u16.to_be_bytes());
        encode_name(&mut msg, "example.com.");
        msg.extend_from_slice(&u16::from(RecordType::A).to_be_bytes());
        msg.extend_from_slice(&1u16.to_be_bytes());

        encode_name(&mut msg, "example.com.");
        msg.extend_from_slice(&u16::from(RecordType::A).to_be_bytes());
        msg.extend_from_slice(&1u16.to_be_bytes());
        msg.extend_from_slice(&300u32.to_be_bytes());
        msg.extend_from_slice(&4u16.to_be_bytes());
        msg.extend_from_slice(&[93, 184, 216, 34]);

        let parsed = parse_message(&msg).unwrap();
        assert_eq!(parsed.id, 0x0042);
        assert_eq!(parsed.rcode, 0);
        assert_eq!(parsed.answers.len(), 1);
        assert!(parsed.answers[0].text.contains("93.184.216.34"));
    }
}
