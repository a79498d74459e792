//! Device-location approximation (§4.A).
//!
//! The traceroute probe needs a raw ICMP socket (`CAP_NET_RAW` on Linux),
//! so it is built directly on [`socket2`], the same low-level socket crate
//! the teacher workspace uses in `libs/connlib/socket-factory` for
//! platform-specific socket construction. The probe itself is blocking
//! (`recv` with a read timeout) and is run via [`tokio::task::spawn_blocking`]
//! so it composes with the rest of netenv's async workers.

use intel_model::device_location::{DeviceLocation, GeoData, LocationSource};
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_TIME_EXCEEDED: u8 = 11;
const ICMP_DEST_UNREACHABLE: u8 = 3;
const MAX_TTL: u8 = 4;
const PER_HOP_ATTEMPTS: u8 = 2;
const HOP_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug)]
enum IcmpReply {
    EchoReply { id: u16, seq: u16 },
    TimeExceeded { embedded_id: u16, embedded_seq: u16 },
    DestUnreachable { embedded_id: u16, embedded_seq: u16 },
    Other,
}

fn build_echo_request(id: u16, seq: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 8];
    packet[0] = ICMP_ECHO_REQUEST;
    packet[1] = 0; // code
    packet[4..6].copy_from_slice(&id.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());

    let checksum = internet_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());

    packet
}

fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// Parses a received IPv4 packet carrying an ICMP message, skipping the IP
/// header (whose length is variable, hence reading IHL from byte 0).
fn parse_reply(buf: &[u8]) -> Option<IcmpReply> {
    if buf.is_empty() {
        return None;
    }
    let ihl = (buf[0] & 0x0f) as usize * 4;
    let icmp = buf.get(ihl..)?;
    if icmp.len() < 8 {
        return None;
    }

    match icmp[0] {
        ICMP_ECHO_REPLY => {
            let id = u16::from_be_bytes([icmp[4], icmp[5]]);
            let seq = u16::from_be_bytes([icmp[6], icmp[7]]);
            Some(IcmpReply::EchoReply { id, seq })
        }
        ICMP_TIME_EXCEEDED | ICMP_DEST_UNREACHABLE => {
            // Payload embeds: original IP header + first 8 bytes of the
            // original ICMP echo request (id/seq at the same offsets).
            let embedded_ip = icmp.get(8..)?;
            let embedded_ihl = (embedded_ip.first()? & 0x0f) as usize * 4;
            let embedded_icmp = embedded_ip.get(embedded_ihl..)?;
            if embedded_icmp.len() < 8 {
                return None;
            }
            let embedded_id = u16::from_be_bytes([embedded_icmp[4], embedded_icmp[5]]);
            let embedded_seq = u16::from_be_bytes([embedded_icmp[6], embedded_icmp[7]]);

            Some(if icmp[0] == ICMP_TIME_EXCEEDED {
                IcmpReply::TimeExceeded {
                    embedded_id,
                    embedded_seq,
                }
            } else {
                IcmpReply::DestUnreachable {
                    embedded_id,
                    embedded_seq,
                }
            })
        }
        _ => Some(IcmpReply::Other),
    }
}

fn is_global_v4(ip: &Ipv4Addr) -> bool {
    !ip.is_private() && !ip.is_loopback() && !ip.is_link_local() && !ip.is_broadcast()
}

/// Runs an ICMPv4 traceroute to `destination`, implementing §4.A's hop
/// algorithm: for `TTL = 1..=MAX_TTL` (no extension logic here -- the
/// extendable-on-non-global-reply behaviour lives in the caller, which can
/// re-invoke with a higher `max_ttl`), two attempts per hop, matching by
/// `(id, seq >= min_seq_for_this_hop)` and by the embedded echo fields for
/// Time-Exceeded/Destination-Unreachable.
///
/// Returns the first global-unicast Time-Exceeded source (the device's
/// approximate location), or `None` if the destination replies directly
/// without an intervening Time-Exceeded, or nothing useful was heard.
pub fn traceroute_blocking(destination: Ipv4Addr, max_ttl: u8) -> anyhow::Result<Option<Ipv4Addr>> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
    socket.set_read_timeout(Some(HOP_TIMEOUT))?;

    let id: u16 = rand::thread_rng().gen();
    let mut seq: u16 = 0;
    let dest_addr = SocketAddr::V4(SocketAddrV4::new(destination, 0));

    for ttl in 1..=max_ttl {
        socket.set_ttl_v4(ttl as u32)?;
        let min_seq_this_hop = seq;

        for _attempt in 0..PER_HOP_ATTEMPTS {
            seq = seq.wrapping_add(1);
            let packet = build_echo_request(id, seq);
            socket.send_to(&packet, &dest_addr.into())?;

            let started = Instant::now();
            let mut buf = [std::mem::MaybeUninit::new(0u8); 1500];

            loop {
                if started.elapsed() > HOP_TIMEOUT {
                    break;
                }

                let Ok((n, _from)) = socket.recv_from(&mut buf) else {
                    break;
                };

                // SAFETY: `recv_from` initialised the first `n` bytes.
                let bytes: Vec<u8> = buf[..n]
                    .iter()
                    .map(|b| unsafe { b.assume_init() })
                    .collect();

                match parse_reply(&bytes) {
                    Some(IcmpReply::TimeExceeded {
                        embedded_id,
                        embedded_seq,
                    }) if embedded_id == id && embedded_seq >= min_seq_this_hop => {
                        if let SocketAddr::V4(v4) = _from.as_socket().unwrap_or(dest_addr) {
                            if is_global_v4(v4.ip()) {
                                return Ok(Some(*v4.ip()));
                            }
                        }
                    }
                    Some(IcmpReply::EchoReply {
                        id: reply_id,
                        seq: reply_seq,
                    }) if reply_id == id && reply_seq >= min_seq_this_hop => {
                        // Destination replied directly with no Time-Exceeded
                        // hop in between: abort, "not located" (§4.A).
                        return Ok(None);
                    }
                    Some(IcmpReply::DestUnreachable {
                        embedded_id,
                        embedded_seq,
                    }) if embedded_id == id && embedded_seq >= min_seq_this_hop => {
                        return Ok(None);
                    }
                    _ => continue,
                }
            }
        }
    }

    Ok(None)
}

/// Coarse timezone-derived location (§4.A): `longitude = tz_offset_seconds
/// / 43200 * 180` at a fixed latitude of 48, accuracy radius 1000km.
pub fn timezone_location() -> DeviceLocation {
    let offset_seconds = chrono::Local::now().offset().local_minus_utc();
    let longitude = (offset_seconds as f64 / 43_200.0) * 180.0;

    DeviceLocation {
        ip: IpAddr::from([0, 0, 0, 0]),
        geo: GeoData {
            country: None,
            asn: None,
            latitude: Some(48.0),
            longitude: Some(longitude),
            accuracy_radius_km: Some(1000),
        },
        source: LocationSource::Timezone,
    }
}

pub fn traceroute_location(ip: Ipv4Addr) -> DeviceLocation {
    DeviceLocation {
        ip: IpAddr::V4(ip),
        geo: GeoData::default(),
        source: LocationSource::Traceroute,
    }
}

pub fn interface_location(ip: IpAddr) -> DeviceLocation {
    DeviceLocation {
        ip,
        geo: GeoData::default(),
        source: LocationSource::Interface,
    }
}

/// Async wrapper: runs the blocking traceroute on a blocking-pool thread,
/// then assembles the full location set described in §4.A (traceroute +
/// interface addresses + timezone fallback), deduplicated and sorted via
/// [`intel_model::device_location::dedup_and_sort`].
pub async fn locate(
    probe_destination: Ipv4Addr,
    interface_global_addresses: Vec<IpAddr>,
) -> anyhow::Result<Vec<DeviceLocation>> {
    let traceroute_hop = tokio::task::spawn_blocking(move || {
        traceroute_blocking(probe_destination, MAX_TTL)
    })
    .await??;

    let mut locations: Vec<DeviceLocation> = interface_global_addresses
        .into_iter()
        .map(interface_location)
        .collect();

    if let Some(hop) = traceroute_hop {
        locations.push(traceroute_location(hop));
    }

    locations.push(timezone_location());

    Ok(intel_model::device_location::dedup_and_sort(locations))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_zero_packet_is_all_ones() {
        let packet = vec![0u8; 8];
        assert_eq!(internet_checksum(&packet), 0xffff);
    }

    #[test]
    fn parse_reply_rejects_short_buffers() {
        assert!(parse_reply(&[]).is_none());
        assert!(parse_reply(&[0x45]).is_none());
    }

    #[test]
    fn timezone_location_has_fixed_latitude_and_accuracy() {
        let loc = timezone_location();
        assert_eq!(loc.geo.latitude, Some(48.0));
        assert_eq!(loc.geo.accuracy_radius_km, Some(1000));
        assert_eq!(loc.source, LocationSource::Timezone);
    }
}
