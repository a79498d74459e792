//! mDNS resolution for the `.local.` scope (§4.D, §5 "mDNS listener
//! worker").
//!
//! No mDNS/service-discovery crate in the example pack fits a plain
//! query/response DNS round-trip: `mdns-sd` (the only DNS-adjacent crate
//! found, in `other_examples/manifests/ktheindifferent-AtlasDNS`) is built
//! around service registration/browsing, not resolving a single `A`/`AAAA`
//! name on demand. Since mDNS (RFC 6762) reuses the ordinary DNS message
//! format, this client reuses [`upstream::wire`] for encode/decode and asks
//! for a unicast reply (the "QU" question bit) so a single UDP socket can
//! send the query and read the response without joining the multicast
//! group. IPv4-only, matching the IPv4-only scope of the traceroute
//! location probe elsewhere in this workspace.

use async_trait::async_trait;
use intel_model::resolver::{BlockDetection, ResolverDescriptor};
use intel_model::{Query, RRCache, ResolverError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use upstream::{common, FailureTracker, Upstream};

/// RFC 6762 §3: the mDNS multicast group and port.
pub const MDNS_GROUP: &str = "224.0.0.251:5353";
const QUERY_TIMEOUT: Duration = Duration::from_secs(1);
/// Top bit of the question's qclass field: "unicast response requested".
const QU_BIT: u8 = 0x80;

pub struct MdnsResolver {
    group: SocketAddr,
    descriptor: ResolverDescriptor,
    tracker: FailureTracker,
}

impl MdnsResolver {
    pub fn new(descriptor: ResolverDescriptor) -> anyhow::Result<Self> {
        Ok(Self {
            group: MDNS_GROUP.parse()?,
            descriptor,
            tracker: FailureTracker::default(),
        })
    }

    async fn round_trip(&self, query: &Query) -> anyhow::Result<upstream::wire::ParsedMessage> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        let id: u16 = rand::random();
        let mut packet = upstream::wire::build_query(id, query.fqdn(), query.qtype());
        let len = packet.len();
        packet[len - 2] |= QU_BIT;

        tokio::time::timeout(QUERY_TIMEOUT, socket.send_to(&packet, self.group)).await??;

        let mut buf = vec![0u8; 4096];
        let (n, _from) = tokio::time::timeout(QUERY_TIMEOUT, socket.recv_from(&mut buf)).await??;
        buf.truncate(n);

        let parsed = upstream::wire::parse_message(&buf)?;
        anyhow::ensure!(parsed.id == id, "transaction id mismatch");
        Ok(parsed)
    }
}

#[async_trait]
impl Upstream for MdnsResolver {
    async fn query(&self, query: &Query) -> Result<RRCache, ResolverError> {
        let domain = query.as_domain_name().ok_or(ResolverError::Failure)?;

        match self.round_trip(query).await {
            Ok(parsed) => {
                let result = common::to_rrcache(
                    domain,
                    query.qtype(),
                    parsed,
                    self.descriptor.clone(),
                    BlockDetection::Disabled,
                );
                if result.is_ok() {
                    self.tracker.report_healthy();
                }
                result
            }
            Err(error) => {
                self.tracker.report_failure();
                let is_timeout = error.is::<tokio::time::error::Elapsed>();
                tracing::debug!(%error, "mdns query failed");
                Err(if is_timeout {
                    ResolverError::Timeout
                } else {
                    ResolverError::Failure
                })
            }
        }
    }

    fn is_failing(&self) -> bool {
        self.tracker.is_failing()
    }

    fn report_failure(&self) {
        self.tracker.report_failure();
    }

    fn report_healthy(&self) {
        self.tracker.report_healthy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_requests_a_unicast_response() {
        let mut packet = upstream::wire::build_query(1, "printer.local.", intel_model::RecordType::A);
        let len = packet.len();
        packet[len - 2] |= QU_BIT;
        assert_eq!(packet[len - 2] & QU_BIT, QU_BIT);
    }
}
