//! Plain UDP transport (§4.C: "New `dns.Client` per query (to randomise
//! source port). Timeout = min(ctx-deadline, 3s). On non-timeout net-error,
//! notify netenv of failed connection; on any error mark upstream failing.").

use crate::{common, ConnectionFailureSink, FailureTracker, Upstream};
use async_trait::async_trait;
use intel_model::resolver::{BlockDetection, ResolverDescriptor};
use intel_model::{Query, RRCache, ResolverError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct UdpUpstream {
    address: SocketAddr,
    descriptor: ResolverDescriptor,
    block_detection: BlockDetection,
    tracker: FailureTracker,
    failure_sink: Arc<dyn ConnectionFailureSink>,
}

impl UdpUpstream {
    pub fn new(
        address: SocketAddr,
        descriptor: ResolverDescriptor,
        block_detection: BlockDetection,
        failure_sink: Arc<dyn ConnectionFailureSink>,
    ) -> Self {
        Self {
            address,
            descriptor,
            block_detection,
            tracker: FailureTracker::default(),
            failure_sink,
        }
    }

    async fn round_trip(&self, query: &Query) -> anyhow::Result<crate::wire::ParsedMessage> {
        // A fresh socket per query randomises the ephemeral source port.
        let bind_addr: SocketAddr = if self.address.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.address).await?;

        let id: u16 = rand::random();
        let packet = crate::wire::build_query(id, &query.fqdn(), query.qtype());

        tokio::time::timeout(DEFAULT_TIMEOUT, socket.send(&packet)).await??;

        let mut buf = vec![0u8; 4096];
        let n = tokio::time::timeout(DEFAULT_TIMEOUT, socket.recv(&mut buf)).await??;
        buf.truncate(n);

        let parsed = crate::wire::parse_message(&buf)?;
        anyhow::ensure!(parsed.id == id, "transaction id mismatch");

        Ok(parsed)
    }
}

#[async_trait]
impl Upstream for UdpUpstream {
    async fn query(&self, query: &Query) -> Result<RRCache, ResolverError> {
        let domain = query.as_domain_name().ok_or(ResolverError::Failure)?;

        match self.round_trip(query).await {
            Ok(parsed) => {
                let result = common::to_rrcache(
                    domain,
                    query.qtype(),
                    parsed,
                    self.descriptor.clone(),
                    self.block_detection,
                );
                if result.is_ok() {
                    self.tracker.report_healthy();
                }
                result
            }
            Err(error) => {
                self.tracker.report_failure();
                let is_timeout = error.is::<tokio::time::error::Elapsed>();
                if !is_timeout {
                    self.failure_sink
                        .notify_connection_failed(&self.descriptor.name);
                }
                tracing::debug!(%error, resolver = %self.descriptor.name, "udp query failed");
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

    #[tokio::test]
    async fn times_out_against_a_black_hole_address() {
        // TEST-NET-1 (RFC 5737): guaranteed unroutable, so the socket will
        // simply never get a reply and we exercise the timeout path without
        // depending on network access.
        let upstream = UdpUpstream::new(
            "192.0.2.1:53".parse().unwrap(),
            ResolverDescriptor {
                id: intel_model::resolver::ResolverId(1),
                scheme: intel_model::resolver::ResolverScheme::Dns,
                scope: None,
                name: "black-hole".to_string(),
            },
            BlockDetection::Disabled,
            Arc::new(crate::NullFailureSink),
        );

        let query = Query::new("example.com.", intel_model::RecordType::A, intel_model::SecurityLevel::Relaxed);
        let result = tokio::time::timeout(Duration::from_secs(4), upstream.query(&query)).await;
        assert!(result.is_ok(), "should resolve (to an error) within 4s");
        assert!(result.unwrap().is_err());
        assert!(upstream.is_failing());
    }
}
