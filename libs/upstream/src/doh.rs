//! DNS-over-HTTPS transport (§4.C, §6 RFC 8484): GET
//! `https://host[:port]<path>?dns=<base64url-no-pad>`.

use crate::{common, FailureTracker, Upstream};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use intel_model::resolver::{BlockDetection, ResolverDescriptor};
use intel_model::{Query, RRCache, ResolverError};
use std::time::Duration;

const IDLE_TIMEOUT: Duration = Duration::from_secs(180);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PATH: &str = "/dns-query";

pub struct DohUpstream {
    endpoint: String,
    /// The hostname this resolver's URL was originally configured with,
    /// never queried through itself to avoid a bootstrap self-resolution
    /// loop (§4.D compliance: `skip_fqdn`).
    http: reqwest::Client,
    descriptor: ResolverDescriptor,
    block_detection: BlockDetection,
    tracker: FailureTracker,
}

impl DohUpstream {
    pub fn new(
        host: &str,
        port: Option<u16>,
        path: Option<&str>,
        descriptor: ResolverDescriptor,
        block_detection: BlockDetection,
    ) -> anyhow::Result<Self> {
        let port_part = port.map(|p| format!(":{p}")).unwrap_or_default();
        let path = path.unwrap_or(DEFAULT_PATH);
        let endpoint = format!("https://{host}{port_part}{path}");

        let http = reqwest::Client::builder()
            .pool_idle_timeout(IDLE_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            endpoint,
            http,
            descriptor,
            block_detection,
            tracker: FailureTracker::default(),
        })
    }

    async fn round_trip(&self, query: &Query) -> anyhow::Result<crate::wire::ParsedMessage> {
        let id: u16 = rand::random();
        let packet = crate::wire::build_query(id, &query.fqdn(), query.qtype());
        let encoded = URL_SAFE_NO_PAD.encode(packet);

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("dns", encoded)])
            .header(reqwest::header::ACCEPT, "application/dns-message")
            .send()
            .await?
            .error_for_status()?;

        let body = response.bytes().await?;
        let parsed = crate::wire::parse_message(&body)?;
        anyhow::ensure!(parsed.id == id, "transaction id mismatch");

        Ok(parsed)
    }
}

#[async_trait]
impl Upstream for DohUpstream {
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
                tracing::debug!(%error, resolver = %self.descriptor.name, "doh query failed");
                if error.is::<reqwest::Error>()
                    && error.downcast_ref::<reqwest::Error>().unwrap().is_timeout()
                {
                    Err(ResolverError::Timeout)
                } else {
                    Err(ResolverError::Failure)
                }
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
    fn builds_default_path_endpoint() {
        let doh = DohUpstream::new(
            "dns.example.",
            None,
            None,
            ResolverDescriptor {
                id: intel_model::resolver::ResolverId(1),
                scheme: intel_model::resolver::ResolverScheme::Doh,
                scope: None,
                name: "example-doh".to_string(),
            },
            BlockDetection::Disabled,
        )
        .unwrap();

        assert_eq!(doh.endpoint, "https://dns.example./dns-query");
    }
}
