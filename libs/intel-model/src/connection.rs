use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConnectionType {
    Dns,
    Ip,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Dns => "dns",
            ConnectionType::Ip => "ip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum IpScope {
    Global,
    Private,
    LinkLocal,
    Loopback,
    Multicast,
}

impl IpScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpScope::Global => "global",
            IpScope::Private => "private",
            IpScope::LinkLocal => "link-local",
            IpScope::Loopback => "loopback",
            IpScope::Multicast => "multicast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Verdict {
    Undecided,
    Accept,
    Block,
    Drop,
    Failed,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Undecided => "undecided",
            Verdict::Accept => "accept",
            Verdict::Block => "block",
            Verdict::Drop => "drop",
            Verdict::Failed => "failed",
        }
    }
}

/// A row of the connections table (§3). `ended.is_none()` exactly when the
/// connection is still active.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: String,
    pub kind: ConnectionType,
    pub ip_version: u8,
    pub protocol: u8,
    pub local_ip: IpAddr,
    pub local_port: u16,
    pub remote_ip: IpAddr,
    pub remote_port: u16,
    pub domain: Option<String>,
    pub country: Option<String>,
    pub asn: Option<u32>,
    pub as_owner: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub scope: IpScope,
    pub verdict: Verdict,
    pub started: i64,
    pub ended: Option<i64>,
    pub tunneled: bool,
    pub encrypted: bool,
    pub internal: bool,
    pub inbound: bool,
    pub extra_data: Json,
}

impl Connection {
    /// Stable, restart-surviving id: a SHA-256 hex digest of the upstream
    /// connection id and start time (§3, §8: "a pure function of
    /// (c.id, c.started); identical inputs produce identical 64-hex
    /// outputs").
    pub fn compute_id(upstream_connection_id: &str, started: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(upstream_connection_id.as_bytes());
        hasher.update(b"|");
        hasher.update(started.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_active(&self) -> bool {
        self.ended.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_id_is_pure_function_of_id_and_started() {
        let a = Connection::compute_id("conn-1", 1_000);
        let b = Connection::compute_id("conn-1", 1_000);
        let c = Connection::compute_id("conn-1", 1_001);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
