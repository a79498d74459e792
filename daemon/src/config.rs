//! The daemon's settings struct (SPEC_FULL §1 "Configuration boundary").
//!
//! Every component already accepts a plain, already-validated settings
//! struct at construction; this is the one place that groups them for a
//! single JSON file and env-var overrides, the way `headless-client`'s
//! `Cli` groups per-component flags for a single process.

use intel_model::resolver::{BlockDetection, ResolverId, ResolverScheme, ResolverSource};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfigEntry {
    pub id: u64,
    pub scheme: ResolverScheme,
    pub host: String,
    pub port: Option<u16>,
    pub name: String,
    pub verify_domain: Option<String>,
    #[serde(default)]
    pub search_domains: Vec<String>,
    #[serde(default)]
    pub search_only: bool,
    #[serde(default)]
    pub block_detection: BlockDetection,
    pub path: Option<String>,
    #[serde(default = "default_source")]
    pub source: ResolverSource,
}

fn default_source() -> ResolverSource {
    ResolverSource::Configured
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopeConfigEntry {
    pub suffix: String,
    pub resolver_ids: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    pub sqlite_path: String,
    #[serde(default = "default_history_retention_secs")]
    pub retention_secs: u64,
}

fn default_history_retention_secs() -> u64 {
    30 * 24 * 60 * 60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind_addr: SocketAddr,
    pub dev_mode: bool,
    pub log_directives: String,
    pub log_json: bool,

    pub conn_store_sqlite_path: String,
    pub conn_store_retention_secs: u64,
    pub conn_store_cleanup_interval_secs: u64,
    pub history: Option<HistoryConfig>,

    pub dns_cache_sqlite_path: String,

    pub resolvers: Vec<ResolverConfigEntry>,
    pub scopes: Vec<ScopeConfigEntry>,
    pub local_resolver_ids: Vec<u64>,
    pub global_resolver_ids: Vec<u64>,
    pub mdns_resolver_id: Option<u64>,

    pub special_domains_allowed: bool,
    pub connectivity_domains: Vec<String>,
    pub connectivity_domains_enabled: bool,
    pub env_reserved_ip: Option<Ipv4Addr>,

    pub online_probe_destination: Ipv4Addr,
    pub self_check_enabled: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 8080).into(),
            dev_mode: false,
            log_directives: "info".to_string(),
            log_json: false,
            conn_store_sqlite_path: "sqlite::memory:".to_string(),
            conn_store_retention_secs: 24 * 60 * 60,
            conn_store_cleanup_interval_secs: 10,
            history: None,
            dns_cache_sqlite_path: "sqlite::memory:".to_string(),
            resolvers: Vec::new(),
            scopes: Vec::new(),
            local_resolver_ids: Vec::new(),
            global_resolver_ids: Vec::new(),
            mdns_resolver_id: None,
            special_domains_allowed: true,
            connectivity_domains: Vec::new(),
            connectivity_domains_enabled: true,
            env_reserved_ip: None,
            online_probe_destination: Ipv4Addr::new(1, 1, 1, 1),
            self_check_enabled: true,
        }
    }
}

impl DaemonConfig {
    /// Loads and validates the configuration from a JSON file at `path`.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|error| anyhow::anyhow!("failed to read {}: {error}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|error| anyhow::anyhow!("failed to parse {}: {error}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for entry in &self.resolvers {
            let needs_verify = matches!(entry.scheme, ResolverScheme::Dot)
                || (entry.scheme == ResolverScheme::Doh && entry.host.parse::<std::net::IpAddr>().is_ok());
            if needs_verify && entry.verify_domain.is_none() {
                anyhow::bail!(
                    "resolver {} ({:?}) requires verify_domain",
                    entry.name,
                    entry.scheme
                );
            }
            if !needs_verify && entry.verify_domain.is_some() {
                anyhow::bail!(
                    "resolver {} ({:?}) must not set verify_domain",
                    entry.name,
                    entry.scheme
                );
            }
            if entry.search_only && entry.search_domains.is_empty() {
                anyhow::bail!("resolver {} has search_only without any search_domains", entry.name);
            }
        }
        Ok(())
    }

    pub fn conn_store_retention(&self) -> Duration {
        Duration::from_secs(self.conn_store_retention_secs)
    }

    pub fn conn_store_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.conn_store_cleanup_interval_secs)
    }
}

pub fn resolver_id(raw: u64) -> ResolverId {
    ResolverId(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(json: &str) -> DaemonConfig {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json).unwrap();
        DaemonConfig::load(file.path()).unwrap()
    }

    #[test]
    fn empty_file_loads_to_defaults() {
        let config = write_config("{}");
        assert!(config.resolvers.is_empty());
        assert_eq!(config.conn_store_retention_secs, 24 * 60 * 60);
    }

    #[test]
    fn dot_resolver_without_verify_domain_is_rejected() {
        let json = r#"{
            "resolvers": [
                {"id": 1, "scheme": "Dot", "host": "1.1.1.1", "name": "cloudflare-dot"}
            ]
        }"#;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json).unwrap();
        assert!(DaemonConfig::load(file.path()).is_err());
    }

    #[test]
    fn dns_resolver_with_a_verify_domain_is_rejected() {
        let json = r#"{
            "resolvers": [
                {"id": 1, "scheme": "Dns", "host": "1.1.1.1", "name": "cloudflare", "verify_domain": "cloudflare-dns.com"}
            ]
        }"#;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json).unwrap();
        assert!(DaemonConfig::load(file.path()).is_err());
    }

    #[test]
    fn search_only_without_search_domains_is_rejected() {
        let json = r#"{
            "resolvers": [
                {"id": 1, "scheme": "Dns", "host": "10.0.0.1", "name": "vpn", "search_only": true}
            ]
        }"#;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json).unwrap();
        assert!(DaemonConfig::load(file.path()).is_err());
    }

    #[test]
    fn well_formed_resolver_loads() {
        let config = write_config(
            r#"{
                "resolvers": [
                    {"id": 1, "scheme": "Dns", "host": "1.1.1.1", "name": "cloudflare"}
                ]
            }"#,
        );
        assert_eq!(config.resolvers.len(), 1);
        assert_eq!(config.resolvers[0].name, "cloudflare");
    }
}
