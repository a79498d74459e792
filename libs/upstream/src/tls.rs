//! DoT TLS config (§6 RFC 7858: "TLS framed on port 853 by default; SNI =
//! verify-domain; TLS ≥ 1.2"). Grounded on the teacher's own `rustls` +
//! `webpki-roots` + `ring` provider stack (`rust/Cargo.toml`).

use rustls::{ClientConfig, RootCertStore};
use std::sync::{Arc, OnceLock};

static CLIENT_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

fn install_crypto_provider() {
    // Installing twice is a programmer error in rustls but only the first
    // caller in a process wins in practice; ignore the "already installed"
    // result from any other crate in the binary that did it first.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Process-wide `rustls` client config: webpki-roots trust store, TLS 1.2+
/// (rustls 0.23 negotiates 1.2/1.3 by default, no plaintext fallback).
pub fn client_config() -> Arc<ClientConfig> {
    CLIENT_CONFIG
        .get_or_init(|| {
            install_crypto_provider();

            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let config = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();

            Arc::new(config)
        })
        .clone()
}
