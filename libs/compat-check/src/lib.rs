//! Component E: the compatibility self-check (§4.E).
//!
//! Detects VPN/AV interference with DNS resolution by round-tripping a
//! nonce through the resolver core and a packet-observation channel, and
//! cross-informs other subsystems through a process-wide "failing" flag.

pub mod check;
pub mod nonce;

pub use check::{SelfCheck, SelfCheckConfig};
pub use nonce::{ChannelNonceObserver, NonceObserver};
