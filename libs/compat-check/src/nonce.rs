//! Packet-observation boundary for the self-check (§4.E).
//!
//! The actual packet interception (reading the nonce back off the wire) is
//! an external collaborator, same as `PacketSource` for Netenv's traceroute
//! probe and the connection feed for component F: this crate only defines
//! the non-blocking read side it consumes.

use std::sync::Arc;

/// Non-blocking read side of the packet-observation channel. `try_recv_nonce`
/// must never block: a miss just means "nothing observed yet this poll".
pub trait NonceObserver: Send + Sync {
    fn try_recv_nonce(&self) -> Option<String>;
}

/// Forwards nonces submitted by packet interception over an unbounded
/// channel. [`ChannelNonceObserver::sender`] is the non-blocking submission
/// side used by whatever owns the packet pipeline.
pub struct ChannelNonceObserver {
    sender: tokio::sync::mpsc::UnboundedSender<String>,
    receiver: parking_lot::Mutex<tokio::sync::mpsc::UnboundedReceiver<String>>,
}

impl ChannelNonceObserver {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Self {
            sender,
            receiver: parking_lot::Mutex::new(receiver),
        })
    }

    pub fn sender(&self) -> tokio::sync::mpsc::UnboundedSender<String> {
        self.sender.clone()
    }
}

impl NonceObserver for ChannelNonceObserver {
    fn try_recv_nonce(&self) -> Option<String> {
        self.receiver.lock().try_recv().ok()
    }
}

/// Generates a random hex nonce suitable for use as a DNS label.
pub fn generate_nonce() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_observer_forwards_submitted_nonces() {
        let observer = ChannelNonceObserver::new();
        assert!(observer.try_recv_nonce().is_none());

        observer.sender().send("abc123".to_string()).unwrap();
        assert_eq!(observer.try_recv_nonce().as_deref(), Some("abc123"));
        assert!(observer.try_recv_nonce().is_none());
    }

    #[test]
    fn nonces_are_distinct() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
        assert_eq!(a.len(), 16);
    }
}
