//! User-visible failure notification boundary (§4.A/§4.E/§4.F; SPEC_FULL §1
//! "Notification boundary").
//!
//! The registry that actually displays/stores these events is out of scope
//! ("Out of scope: notification/UI surface"); this crate only defines the
//! seam every long-lived worker reports through.

use std::sync::Arc;

/// A single user-visible event raised by a long-lived worker.
///
/// `event_id` is stable per failure condition so that a display layer can
/// suppress duplicates and delete a specific event once cleared (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event_id: String,
    pub module: &'static str,
    pub message: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);

    /// Removes a previously-raised notification, e.g. once its condition
    /// self-heals (§6: events "can be deleted").
    fn clear(&self, event_id: &str);
}

/// Discards every notification. Default for components that don't need
/// user-visible surfacing (most unit tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notification: Notification) {}
    fn clear(&self, _event_id: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierEvent {
    Notify(Notification),
    Clear(String),
}

/// Forwards every notify/clear call onto an unbounded channel. This is the
/// notifier actually exercised by tests that assert on raised events.
#[derive(Clone)]
pub struct ChannelNotifier {
    sender: tokio::sync::mpsc::UnboundedSender<NotifierEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<NotifierEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        let _ = self.sender.send(NotifierEvent::Notify(notification));
    }

    fn clear(&self, event_id: &str) {
        let _ = self.sender.send(NotifierEvent::Clear(event_id.to_string()));
    }
}

pub type SharedNotifier = Arc<dyn Notifier>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_notifier_accepts_anything() {
        let n = NullNotifier;
        n.notify(Notification {
            event_id: "x".into(),
            module: "test",
            message: "y".into(),
        });
        n.clear("x");
    }

    #[tokio::test]
    async fn channel_notifier_forwards_events() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Notification {
            event_id: "self-check".into(),
            module: "compat-check",
            message: "DNS interception detected".into(),
        });
        notifier.clear("self-check");

        assert_eq!(
            rx.recv().await,
            Some(NotifierEvent::Notify(Notification {
                event_id: "self-check".into(),
                module: "compat-check",
                message: "DNS interception detected".into(),
            }))
        );
        assert_eq!(rx.recv().await, Some(NotifierEvent::Clear("self-check".into())));
    }
}
