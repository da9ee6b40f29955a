//! # Session Events
//!
//! Typed notifications flowing from the networking layer up to the
//! game engine: connection lifecycle, chat, and non-fatal errors.
//! Replicated entity and match-state traffic does not appear here — it
//! lands directly in the entity store through the merge policy.
//!
//! Delivery is a crossbeam channel so the game loop drains events at
//! its own pace without borrowing the session.

use crate::protocol::PeerId;

/// Something the game layer should know about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A peer's data channel reached `Open`.
    PeerConnected(PeerId),
    /// A peer's channel was lost; its owned entities are frozen, not
    /// despawned — reacting to the departure is the game's decision.
    PeerDisconnected(PeerId),
    /// A chat line arrived.
    Chat {
        /// Connection the line arrived on.
        from: PeerId,
        /// Display name chosen by the sender.
        sender: String,
        /// Message text.
        text: String,
    },
    /// A non-fatal failure worth surfacing to the user once.
    Error(String),
}

/// Channel for delivering events to the game loop.
///
/// Uses crossbeam for lock-free communication.
pub struct EventChannel<T> {
    sender: crossbeam_channel::Sender<T>,
    receiver: crossbeam_channel::Receiver<T>,
}

impl<T> EventChannel<T> {
    /// Creates a new bounded event channel.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self { sender, receiver }
    }

    /// Creates a new unbounded event channel.
    #[must_use]
    pub fn unbounded() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// Publishes an event, dropping it when the consumer is full
    /// rather than blocking the session loop.
    pub fn publish(&self, event: T) {
        let _ = self.sender.try_send(event);
    }

    /// Takes the next pending event, if any.
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Gets a clone of the receiver for the game loop to hold.
    #[must_use]
    pub fn receiver(&self) -> crossbeam_channel::Receiver<T> {
        self.receiver.clone()
    }
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_drain() {
        let channel = EventChannel::default();
        channel.publish(SessionEvent::PeerConnected(PeerId::from("p")));
        channel.publish(SessionEvent::Error("boom".into()));

        assert_eq!(
            channel.try_recv(),
            Some(SessionEvent::PeerConnected(PeerId::from("p")))
        );
        assert_eq!(channel.try_recv(), Some(SessionEvent::Error("boom".into())));
        assert_eq!(channel.try_recv(), None);
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let channel = EventChannel::new(1);
        channel.publish(SessionEvent::Error("first".into()));
        channel.publish(SessionEvent::Error("overflow".into()));

        assert_eq!(channel.try_recv(), Some(SessionEvent::Error("first".into())));
        assert_eq!(channel.try_recv(), None);
    }
}
