//! # Message Router
//!
//! Serializes outbound envelopes, parses inbound bytes, and enforces
//! the two resilience boundaries of the protocol:
//!
//! - malformed or unrecognized frames are logged and dropped, never
//!   propagated — one bad peer must not destabilize the session
//! - per-sender sequence numbers are checked monotonic, so duplicated
//!   or replayed frames from a misbehaving sender are discarded
//!
//! Broadcast traffic goes only to peers already `Open` (periodic
//! broadcasts are idempotent, a missed tick is harmless); unicast
//! traffic queues until the channel opens and flushes in order.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::metrics::MetricsCollector;
use crate::peer::PeerConnectionManager;
use crate::protocol::{Envelope, EnvelopeBody, PeerId};
use crate::transport::Transport;

/// Outbound sealing and inbound parsing/dispatch for one local peer.
pub struct MessageRouter {
    me: PeerId,
    next_sequence: u64,
    last_seen: HashMap<PeerId, u64>,
}

impl MessageRouter {
    /// Creates a router stamping `me` as the sender of every envelope.
    pub fn new(me: PeerId) -> Self {
        Self {
            me,
            next_sequence: 0,
            last_seen: HashMap::new(),
        }
    }

    /// Stamps a payload with the local sender id and the next sequence
    /// number.
    pub fn seal(&mut self, body: EnvelopeBody) -> Envelope {
        self.next_sequence += 1;
        Envelope {
            sender: self.me.clone(),
            sequence: self.next_sequence,
            body,
        }
    }

    /// Sends an envelope to every peer currently `Open`.
    ///
    /// Peers still connecting are skipped, not queued. Returns the
    /// number of deliveries.
    pub fn broadcast<T: Transport>(
        &mut self,
        peers: &mut PeerConnectionManager<T>,
        metrics: &mut MetricsCollector,
        body: EnvelopeBody,
    ) -> usize {
        let envelope = self.seal(body);
        let bytes = envelope.encode();
        let targets: Vec<PeerId> = peers.open_peers().cloned().collect();

        let mut delivered = 0;
        for peer in &targets {
            if peers.send(peer, &bytes) {
                metrics.on_sent(bytes.len());
                delivered += 1;
            }
        }
        debug!(kind = envelope.body.kind(), delivered, "broadcast");
        delivered
    }

    /// Sends an envelope to one peer.
    ///
    /// Returns `true` when the frame went out immediately. When the
    /// channel is not yet `Open` the frame is queued for in-order
    /// flush on open and `false` is returned; nothing was delivered
    /// yet, so the sent counters are untouched.
    pub fn unicast<T: Transport>(
        &mut self,
        peers: &mut PeerConnectionManager<T>,
        metrics: &mut MetricsCollector,
        peer: &PeerId,
        body: EnvelopeBody,
    ) -> bool {
        let envelope = self.seal(body);
        let bytes = envelope.encode();
        if peers.send(peer, &bytes) {
            metrics.on_sent(bytes.len());
            return true;
        }
        debug!(peer = %peer, kind = envelope.body.kind(), "channel not open, queueing");
        peers.enqueue(peer, bytes);
        false
    }

    /// Flushes frames queued for `peer`, in order. Called when the
    /// channel reaches `Open`.
    pub fn flush<T: Transport>(
        &mut self,
        peers: &mut PeerConnectionManager<T>,
        metrics: &mut MetricsCollector,
        peer: &PeerId,
    ) {
        for bytes in peers.take_queue(peer) {
            if peers.send(peer, &bytes) {
                metrics.on_sent(bytes.len());
            }
        }
    }

    /// Parses one inbound frame from `peer`.
    ///
    /// Returns `None` — after logging — for malformed frames, sender
    /// spoofing (envelope sender differing from the link it arrived
    /// on), and stale or duplicate sequence numbers. Parse failures
    /// are non-fatal by design.
    pub fn receive(
        &mut self,
        metrics: &mut MetricsCollector,
        peer: &PeerId,
        bytes: &[u8],
    ) -> Option<Envelope> {
        let envelope = match Envelope::decode(peer, bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(peer = %peer, %err, "dropping malformed frame");
                return None;
            }
        };
        metrics.on_received(bytes.len());

        if envelope.sender != *peer {
            warn!(peer = %peer, claimed = %envelope.sender, "dropping frame with spoofed sender");
            return None;
        }

        let last = self.last_seen.entry(peer.clone()).or_insert(0);
        if envelope.sequence <= *last {
            debug!(
                peer = %peer,
                sequence = envelope.sequence,
                last = *last,
                "dropping stale or duplicate frame"
            );
            return None;
        }
        *last = envelope.sequence;

        Some(envelope)
    }

    /// Forgets sequencing state for a departed peer, so a fresh
    /// session from the same id starts clean.
    pub fn forget(&mut self, peer: &PeerId) {
        self.last_seen.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChatMessage;
    use crate::transport::memory::{MemoryMesh, MemoryTransport};
    use std::time::Instant;

    fn chat(text: &str) -> EnvelopeBody {
        EnvelopeBody::Chat(ChatMessage {
            text: text.into(),
            sender: "tester".into(),
        })
    }

    fn wired_pair(
        mesh: &MemoryMesh,
        a: &str,
        b: &str,
    ) -> (
        PeerConnectionManager<MemoryTransport>,
        PeerConnectionManager<MemoryTransport>,
    ) {
        let mut left = PeerConnectionManager::new(mesh.endpoint(a));
        let mut right = PeerConnectionManager::new(mesh.endpoint(b));
        left.connect(&PeerId::from(b), true, Instant::now());
        left.poll(Instant::now());
        right.poll(Instant::now());
        (left, right)
    }

    #[test]
    fn test_broadcast_skips_unopened_peers() {
        let mesh = MemoryMesh::new();
        let (mut peers, _other) = wired_pair(&mesh, "me", "open_peer");
        // Second connection never completes; broadcast must skip it.
        peers.connect(&PeerId::from("pending"), true, Instant::now());

        let mut router = MessageRouter::new(PeerId::from("me"));
        let mut metrics = MetricsCollector::new();
        let delivered = router.broadcast(&mut peers, &mut metrics, chat("hi"));

        assert_eq!(delivered, 1);
        assert_eq!(metrics.snapshot().messages_sent, 1);
    }

    #[test]
    fn test_unicast_queues_until_open() {
        let mesh = MemoryMesh::new();
        let _remote = mesh.endpoint("remote");
        let mut peers = PeerConnectionManager::new(mesh.endpoint("me"));
        let mut router = MessageRouter::new(PeerId::from("me"));
        let mut metrics = MetricsCollector::new();

        peers.connect(&PeerId::from("remote"), true, Instant::now());
        let sent_now = router.unicast(&mut peers, &mut metrics, &PeerId::from("remote"), chat("hi"));

        assert!(!sent_now);
        assert_eq!(metrics.snapshot().messages_sent, 0);
        assert_eq!(peers.get(&PeerId::from("remote")).unwrap().queued(), 1);

        peers.poll(Instant::now());
        router.flush(&mut peers, &mut metrics, &PeerId::from("remote"));
        assert_eq!(metrics.snapshot().messages_sent, 1);
        assert_eq!(peers.get(&PeerId::from("remote")).unwrap().queued(), 0);
    }

    #[test]
    fn test_receive_drops_garbage_without_counting() {
        let mut router = MessageRouter::new(PeerId::from("me"));
        let mut metrics = MetricsCollector::new();

        let parsed = router.receive(&mut metrics, &PeerId::from("them"), b"{broken");
        assert!(parsed.is_none());
        assert_eq!(metrics.snapshot().messages_received, 0);
    }

    #[test]
    fn test_receive_drops_stale_sequence() {
        let mut sender = MessageRouter::new(PeerId::from("them"));
        let mut receiver = MessageRouter::new(PeerId::from("me"));
        let mut metrics = MetricsCollector::new();

        let first = sender.seal(chat("one")).encode();
        let second = sender.seal(chat("two")).encode();

        // Deliver out of order: newer first, then the older one.
        assert!(receiver
            .receive(&mut metrics, &PeerId::from("them"), &second)
            .is_some());
        assert!(receiver
            .receive(&mut metrics, &PeerId::from("them"), &first)
            .is_none());

        // Replay of the newer frame is a duplicate.
        assert!(receiver
            .receive(&mut metrics, &PeerId::from("them"), &second)
            .is_none());
    }

    #[test]
    fn test_receive_drops_spoofed_sender() {
        let mut imposter = MessageRouter::new(PeerId::from("somebody_else"));
        let mut receiver = MessageRouter::new(PeerId::from("me"));
        let mut metrics = MetricsCollector::new();

        let frame = imposter.seal(chat("boo")).encode();
        let parsed = receiver.receive(&mut metrics, &PeerId::from("them"), &frame);
        assert!(parsed.is_none());
    }

    #[test]
    fn test_forget_resets_sequencing() {
        let mut sender = MessageRouter::new(PeerId::from("them"));
        let mut receiver = MessageRouter::new(PeerId::from("me"));
        let mut metrics = MetricsCollector::new();

        let frame = sender.seal(chat("hello")).encode();
        assert!(receiver
            .receive(&mut metrics, &PeerId::from("them"), &frame)
            .is_some());

        // Same id reconnects with a fresh counter.
        receiver.forget(&PeerId::from("them"));
        let mut fresh = MessageRouter::new(PeerId::from("them"));
        let frame = fresh.seal(chat("again")).encode();
        assert!(receiver
            .receive(&mut metrics, &PeerId::from("them"), &frame)
            .is_some());
    }

    #[test]
    fn test_broadcast_frame_reaches_the_wire() {
        let mesh = MemoryMesh::new();
        let (mut peers, mut remote) = wired_pair(&mesh, "me", "them");
        let mut router = MessageRouter::new(PeerId::from("me"));
        let mut metrics = MetricsCollector::new();

        router.broadcast(&mut peers, &mut metrics, chat("over the wire"));

        let events = remote.poll(Instant::now());
        let bytes = events
            .iter()
            .find_map(|e| match e {
                crate::peer::PeerEvent::Data { bytes, .. } => Some(bytes.clone()),
                _ => None,
            })
            .expect("frame delivered");
        let envelope = Envelope::decode(&PeerId::from("me"), &bytes).unwrap();
        assert_eq!(envelope.sender, PeerId::from("me"));
        assert_eq!(envelope.body.kind(), "chat");
    }
}
