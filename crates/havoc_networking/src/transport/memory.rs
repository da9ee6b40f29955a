//! In-process transport: a mesh of reliable ordered links.
//!
//! Stands in for the real data-channel stack in unit and integration
//! tests, and carries same-machine sessions. Delivery is reliable and
//! in order per link; events sit in per-endpoint inboxes until polled,
//! so connection readiness is observed asynchronously just like on a
//! real transport.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Transport, TransportEvent};
use crate::protocol::PeerId;

#[derive(Default)]
struct MeshState {
    inboxes: HashMap<PeerId, VecDeque<TransportEvent>>,
    links: HashSet<(PeerId, PeerId)>,
}

fn link_key(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl MeshState {
    fn push(&mut self, to: &PeerId, event: TransportEvent) {
        if let Some(inbox) = self.inboxes.get_mut(to) {
            inbox.push_back(event);
        }
    }
}

/// A hub connecting any number of in-process endpoints.
#[derive(Clone, Default)]
pub struct MemoryMesh {
    state: Arc<Mutex<MeshState>>,
}

impl MemoryMesh {
    /// Creates an empty mesh.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint for `id` and returns its transport handle.
    #[must_use]
    pub fn endpoint(&self, id: impl Into<PeerId>) -> MemoryTransport {
        let id = id.into();
        self.state.lock().inboxes.entry(id.clone()).or_default();
        MemoryTransport {
            id,
            state: Arc::clone(&self.state),
        }
    }

    /// Simulates `peer` vanishing mid-session: every linked endpoint
    /// observes a `Failed` event, and the peer's inbox and links are
    /// discarded.
    pub fn kill(&self, peer: &PeerId) {
        let mut state = self.state.lock();
        let lost: Vec<(PeerId, PeerId)> = state
            .links
            .iter()
            .filter(|(a, b)| a == peer || b == peer)
            .cloned()
            .collect();
        for (a, b) in lost {
            let other = if a == *peer { b.clone() } else { a.clone() };
            state.links.remove(&(a, b));
            state.push(
                &other,
                TransportEvent::Failed {
                    peer: peer.clone(),
                    reason: "peer vanished".into(),
                },
            );
        }
        state.inboxes.remove(peer);
    }
}

/// One endpoint's handle into a [`MemoryMesh`].
pub struct MemoryTransport {
    id: PeerId,
    state: Arc<Mutex<MeshState>>,
}

impl Transport for MemoryTransport {
    fn open(&mut self, peer: &PeerId, _initiator: bool) {
        let mut state = self.state.lock();
        if state.inboxes.contains_key(peer) {
            state.links.insert(link_key(&self.id, peer));
            // Both ends learn about readiness through their inboxes;
            // the responder accepts implicitly.
            state.push(&self.id, TransportEvent::ChannelOpen { peer: peer.clone() });
            state.push(peer, TransportEvent::ChannelOpen { peer: self.id.clone() });
        } else {
            state.push(
                &self.id,
                TransportEvent::Failed {
                    peer: peer.clone(),
                    reason: "no such endpoint".into(),
                },
            );
        }
    }

    fn send(&mut self, peer: &PeerId, bytes: &[u8]) -> bool {
        let mut state = self.state.lock();
        if !state.links.contains(&link_key(&self.id, peer)) {
            return false;
        }
        state.push(
            peer,
            TransportEvent::Data {
                peer: self.id.clone(),
                bytes: bytes.to_vec(),
            },
        );
        true
    }

    fn close(&mut self, peer: &PeerId) {
        let mut state = self.state.lock();
        if state.links.remove(&link_key(&self.id, peer)) {
            state.push(peer, TransportEvent::Closed { peer: self.id.clone() });
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut state = self.state.lock();
        state
            .inboxes
            .get_mut(&self.id)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}
