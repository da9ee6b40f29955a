//! # Peer Connection Management
//!
//! One connection per remote peer, driven through a lifecycle state
//! machine by transport events.
//!
//! ## Design
//!
//! - The manager is the sole owner of connection lifetime; everything
//!   else borrows for the duration of a call
//! - `Open` is reached only when the transport reports the channel
//!   ready in both directions
//! - No automatic reconnection: a lost peer stays lost until the user
//!   explicitly rejoins through the room directory

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::protocol::PeerId;
use crate::transport::{Transport, TransportEvent};
use crate::MAX_PEERS;

/// Lifecycle of one peer's data channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, nothing attempted yet.
    #[default]
    New,
    /// Waiting for the transport to report the channel ready.
    Connecting,
    /// Ready in both directions; the only state that accepts sends.
    Open,
    /// The transport reported a clean close.
    Disconnected,
    /// The transport reported a negotiation failure or broken link.
    Failed,
    /// Explicitly torn down.
    Closed,
}

impl ChannelState {
    /// True for the one state that accepts sends.
    #[inline]
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// True once the connection can never carry traffic again.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// State kept for one remote peer.
#[derive(Debug)]
pub struct PeerConnection {
    /// Remote peer identity.
    pub id: PeerId,
    /// Channel lifecycle state.
    pub state: ChannelState,
    /// Whether the local side offered the channel.
    pub initiator: bool,
    /// Unicast frames waiting for the channel to open, flushed in
    /// order on `Open`, dropped on close or failure.
    queue: VecDeque<Vec<u8>>,
    /// When the connect attempt started, for the latency estimate.
    connect_started: Option<Instant>,
}

impl PeerConnection {
    fn new(id: PeerId, initiator: bool, now: Option<Instant>) -> Self {
        Self {
            id,
            state: ChannelState::New,
            initiator,
            queue: VecDeque::new(),
            connect_started: now,
        }
    }

    /// Frames currently waiting for `Open`.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Lifecycle notifications surfaced to the session loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    /// The channel reached `Open`.
    Opened {
        /// Remote peer.
        peer: PeerId,
        /// Time from connect start to readiness, when the local side
        /// initiated; round-trip-able, so it feeds the latency
        /// estimate.
        connect_time: Option<Duration>,
    },
    /// A frame arrived on an open channel.
    Data {
        /// Remote peer.
        peer: PeerId,
        /// Frame contents.
        bytes: Vec<u8>,
    },
    /// The channel was lost; no automatic reconnection follows.
    Lost {
        /// Remote peer.
        peer: PeerId,
        /// Human-readable cause.
        reason: String,
    },
}

/// Owns one [`PeerConnection`] per remote peer and the transport that
/// backs them.
pub struct PeerConnectionManager<T: Transport> {
    transport: T,
    connections: HashMap<PeerId, PeerConnection>,
}

impl<T: Transport> PeerConnectionManager<T> {
    /// Wraps a transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connections: HashMap::new(),
        }
    }

    /// Starts a connection to `peer`.
    ///
    /// Returns `false` without side effects when a live connection to
    /// that peer already exists or the session is full. A terminal
    /// connection is replaced; rejoining is always an explicit action.
    pub fn connect(&mut self, peer: &PeerId, initiator: bool, now: Instant) -> bool {
        match self.connections.get(peer) {
            Some(existing) if !existing.state.is_terminal() => {
                debug!(peer = %peer, state = ?existing.state, "connect ignored, already live");
                return false;
            }
            _ => {}
        }
        if self.live_count() >= MAX_PEERS - 1 {
            warn!(peer = %peer, "connect refused, session full");
            return false;
        }

        let mut connection = PeerConnection::new(peer.clone(), initiator, Some(now));
        connection.state = ChannelState::Connecting;
        self.connections.insert(peer.clone(), connection);
        self.transport.open(peer, initiator);
        info!(peer = %peer, initiator, "connecting");
        true
    }

    /// Sends one frame to `peer` right now.
    ///
    /// Returns `false`, without queueing and without error, unless the
    /// channel is `Open`.
    pub fn send(&mut self, peer: &PeerId, bytes: &[u8]) -> bool {
        let open = self
            .connections
            .get(peer)
            .is_some_and(|c| c.state.is_open());
        if !open {
            return false;
        }
        self.transport.send(peer, bytes)
    }

    /// Queues a frame to be flushed, in order, once the channel opens.
    pub fn enqueue(&mut self, peer: &PeerId, bytes: Vec<u8>) {
        if let Some(connection) = self.connections.get_mut(peer) {
            if !connection.state.is_terminal() {
                connection.queue.push_back(bytes);
            }
        }
    }

    /// Takes every queued frame for `peer`, preserving order.
    pub fn take_queue(&mut self, peer: &PeerId) -> Vec<Vec<u8>> {
        self.connections
            .get_mut(peer)
            .map(|c| c.queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Tears down the connection to `peer`, dropping its queue.
    pub fn close(&mut self, peer: &PeerId) {
        if let Some(mut connection) = self.connections.remove(peer) {
            connection.queue.clear();
            connection.state = ChannelState::Closed;
            self.transport.close(peer);
            info!(peer = %peer, "connection closed");
        }
    }

    /// Tears down every connection. Queued envelopes are dropped, not
    /// redirected.
    pub fn close_all(&mut self) {
        let peers: Vec<PeerId> = self.connections.keys().cloned().collect();
        for peer in peers {
            self.close(&peer);
        }
    }

    fn live_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| !c.state.is_terminal())
            .count()
    }

    /// Connection record for `peer`, if one exists.
    #[must_use]
    pub fn get(&self, peer: &PeerId) -> Option<&PeerConnection> {
        self.connections.get(peer)
    }

    /// Peers whose channel is currently `Open`.
    pub fn open_peers(&self) -> impl Iterator<Item = &PeerId> {
        self.connections
            .values()
            .filter(|c| c.state.is_open())
            .map(|c| &c.id)
    }

    /// Number of peers currently `Open`.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open_peers().count()
    }

    /// Drains transport events, advances the state machines, and
    /// reports lifecycle changes. Data on channels this manager does
    /// not know is logged and dropped.
    pub fn poll(&mut self, now: Instant) -> Vec<PeerEvent> {
        let mut events = Vec::new();
        for event in self.transport.poll() {
            match event {
                TransportEvent::ChannelOpen { peer } => {
                    // An unknown peer here is the remote side offering a
                    // channel; accept as responder, capacity permitting.
                    if !self.connections.contains_key(&peer) {
                        if self.live_count() >= MAX_PEERS - 1 {
                            warn!(peer = %peer, "refusing offered channel, session full");
                            self.transport.close(&peer);
                            continue;
                        }
                        self.connections
                            .insert(peer.clone(), PeerConnection::new(peer.clone(), false, None));
                    }
                    let Some(connection) = self.connections.get_mut(&peer) else {
                        continue;
                    };
                    if connection.state.is_terminal() {
                        debug!(peer = %peer, "open ignored on terminal connection");
                        continue;
                    }
                    connection.state = ChannelState::Open;
                    let connect_time = connection
                        .connect_started
                        .take()
                        .map(|started| now.saturating_duration_since(started));
                    info!(peer = %peer, "channel open");
                    events.push(PeerEvent::Opened { peer, connect_time });
                }
                TransportEvent::Data { peer, bytes } => {
                    let open = self
                        .connections
                        .get(&peer)
                        .is_some_and(|c| c.state.is_open());
                    if open {
                        events.push(PeerEvent::Data { peer, bytes });
                    } else {
                        warn!(peer = %peer, "dropping frame from peer without open channel");
                    }
                }
                TransportEvent::Closed { peer } => {
                    if let Some(connection) = self.connections.get_mut(&peer) {
                        connection.state = ChannelState::Disconnected;
                        connection.queue.clear();
                        info!(peer = %peer, "channel disconnected");
                        events.push(PeerEvent::Lost {
                            peer,
                            reason: "remote closed the channel".into(),
                        });
                    }
                }
                TransportEvent::Failed { peer, reason } => {
                    if let Some(connection) = self.connections.get_mut(&peer) {
                        connection.state = ChannelState::Failed;
                        connection.queue.clear();
                        warn!(peer = %peer, reason = %reason, "channel failed");
                        events.push(PeerEvent::Lost { peer, reason });
                    }
                }
            }
        }
        events
    }
}
