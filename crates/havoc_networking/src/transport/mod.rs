//! # Transport Layer
//!
//! Abstract interface to whatever carries bytes between two peers.
//!
//! ## Design
//!
//! - One bidirectional, reliable, ordered byte-stream (data channel)
//!   per remote peer; framing is the caller's problem
//! - Connect/disconnect/failure are reported as polled events, so the
//!   session loop stays single-threaded: handlers run to completion,
//!   no locks on session state
//! - Signaling (offer/answer exchange) is the implementation's concern;
//!   this layer only asks it to `open` a named peer
//!
//! [`memory::MemoryMesh`] provides the in-process implementation used
//! by tests and same-machine sessions.

pub mod memory;

use crate::protocol::PeerId;

/// Events reported by a transport, drained once per session tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The data channel to `peer` is ready in both directions.
    ChannelOpen {
        /// Remote endpoint.
        peer: PeerId,
    },
    /// One message frame arrived from `peer`.
    Data {
        /// Remote endpoint.
        peer: PeerId,
        /// Frame contents.
        bytes: Vec<u8>,
    },
    /// The channel to `peer` closed cleanly.
    Closed {
        /// Remote endpoint.
        peer: PeerId,
    },
    /// The channel to `peer` failed to open or broke unexpectedly.
    Failed {
        /// Remote endpoint.
        peer: PeerId,
        /// Transport diagnostic.
        reason: String,
    },
}

/// A byte transport carrying one reliable ordered channel per peer.
///
/// Implementations deliver frames from a single sender in send order;
/// no ordering is promised across different senders.
pub trait Transport {
    /// Starts opening a channel to `peer`.
    ///
    /// The initiator offers the channel, the responder accepts the one
    /// offered by the remote side; readiness is reported later as a
    /// [`TransportEvent::ChannelOpen`].
    fn open(&mut self, peer: &PeerId, initiator: bool);

    /// Sends one frame to `peer`. Returns `false` when the channel is
    /// not currently usable; the caller decides whether that matters.
    fn send(&mut self, peer: &PeerId, bytes: &[u8]) -> bool;

    /// Tears down the channel to `peer`.
    fn close(&mut self, peer: &PeerId);

    /// Drains pending events in arrival order.
    fn poll(&mut self) -> Vec<TransportEvent>;
}
