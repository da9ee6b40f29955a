//! # Error Taxonomy
//!
//! Every failure in this layer is local to one peer relationship or one
//! room operation. Errors are surfaced to the game through return values
//! and [`SessionEvent::Error`](crate::SessionEvent::Error), never by
//! unwinding shared state.

use thiserror::Error;

use crate::protocol::PeerId;
use crate::room::RoomCode;

/// Errors reported by the networking layer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NetError {
    /// A join targeted a code with no registered room.
    #[error("room {0} not found")]
    RoomNotFound(RoomCode),

    /// A join targeted a room already at the session cap.
    #[error("room {0} is full")]
    RoomFull(RoomCode),

    /// A send was attempted before the peer's channel reached `Open`.
    #[error("channel to {0} is not open")]
    ChannelNotOpen(PeerId),

    /// Inbound bytes failed to parse or carried an unknown message type.
    ///
    /// Never fatal: the router logs and drops the frame so one bad peer
    /// cannot destabilize the session.
    #[error("malformed message from {peer}: {reason}")]
    MalformedMessage {
        /// The peer that sent the frame.
        peer: PeerId,
        /// Parser diagnostic.
        reason: String,
    },

    /// The transport reported a negotiation failure or unexpected close.
    #[error("connection to {peer} failed: {reason}")]
    ConnectionFailure {
        /// The affected peer.
        peer: PeerId,
        /// Transport diagnostic.
        reason: String,
    },

    /// The room directory collaborator could not be reached.
    #[error("room directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// A room operation was attempted while already in a room.
    #[error("already in room {0}")]
    AlreadyInRoom(RoomCode),
}
