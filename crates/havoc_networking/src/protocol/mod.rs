//! # Wire Protocol
//!
//! Envelope and snapshot types exchanged between peers.
//!
//! ## Design
//!
//! - One UTF-8 JSON document per frame on the ordered reliable channel
//! - Per-sender monotonic sequence numbers, never wall-clock time, are
//!   the basis for ordering decisions (peer clocks are not synchronized)
//! - Entity attributes ride as opaque JSON blobs produced by the entity
//!   store; this layer never interprets them

mod envelope;
mod snapshot;

pub use envelope::{ChatMessage, Envelope, EnvelopeBody};
pub use snapshot::{EntityKind, EntitySnapshot, GameStateSnapshot, SyncEntry, WorldSync};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one participant's endpoint within a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a replicated entity.
///
/// Globally unique across all peers for the lifetime of the session;
/// the spawning peer embeds its own id when minting one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wraps an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
