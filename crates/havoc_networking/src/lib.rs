//! # HAVOC Networking - Peer Mesh Protocol
//!
//! Serverless state synchronization for HAVOC co-op arena matches.
//!
//! ## Architecture
//!
//! This crate implements the complete session layer for HAVOC:
//!
//! - **Room**: join-code directory with host-owned room lifetime
//! - **Transport**: abstract reliable ordered data channels, one per peer
//! - **Peer**: per-peer connection lifecycle state machine
//! - **Router**: JSON envelope encode/decode and dispatch
//! - **Sync**: periodic broadcast plus event deltas, ownership merge
//! - **Metrics**: passive traffic counters and latency estimate
//!
//! ```text
//! game loop tick                transport callbacks
//!       │                              │
//!       ▼                              ▼
//! ┌──────────────┐  envelopes   ┌──────────────┐
//! │ Synchronizer │─────────────▶│    Router    │
//! └──────────────┘              └──────────────┘
//!       │ merge                        │ send/recv
//!       ▼                              ▼
//! ┌──────────────┐              ┌──────────────┐
//! │ Entity store │              │ Peer manager │──▶ Transport
//! │ (mirrors)    │              │ (channels)   │
//! └──────────────┘              └──────────────┘
//! ```
//!
//! ## Authority Model
//!
//! Every replicated entity has exactly one writer: its owner. All other
//! peers hold read-only mirrors and overwrite them last-writer-wins.
//! Match-wide state (wave, score, chaos) converges to the host's copy.
//!
//! ## Failure Model
//!
//! All failures are local to one peer relationship. A malformed frame is
//! logged and dropped, a lost channel surfaces a disconnect event, and
//! the rest of the session keeps running. Nothing in this layer panics
//! the process.
//!
//! ## Example
//!
//! ```rust,ignore
//! use havoc_networking::{NetworkSession, NetworkConfig};
//!
//! let mut session = NetworkSession::new(config, transport, store, directory);
//! let code = session.create_room()?;
//! // every game loop iteration:
//! session.tick(Instant::now());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod events;
pub mod metrics;
pub mod peer;
pub mod protocol;
pub mod room;
pub mod router;
pub mod session;
pub mod sync;
pub mod transport;

// Re-exports for convenience
pub use error::NetError;
pub use events::{EventChannel, SessionEvent};
pub use metrics::{MetricsCollector, NetworkMetrics};
pub use peer::{ChannelState, PeerConnection, PeerConnectionManager, PeerEvent};
pub use protocol::{
    EntityId, EntityKind, EntitySnapshot, Envelope, EnvelopeBody, GameStateSnapshot, PeerId,
    WorldSync,
};
pub use room::{DirectoryStore, InMemoryDirectory, Room, RoomCode, RoomDirectory};
pub use router::MessageRouter;
pub use session::{NetworkConfig, NetworkSession, NetworkStatus};
pub use sync::{EntityStore, StateSynchronizer};
pub use transport::{memory::MemoryMesh, Transport, TransportEvent};

/// Maximum number of peers in one session, the local player included.
pub const MAX_PEERS: usize = 8;

/// Interval between periodic match-state broadcasts, in milliseconds.
///
/// Independent of per-entity delta traffic; deltas go out immediately.
pub const SYNC_INTERVAL_MS: u64 = 500;

/// Length of a room join code.
pub const ROOM_CODE_LEN: usize = 6;
