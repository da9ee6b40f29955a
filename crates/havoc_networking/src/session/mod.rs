//! # Network Session
//!
//! The public surface the game engine talks to: room operations,
//! broadcast/unicast sends, delta and match-state replication, status
//! and metrics, and the event stream.
//!
//! ## Control flow
//!
//! Everything runs on the game loop's thread. [`NetworkSession::tick`]
//! is the single suspension point of the layer: it drains transport
//! events, advances the per-peer state machines, merges inbound state
//! and fires the periodic broadcast. Handler bodies run to completion,
//! so nothing here needs a lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};

use crate::error::NetError;
use crate::events::{EventChannel, SessionEvent};
use crate::metrics::{MetricsCollector, NetworkMetrics};
use crate::peer::{PeerConnectionManager, PeerEvent};
use crate::protocol::{
    ChatMessage, EntityId, EntityKind, EnvelopeBody, GameStateSnapshot, PeerId,
};
use crate::room::{DirectoryStore, Room, RoomCode, RoomDirectory};
use crate::router::MessageRouter;
use crate::sync::{EntityStore, StateSynchronizer};
use crate::transport::Transport;
use crate::SYNC_INTERVAL_MS;

/// Session configuration.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Identity of the local peer. Must be unique within a room.
    pub peer_id: PeerId,
    /// Display name stamped on outgoing chat lines.
    pub display_name: String,
    /// Interval between periodic match-state broadcasts.
    pub sync_interval: Duration,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl NetworkConfig {
    /// Configuration with default intervals for one peer.
    #[must_use]
    pub fn new(peer_id: impl Into<PeerId>) -> Self {
        let peer_id = peer_id.into();
        let display_name = peer_id.to_string();
        Self {
            peer_id,
            display_name,
            sync_interval: Duration::from_millis(SYNC_INTERVAL_MS),
            event_capacity: 1024,
        }
    }

    /// Overrides the chat display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Overrides the periodic broadcast interval.
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }
}

/// Snapshot of the session for UI and status lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkStatus {
    /// Whether the local peer is currently in a room.
    pub is_connected: bool,
    /// Whether the local peer hosts that room.
    pub is_host: bool,
    /// Join code of the current room.
    pub room_code: Option<RoomCode>,
    /// Number of remote peers with an open channel.
    pub peer_count: usize,
}

/// One peer's complete networking stack.
pub struct NetworkSession<T: Transport, S: EntityStore> {
    config: NetworkConfig,
    directory: RoomDirectory,
    room: Option<Room>,
    peers: PeerConnectionManager<T>,
    router: MessageRouter,
    sync: StateSynchronizer,
    metrics: MetricsCollector,
    events: EventChannel<SessionEvent>,
    store: S,
}

impl<T: Transport, S: EntityStore> NetworkSession<T, S> {
    /// Wires a session from its collaborators: a transport, the
    /// local entity store, and the shared room directory.
    pub fn new(
        config: NetworkConfig,
        transport: T,
        store: S,
        directory_store: Arc<dyn DirectoryStore>,
    ) -> Self {
        let me = config.peer_id.clone();
        Self {
            directory: RoomDirectory::new(directory_store, me.clone()),
            room: None,
            peers: PeerConnectionManager::new(transport),
            router: MessageRouter::new(me.clone()),
            sync: StateSynchronizer::new(me, config.sync_interval),
            metrics: MetricsCollector::new(),
            events: EventChannel::new(config.event_capacity),
            store,
            config,
        }
    }

    /// Creates a room and becomes its host.
    ///
    /// # Errors
    ///
    /// [`NetError::AlreadyInRoom`] when a room is active, or a
    /// directory failure from the store.
    pub fn create_room(&mut self) -> Result<RoomCode, NetError> {
        if let Some(room) = &self.room {
            return Err(NetError::AlreadyInRoom(room.code.clone()));
        }
        let room = self.directory.create_room()?;
        let code = room.code.clone();
        self.sync.set_host(Some(room.host.clone()));
        self.room = Some(room);
        Ok(code)
    }

    /// Joins an existing room and starts connecting to its members.
    ///
    /// Returns `false` — after publishing exactly one error event —
    /// when the code is invalid or no such room exists; no connection
    /// attempts are made in that case.
    pub fn join_room(&mut self, code: &str) -> bool {
        if let Some(room) = &self.room {
            self.publish_error(format!("already in room {}", room.code));
            return false;
        }
        let Some(code) = RoomCode::new(code) else {
            self.publish_error(format!("invalid room code {code:?}"));
            return false;
        };
        let room = match self.directory.join_room(&code) {
            Ok(room) => room,
            Err(err) => {
                self.publish_error(err.to_string());
                return false;
            }
        };

        let now = Instant::now();
        for member in room.others(&self.config.peer_id) {
            // The newcomer initiates; existing members accept the
            // offered channel when their transport reports it.
            self.peers.connect(member, true, now);
        }
        self.sync.set_host(Some(room.host.clone()));
        self.room = Some(room);
        true
    }

    /// Leaves the current room, tearing down every connection and
    /// dropping queued envelopes.
    pub fn leave_room(&mut self) {
        let Some(room) = self.room.take() else {
            return;
        };
        if let Err(err) = self.directory.leave_room(&room.code) {
            warn!(%err, "directory leave failed");
        }
        self.peers.close_all();
        self.sync.set_host(None);
        info!(code = %room.code, "left session");
    }

    /// Broadcasts an envelope to every open peer. Returns the number
    /// of deliveries.
    pub fn broadcast(&mut self, body: EnvelopeBody) -> usize {
        self.router.broadcast(&mut self.peers, &mut self.metrics, body)
    }

    /// Sends an envelope to one peer.
    ///
    /// Returns `true` only when the frame was delivered to an open
    /// channel right now; a not-yet-open channel queues the frame and
    /// returns `false`, an unknown peer just returns `false`.
    pub fn send_message(&mut self, peer: &PeerId, body: EnvelopeBody) -> bool {
        self.router
            .unicast(&mut self.peers, &mut self.metrics, peer, body)
    }

    /// Immediately replicates one locally owned player entity.
    pub fn send_player_update(&mut self, entity_id: EntityId, attributes: Value) {
        self.send_entity_update(EntityKind::Player, entity_id, attributes);
    }

    /// Immediately replicates one locally owned enemy entity.
    pub fn send_enemy_update(&mut self, entity_id: EntityId, attributes: Value) {
        self.send_entity_update(EntityKind::Enemy, entity_id, attributes);
    }

    /// Immediately replicates one locally owned projectile.
    pub fn send_bullet_update(&mut self, entity_id: EntityId, attributes: Value) {
        self.send_entity_update(EntityKind::Bullet, entity_id, attributes);
    }

    fn send_entity_update(&mut self, kind: EntityKind, entity_id: EntityId, attributes: Value) {
        self.sync.claim_local(entity_id.clone());
        let body = EnvelopeBody::entity_update(kind, entity_id, attributes);
        self.broadcast(body);
    }

    /// Releases an entity's ownership record on despawn, making the
    /// id claimable again. Call alongside removing the entity from
    /// the store.
    pub fn release_entity(&mut self, id: &EntityId) {
        self.sync.release(id);
    }

    /// Broadcasts the current match state out of schedule (wave
    /// start, match over). Receivers apply it only when we host.
    pub fn send_game_state_update(&mut self) {
        let body = EnvelopeBody::GameStateUpdate {
            data: self.sync.game_state(),
        };
        self.broadcast(body);
    }

    /// Broadcasts a chat line under the configured display name.
    pub fn send_chat_message(&mut self, text: impl Into<String>) {
        let body = EnvelopeBody::Chat(ChatMessage {
            text: text.into(),
            sender: self.config.display_name.clone(),
        });
        self.broadcast(body);
    }

    /// Local copy of the match state.
    #[must_use]
    pub fn game_state(&self) -> GameStateSnapshot {
        self.sync.game_state()
    }

    /// Writes the local match-state copy. On the host this is the
    /// authoritative value the next periodic broadcast carries.
    pub fn set_game_state(&mut self, state: GameStateSnapshot) {
        self.sync.set_game_state(state);
    }

    /// Current session status.
    #[must_use]
    pub fn status(&self) -> NetworkStatus {
        NetworkStatus {
            is_connected: self.room.is_some(),
            is_host: self.sync.is_host(),
            room_code: self.room.as_ref().map(|r| r.code.clone()),
            peer_count: self.peers.open_count(),
        }
    }

    /// Current traffic counters.
    #[must_use]
    pub fn metrics(&self) -> NetworkMetrics {
        self.metrics.snapshot()
    }

    /// Receiver for session events; hold one per consumer.
    #[must_use]
    pub fn events(&self) -> crossbeam_channel::Receiver<SessionEvent> {
        self.events.receiver()
    }

    /// The local entity store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the local entity store for the game's own
    /// writes.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Runs one synchronization step: transport events, inbound
    /// merges, catch-up syncs for newly opened channels, the periodic
    /// broadcast timer, and metrics bookkeeping.
    pub fn tick(&mut self, now: Instant) {
        let started = Instant::now();

        for event in self.peers.poll(now) {
            match event {
                PeerEvent::Opened { peer, connect_time } => {
                    if let Some(round_trip) = connect_time {
                        self.metrics.record_latency(round_trip);
                    }
                    // Queued unicasts first, then the catch-up batch:
                    // the newly joined peer gets the complete world
                    // without waiting for the next periodic tick.
                    self.router
                        .flush(&mut self.peers, &mut self.metrics, &peer);
                    let catch_up = self.sync.full_sync(&self.store);
                    self.router
                        .unicast(&mut self.peers, &mut self.metrics, &peer, catch_up);
                    self.events.publish(SessionEvent::PeerConnected(peer));
                }
                PeerEvent::Data { peer, bytes } => {
                    let Some(envelope) =
                        self.router.receive(&mut self.metrics, &peer, &bytes)
                    else {
                        continue;
                    };
                    if let EnvelopeBody::Chat(chat) = &envelope.body {
                        self.events.publish(SessionEvent::Chat {
                            from: peer,
                            sender: chat.sender.clone(),
                            text: chat.text.clone(),
                        });
                    } else {
                        self.sync.apply(&mut self.store, &envelope);
                    }
                }
                PeerEvent::Lost { peer, reason } => {
                    self.router.forget(&peer);
                    warn!(peer = %peer, reason = %reason, "peer lost");
                    self.events.publish(SessionEvent::PeerDisconnected(peer));
                }
            }
        }

        if self.room.is_some() {
            if let Some(body) = self.sync.periodic_broadcast(now) {
                self.router.broadcast(&mut self.peers, &mut self.metrics, body);
            }
        }

        self.metrics.record_update_time(started.elapsed());
    }

    fn publish_error(&self, message: String) {
        warn!(%message);
        self.events.publish(SessionEvent::Error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::InMemoryDirectory;
    use crate::sync::MemoryEntityStore;
    use crate::transport::memory::{MemoryMesh, MemoryTransport};

    type TestSession = NetworkSession<MemoryTransport, MemoryEntityStore>;

    fn session(mesh: &MemoryMesh, dir: &Arc<InMemoryDirectory>, id: &str) -> TestSession {
        NetworkSession::new(
            NetworkConfig::new(id),
            mesh.endpoint(id),
            MemoryEntityStore::new(),
            dir.clone(),
        )
    }

    fn drain(session: &TestSession) -> Vec<SessionEvent> {
        let receiver = session.events();
        let mut out = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_create_room_sets_host_status() {
        let mesh = MemoryMesh::new();
        let dir = Arc::new(InMemoryDirectory::new());
        let mut host = session(&mesh, &dir, "host");

        let code = host.create_room().unwrap();
        let status = host.status();
        assert!(status.is_connected);
        assert!(status.is_host);
        assert_eq!(status.room_code, Some(code));
        assert_eq!(status.peer_count, 0);
    }

    #[test]
    fn test_create_room_twice_fails() {
        let mesh = MemoryMesh::new();
        let dir = Arc::new(InMemoryDirectory::new());
        let mut host = session(&mesh, &dir, "host");

        host.create_room().unwrap();
        assert!(matches!(
            host.create_room(),
            Err(NetError::AlreadyInRoom(_))
        ));
    }

    #[test]
    fn test_join_missing_room_is_one_error_no_connects() {
        let mesh = MemoryMesh::new();
        let dir = Arc::new(InMemoryDirectory::new());
        let mut client = session(&mesh, &dir, "client");

        assert!(!client.join_room("ZZZZZZ"));

        let events = drain(&client);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Error(_)));
        assert_eq!(client.status().peer_count, 0);
        assert!(!client.status().is_connected);
    }

    #[test]
    fn test_join_invalid_code_is_rejected_locally() {
        let mesh = MemoryMesh::new();
        let dir = Arc::new(InMemoryDirectory::new());
        let mut client = session(&mesh, &dir, "client");

        assert!(!client.join_room("too long to be a code"));
        assert_eq!(drain(&client).len(), 1);
    }

    #[test]
    fn test_send_message_to_unopen_peer_returns_false_and_counts_nothing() {
        let mesh = MemoryMesh::new();
        let dir = Arc::new(InMemoryDirectory::new());
        let mut host = session(&mesh, &dir, "host");
        host.create_room().unwrap();

        let sent = host.send_message(
            &PeerId::from("nobody"),
            EnvelopeBody::Chat(ChatMessage {
                text: "hello?".into(),
                sender: "host".into(),
            }),
        );
        assert!(!sent);
        assert_eq!(host.metrics().messages_sent, 0);
    }

    #[test]
    fn test_leave_room_disconnects_everything() {
        let mesh = MemoryMesh::new();
        let dir = Arc::new(InMemoryDirectory::new());
        let mut host = session(&mesh, &dir, "host");
        let mut client = session(&mesh, &dir, "client");

        let code = host.create_room().unwrap();
        assert!(client.join_room(code.as_str()));
        let now = Instant::now();
        client.tick(now);
        host.tick(now);
        assert_eq!(host.status().peer_count, 1);

        client.leave_room();
        assert!(!client.status().is_connected);
        assert_eq!(client.status().peer_count, 0);

        host.tick(now);
        assert_eq!(host.status().peer_count, 0);
        assert!(drain(&host)
            .iter()
            .any(|e| matches!(e, SessionEvent::PeerDisconnected(p) if *p == PeerId::from("client"))));
    }
}
