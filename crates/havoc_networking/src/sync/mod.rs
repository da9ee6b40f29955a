//! # State Synchronizer
//!
//! Decides what to broadcast and when, and merges inbound snapshots
//! into the local entity store under the ownership policy.
//!
//! ## Authority rules
//!
//! - An entity has exactly one writer, its owner. Inbound updates for
//!   a locally owned entity are evidence of a stale or forged frame
//!   and are ignored.
//! - A delta is accepted only from the entity's recorded owner; the
//!   first delta for an unknown entity claims ownership for its
//!   sender.
//! - Match-wide state is host-authored: a `gameStateUpdate` from
//!   anyone else is ignored, and a non-host's local write survives
//!   only until the next host broadcast.
//!
//! Mirrors are plain last-writer-wins overwrites. The single-threaded
//! session loop is the only writer, so no locking discipline is
//! needed beyond that.
//!
//! ## Broadcast modes
//!
//! - Periodic tick: match state every [`SYNC_INTERVAL_MS`] regardless
//!   of delta traffic.
//! - Event deltas: entity create/death/hit broadcasts go out
//!   immediately, at-least-once, best-effort.
//! - Catch-up: when a channel opens, one full `sync` batch is sent to
//!   that peer so it never waits for the next periodic tick.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{
    EntityId, EntityKind, EntitySnapshot, Envelope, EnvelopeBody, GameStateSnapshot, PeerId,
    WorldSync,
};
use crate::SYNC_INTERVAL_MS;

/// Narrow interface to the game's entity/component store.
///
/// The synchronizer reads locally owned entities for replication and
/// writes mirrors of remotely owned ones; physics, AI and combat rules
/// live on the other side of this boundary.
pub trait EntityStore {
    /// Every locally owned entity, as (id, kind, attributes).
    fn owned_entities(&self) -> Vec<(EntityId, EntityKind, Value)>;
    /// Whether the local peer is the writer for `id`.
    fn is_owned(&self, id: &EntityId) -> bool;
    /// Overwrites the mirror of a remotely owned entity.
    fn apply_mirror(&mut self, snapshot: EntitySnapshot);
}

/// HashMap-backed [`EntityStore`] for tests and simple embeddings.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    owned: HashMap<EntityId, (EntityKind, Value)>,
    mirrors: HashMap<EntityId, EntitySnapshot>,
}

impl MemoryEntityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a locally owned entity.
    pub fn insert_owned(&mut self, id: EntityId, kind: EntityKind, attributes: Value) {
        self.owned.insert(id, (kind, attributes));
    }

    /// Drops a locally owned entity (death, despawn).
    pub fn remove_owned(&mut self, id: &EntityId) {
        self.owned.remove(id);
    }

    /// Current mirror of a remotely owned entity, if any.
    #[must_use]
    pub fn mirror(&self, id: &EntityId) -> Option<&EntitySnapshot> {
        self.mirrors.get(id)
    }

    /// Number of mirrored entities.
    #[must_use]
    pub fn mirror_count(&self) -> usize {
        self.mirrors.len()
    }
}

impl EntityStore for MemoryEntityStore {
    fn owned_entities(&self) -> Vec<(EntityId, EntityKind, Value)> {
        self.owned
            .iter()
            .map(|(id, (kind, attributes))| (id.clone(), *kind, attributes.clone()))
            .collect()
    }

    fn is_owned(&self, id: &EntityId) -> bool {
        self.owned.contains_key(id)
    }

    fn apply_mirror(&mut self, snapshot: EntitySnapshot) {
        self.mirrors.insert(snapshot.entity_id.clone(), snapshot);
    }
}

/// Broadcast scheduling and merge policy for one local peer.
pub struct StateSynchronizer {
    me: PeerId,
    host: Option<PeerId>,
    game_state: GameStateSnapshot,
    /// Recorded writer per replicated entity. Ownership is retained
    /// when a peer disconnects; its entities freeze rather than
    /// despawn, and the game layer decides what to do about them.
    owners: HashMap<EntityId, PeerId>,
    sync_interval: Duration,
    last_periodic: Option<Instant>,
}

impl StateSynchronizer {
    /// Creates a synchronizer for the local peer.
    pub fn new(me: PeerId, sync_interval: Duration) -> Self {
        Self {
            me,
            host: None,
            game_state: GameStateSnapshot::default(),
            owners: HashMap::new(),
            sync_interval,
            last_periodic: None,
        }
    }

    /// Creates a synchronizer with the default interval.
    #[must_use]
    pub fn with_default_interval(me: PeerId) -> Self {
        Self::new(me, Duration::from_millis(SYNC_INTERVAL_MS))
    }

    /// Sets the session host (on room create/join) or clears it (on
    /// leave). Clearing also disarms the periodic timer.
    pub fn set_host(&mut self, host: Option<PeerId>) {
        if host.is_none() {
            self.last_periodic = None;
        }
        self.host = host;
    }

    /// Whether the local peer hosts the session.
    #[must_use]
    pub fn is_host(&self) -> bool {
        self.host.as_ref() == Some(&self.me)
    }

    /// Local copy of the match state.
    #[must_use]
    pub fn game_state(&self) -> GameStateSnapshot {
        self.game_state
    }

    /// Writes the local match-state copy. Authoritative only on the
    /// host; anywhere else it lasts until the next host broadcast.
    pub fn set_game_state(&mut self, state: GameStateSnapshot) {
        self.game_state = state;
    }

    /// Recorded owner of an entity, if one is known.
    #[must_use]
    pub fn owner_of(&self, id: &EntityId) -> Option<&PeerId> {
        self.owners.get(id)
    }

    /// Records the local peer as owner of an entity it is about to
    /// replicate.
    pub fn claim_local(&mut self, id: EntityId) {
        self.owners.insert(id, self.me.clone());
    }

    /// Drops an entity's ownership record (death, despawn). The id
    /// becomes claimable again by whichever peer replicates it next;
    /// without this, a session full of short-lived projectiles would
    /// accrete owner entries forever.
    pub fn release(&mut self, id: &EntityId) {
        self.owners.remove(id);
    }

    /// Returns the periodic match-state payload when the interval has
    /// elapsed. The timer arms on the first call after joining a
    /// session and stays independent of delta traffic.
    pub fn periodic_broadcast(&mut self, now: Instant) -> Option<EnvelopeBody> {
        match self.last_periodic {
            None => {
                self.last_periodic = Some(now);
                None
            }
            Some(last) if now.saturating_duration_since(last) >= self.sync_interval => {
                self.last_periodic = Some(now);
                Some(EnvelopeBody::GameStateUpdate {
                    data: self.game_state,
                })
            }
            Some(_) => None,
        }
    }

    /// Builds the full catch-up batch: every locally owned entity plus
    /// the local match state.
    pub fn full_sync(&self, store: &dyn EntityStore) -> EnvelopeBody {
        let mut world = WorldSync {
            game_state: self.game_state,
            ..WorldSync::default()
        };
        for (entity_id, kind, attributes) in store.owned_entities() {
            world.insert(EntitySnapshot {
                entity_id,
                kind,
                owner: self.me.clone(),
                attributes,
            });
        }
        EnvelopeBody::Sync(world)
    }

    /// Merges one inbound envelope into the store.
    ///
    /// Chat never reaches this function; the session dispatches it to
    /// the event stream instead.
    pub fn apply(&mut self, store: &mut dyn EntityStore, envelope: &Envelope) {
        match &envelope.body {
            EnvelopeBody::Sync(world) => self.apply_sync(store, &envelope.sender, world),
            EnvelopeBody::GameStateUpdate { data } => {
                self.apply_game_state(&envelope.sender, *data);
            }
            body => {
                if let Some((kind, entity_id, data)) = body.as_entity_update() {
                    self.apply_delta(store, &envelope.sender, kind, entity_id, data);
                } else {
                    debug!(kind = body.kind(), "nothing to merge");
                }
            }
        }
    }

    /// One entity delta: sender must be the entity's owner.
    fn apply_delta(
        &mut self,
        store: &mut dyn EntityStore,
        sender: &PeerId,
        kind: EntityKind,
        entity_id: &EntityId,
        data: &Value,
    ) {
        if store.is_owned(entity_id) {
            // Owner authority is absolute; a remote update for our own
            // entity is a stale or forged frame, not a correction.
            debug!(entity = %entity_id, sender = %sender, "ignoring update for locally owned entity");
            return;
        }
        match self.owners.get(entity_id) {
            Some(owner) if owner != sender => {
                warn!(
                    entity = %entity_id,
                    owner = %owner,
                    sender = %sender,
                    "discarding delta from non-owner"
                );
                return;
            }
            Some(_) => {}
            None => {
                self.owners.insert(entity_id.clone(), sender.clone());
            }
        }
        store.apply_mirror(EntitySnapshot {
            entity_id: entity_id.clone(),
            kind,
            owner: sender.clone(),
            attributes: data.clone(),
        });
    }

    /// Full batch, applied entry-by-entry under the same rules. The
    /// sender may relay entities it does not own (catch-up includes
    /// the relayer's whole view), so each entry's own owner claim is
    /// what gets recorded.
    fn apply_sync(&mut self, store: &mut dyn EntityStore, sender: &PeerId, world: &WorldSync) {
        for (kind, entity_id, entry) in world.entries() {
            if entry.owner == self.me || store.is_owned(entity_id) {
                debug!(entity = %entity_id, "sync entry for locally owned entity ignored");
                continue;
            }
            if let Some(owner) = self.owners.get(entity_id) {
                if *owner != entry.owner {
                    warn!(
                        entity = %entity_id,
                        recorded = %owner,
                        claimed = %entry.owner,
                        "discarding sync entry with conflicting owner"
                    );
                    continue;
                }
            } else {
                self.owners.insert(entity_id.clone(), entry.owner.clone());
            }
            store.apply_mirror(EntitySnapshot {
                entity_id: entity_id.clone(),
                kind,
                owner: entry.owner.clone(),
                attributes: entry.data.clone(),
            });
        }
        self.apply_game_state(sender, world.game_state);
    }

    /// Host-authored match state; everyone else's copy is overwritten
    /// unconditionally, and non-host senders are ignored.
    fn apply_game_state(&mut self, sender: &PeerId, state: GameStateSnapshot) {
        if self.host.as_ref() == Some(sender) && !self.is_host() {
            self.game_state = state;
        } else if self.host.as_ref() != Some(sender) {
            debug!(sender = %sender, "ignoring match state from non-host");
        }
    }
}
