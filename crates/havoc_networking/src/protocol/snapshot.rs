//! Replicated snapshots: per-entity attribute blobs and match state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EntityId, PeerId};

/// Kind of a replicated entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A player avatar, owned by its player.
    Player,
    /// An enemy, owned by whichever peer spawned it.
    Enemy,
    /// A projectile, owned by whichever peer fired it.
    Bullet,
}

/// One replicated entity's current state.
///
/// At most one peer is the writer (owner) for a given entity id at any
/// time; every other peer treats received snapshots for that id as
/// read-only mirror updates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Entity identity, globally unique for the session.
    #[serde(rename = "entityId")]
    pub entity_id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// The single peer authorized to write this entity.
    #[serde(rename = "ownerId")]
    pub owner: PeerId,
    /// Opaque serialized attributes produced by the entity store.
    pub attributes: Value,
}

/// Match-wide state. The host is the sole writer; everyone else
/// overwrites their local copy unconditionally on receipt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStateSnapshot {
    /// Current wave number.
    pub wave: u32,
    /// Team score.
    pub score: u64,
    /// Chaos meter, 0.0 to 1.0 and beyond when things go wrong.
    #[serde(rename = "chaosLevel")]
    pub chaos_level: f64,
}

/// One entry of a catch-up batch: owner plus attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncEntry {
    /// Recorded writer of the entity.
    #[serde(rename = "ownerId")]
    pub owner: PeerId,
    /// Opaque serialized attributes.
    pub data: Value,
}

/// Payload of a `sync` envelope: the sender's full view of the world.
///
/// Applied entry-by-entry under the same merge rules as single deltas.
/// `BTreeMap` keeps encoded output deterministic, which keeps frame
/// comparisons in tests stable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSync {
    /// Player entities, keyed by entity id.
    pub players: BTreeMap<EntityId, SyncEntry>,
    /// Enemy entities, keyed by entity id.
    pub enemies: BTreeMap<EntityId, SyncEntry>,
    /// Projectile entities, keyed by entity id.
    pub bullets: BTreeMap<EntityId, SyncEntry>,
    /// Match state as the sender sees it.
    #[serde(rename = "gameState")]
    pub game_state: GameStateSnapshot,
}

impl WorldSync {
    /// Inserts one entity into the map matching its kind.
    pub fn insert(&mut self, snapshot: EntitySnapshot) {
        let entry = SyncEntry {
            owner: snapshot.owner,
            data: snapshot.attributes,
        };
        let map = match snapshot.kind {
            EntityKind::Player => &mut self.players,
            EntityKind::Enemy => &mut self.enemies,
            EntityKind::Bullet => &mut self.bullets,
        };
        map.insert(snapshot.entity_id, entry);
    }

    /// Iterates every entry with its kind, in map order.
    pub fn entries(&self) -> impl Iterator<Item = (EntityKind, &EntityId, &SyncEntry)> {
        let players = self
            .players
            .iter()
            .map(|(id, e)| (EntityKind::Player, id, e));
        let enemies = self.enemies.iter().map(|(id, e)| (EntityKind::Enemy, id, e));
        let bullets = self.bullets.iter().map(|(id, e)| (EntityKind::Bullet, id, e));
        players.chain(enemies).chain(bullets)
    }

    /// Total number of entity entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.players.len() + self.enemies.len() + self.bullets.len()
    }

    /// Returns true when no entities are listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_world_sync_insert_routes_by_kind() {
        let mut sync = WorldSync::default();
        sync.insert(EntitySnapshot {
            entity_id: EntityId::from("p_1"),
            kind: EntityKind::Player,
            owner: PeerId::from("peer_1"),
            attributes: json!({ "hp": 100 }),
        });
        sync.insert(EntitySnapshot {
            entity_id: EntityId::from("bullet_3"),
            kind: EntityKind::Bullet,
            owner: PeerId::from("peer_1"),
            attributes: json!({ "x": 1.5 }),
        });

        assert_eq!(sync.players.len(), 1);
        assert_eq!(sync.bullets.len(), 1);
        assert!(sync.enemies.is_empty());
        assert_eq!(sync.len(), 2);
    }

    #[test]
    fn test_world_sync_wire_shape() {
        let mut sync = WorldSync::default();
        sync.insert(EntitySnapshot {
            entity_id: EntityId::from("e_9"),
            kind: EntityKind::Enemy,
            owner: PeerId::from("host"),
            attributes: json!({ "hp": 40 }),
        });
        sync.game_state.wave = 3;

        let value = serde_json::to_value(&sync).unwrap();
        assert_eq!(value["enemies"]["e_9"]["ownerId"], "host");
        assert_eq!(value["enemies"]["e_9"]["data"]["hp"], 40);
        assert_eq!(value["gameState"]["wave"], 3);
        assert_eq!(value["gameState"]["chaosLevel"], 0.0);
    }
}
