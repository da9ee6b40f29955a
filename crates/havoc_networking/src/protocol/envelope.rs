//! Envelope framing: one typed JSON document per message frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::snapshot::{EntityKind, GameStateSnapshot, WorldSync};
use super::{EntityId, PeerId};
use crate::error::NetError;

/// One protocol message as it travels over a data channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Who sent this frame.
    #[serde(rename = "senderId")]
    pub sender: PeerId,
    /// Monotonic per-sender counter. The ordering basis for stale-frame
    /// detection; receivers drop anything not newer than the last seen
    /// sequence from the same sender.
    pub sequence: u64,
    /// Typed payload, tagged by the wire `type` field.
    #[serde(flatten)]
    pub body: EnvelopeBody,
}

/// Payload variants, tagged on the wire as `{"type": ..., "payload": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EnvelopeBody {
    /// Full catch-up batch: every replicated entity plus match state.
    #[serde(rename = "sync")]
    Sync(WorldSync),
    /// Delta for one player entity.
    #[serde(rename = "playerUpdate")]
    PlayerUpdate {
        /// Player entity the delta applies to.
        #[serde(rename = "playerId")]
        player_id: EntityId,
        /// Opaque attribute blob produced by the entity store.
        data: Value,
    },
    /// Delta for one enemy entity.
    #[serde(rename = "enemyUpdate")]
    EnemyUpdate {
        /// Enemy entity the delta applies to.
        #[serde(rename = "enemyId")]
        enemy_id: EntityId,
        /// Opaque attribute blob produced by the entity store.
        data: Value,
    },
    /// Delta for one projectile entity.
    #[serde(rename = "bulletUpdate")]
    BulletUpdate {
        /// Projectile entity the delta applies to.
        #[serde(rename = "bulletId")]
        bullet_id: EntityId,
        /// Opaque attribute blob produced by the entity store.
        data: Value,
    },
    /// Match-wide state; authoritative only when sent by the host.
    #[serde(rename = "gameStateUpdate")]
    GameStateUpdate {
        /// Wave, score and chaos level.
        data: GameStateSnapshot,
    },
    /// Free-form chat line.
    #[serde(rename = "chat")]
    Chat(ChatMessage),
}

impl EnvelopeBody {
    /// Wire name of this payload, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sync(_) => "sync",
            Self::PlayerUpdate { .. } => "playerUpdate",
            Self::EnemyUpdate { .. } => "enemyUpdate",
            Self::BulletUpdate { .. } => "bulletUpdate",
            Self::GameStateUpdate { .. } => "gameStateUpdate",
            Self::Chat(_) => "chat",
        }
    }

    /// Builds the delta variant matching an entity kind.
    #[must_use]
    pub fn entity_update(kind: EntityKind, entity_id: EntityId, data: Value) -> Self {
        match kind {
            EntityKind::Player => Self::PlayerUpdate {
                player_id: entity_id,
                data,
            },
            EntityKind::Enemy => Self::EnemyUpdate {
                enemy_id: entity_id,
                data,
            },
            EntityKind::Bullet => Self::BulletUpdate {
                bullet_id: entity_id,
                data,
            },
        }
    }

    /// Views this payload as an entity delta, if it is one.
    #[must_use]
    pub fn as_entity_update(&self) -> Option<(EntityKind, &EntityId, &Value)> {
        match self {
            Self::PlayerUpdate { player_id, data } => Some((EntityKind::Player, player_id, data)),
            Self::EnemyUpdate { enemy_id, data } => Some((EntityKind::Enemy, enemy_id, data)),
            Self::BulletUpdate { bullet_id, data } => Some((EntityKind::Bullet, bullet_id, data)),
            _ => None,
        }
    }
}

/// Chat payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message text.
    pub text: String,
    /// Display name of the sender.
    pub sender: String,
}

impl Envelope {
    /// Encodes this envelope as one JSON document.
    ///
    /// Encoding a well-formed envelope cannot fail; the payload types
    /// contain nothing unserializable.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decodes one JSON frame received from `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::MalformedMessage`] when the bytes are not a
    /// valid envelope (bad JSON, missing fields, unrecognized `type`).
    /// Callers log and drop; a bad frame is never fatal.
    pub fn decode(peer: &PeerId, bytes: &[u8]) -> Result<Self, NetError> {
        serde_json::from_slice(bytes).map_err(|e| NetError::MalformedMessage {
            peer: peer.clone(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peer(id: &str) -> PeerId {
        PeerId::from(id)
    }

    #[test]
    fn test_chat_wire_shape() {
        let envelope = Envelope {
            sender: peer("peer_1"),
            sequence: 7,
            body: EnvelopeBody::Chat(ChatMessage {
                text: "hi".into(),
                sender: "Alice".into(),
            }),
        };

        let value: Value = serde_json::from_slice(&envelope.encode()).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["senderId"], "peer_1");
        assert_eq!(value["sequence"], 7);
        assert_eq!(value["payload"]["text"], "hi");
        assert_eq!(value["payload"]["sender"], "Alice");
    }

    #[test]
    fn test_delta_uses_per_kind_id_field() {
        let envelope = Envelope {
            sender: peer("peer_3"),
            sequence: 1,
            body: EnvelopeBody::entity_update(
                EntityKind::Bullet,
                EntityId::from("bullet_17"),
                json!({ "x": 4.0 }),
            ),
        };

        let value: Value = serde_json::from_slice(&envelope.encode()).unwrap();
        assert_eq!(value["type"], "bulletUpdate");
        assert_eq!(value["payload"]["bulletId"], "bullet_17");

        let decoded = Envelope::decode(&peer("peer_3"), &envelope.encode()).unwrap();
        let (kind, id, data) = decoded.body.as_entity_update().unwrap();
        assert_eq!(kind, EntityKind::Bullet);
        assert_eq!(id.as_str(), "bullet_17");
        assert_eq!(data["x"], 4.0);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Envelope::decode(&peer("peer_9"), b"not json at all").unwrap_err();
        assert!(matches!(err, NetError::MalformedMessage { .. }));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let frame = json!({
            "type": "teleportEveryone",
            "senderId": "peer_9",
            "sequence": 1,
            "payload": {}
        });
        let bytes = serde_json::to_vec(&frame).unwrap();
        let err = Envelope::decode(&peer("peer_9"), &bytes).unwrap_err();
        assert!(matches!(err, NetError::MalformedMessage { .. }));
    }

    #[test]
    fn test_roundtrip_game_state() {
        let envelope = Envelope {
            sender: peer("host"),
            sequence: 42,
            body: EnvelopeBody::GameStateUpdate {
                data: GameStateSnapshot {
                    wave: 5,
                    score: 12_300,
                    chaos_level: 0.75,
                },
            },
        };

        let decoded = Envelope::decode(&peer("host"), &envelope.encode()).unwrap();
        assert_eq!(decoded, envelope);
    }
}
