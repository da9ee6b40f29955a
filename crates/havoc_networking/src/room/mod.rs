//! # Room Directory
//!
//! Room formation: short join codes, host-owned room lifetime, and the
//! narrow contract this layer needs from whatever rendezvous service
//! actually stores the records.
//!
//! ## Design
//!
//! - Codes are 6 characters from `[A-Z0-9]`, unique among active rooms
//! - The host creates the room; the room dies when the host leaves
//! - Storage is behind [`DirectoryStore`]: get, put-if-absent (atomic
//!   on room existence, so concurrent creates cannot lose a room),
//!   update, delete. The real rendezvous transport is out of scope.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

use crate::error::NetError;
use crate::protocol::PeerId;
use crate::{MAX_PEERS, ROOM_CODE_LEN};

/// Alphabet room codes are drawn from.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Attempts at generating a non-colliding code before giving up.
const CODE_RETRIES: usize = 32;

/// A 6-character room join code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Validates and wraps a code string.
    ///
    /// Returns `None` unless the string is exactly 6 characters from
    /// `[A-Z0-9]`.
    #[must_use]
    pub fn new(code: &str) -> Option<Self> {
        let valid = code.len() == ROOM_CODE_LEN
            && code.bytes().all(|b| CODE_ALPHABET.contains(&b));
        valid.then(|| Self(code.to_owned()))
    }

    /// Generates a random code.
    #[must_use]
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let code = (0..ROOM_CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A session container: one host, zero or more joined peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Join code.
    pub code: RoomCode,
    /// Peer that created the room.
    pub host: PeerId,
    /// Creation time, milliseconds since the Unix epoch.
    pub created: u64,
    /// Everyone currently in the room, host included.
    pub members: BTreeSet<PeerId>,
}

impl Room {
    /// Creates a room with the host as its only member.
    #[must_use]
    pub fn new(code: RoomCode, host: PeerId, created: u64) -> Self {
        let mut members = BTreeSet::new();
        members.insert(host.clone());
        Self {
            code,
            host,
            created,
            members,
        }
    }

    /// Members other than `me`.
    pub fn others<'a>(&'a self, me: &'a PeerId) -> impl Iterator<Item = &'a PeerId> {
        self.members.iter().filter(move |m| *m != me)
    }
}

/// Contract required from the external room storage collaborator.
///
/// Implementations must make `put_if_absent` atomic on room existence;
/// everything else is plain read-modify-write from the single-threaded
/// session loop.
pub trait DirectoryStore: Send + Sync {
    /// Looks up a room by code.
    fn get(&self, code: &RoomCode) -> Result<Option<Room>, NetError>;
    /// Registers a room unless the code is already taken. Returns
    /// `true` when the room was stored.
    fn put_if_absent(&self, room: Room) -> Result<bool, NetError>;
    /// Overwrites an existing room record.
    fn update(&self, room: Room) -> Result<(), NetError>;
    /// Deletes a room record.
    fn delete(&self, code: &RoomCode) -> Result<(), NetError>;
    /// Codes of all currently active rooms.
    fn codes(&self) -> Result<Vec<RoomCode>, NetError>;
}

/// In-process directory store backing tests and same-machine sessions.
///
/// Clones share the same underlying map, standing in for the shared
/// registry all participants observe.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    rooms: Arc<RwLock<HashMap<RoomCode, Room>>>,
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DirectoryStore for InMemoryDirectory {
    fn get(&self, code: &RoomCode) -> Result<Option<Room>, NetError> {
        Ok(self.rooms.read().get(code).cloned())
    }

    fn put_if_absent(&self, room: Room) -> Result<bool, NetError> {
        let mut rooms = self.rooms.write();
        if rooms.contains_key(&room.code) {
            return Ok(false);
        }
        rooms.insert(room.code.clone(), room);
        Ok(true)
    }

    fn update(&self, room: Room) -> Result<(), NetError> {
        self.rooms.write().insert(room.code.clone(), room);
        Ok(())
    }

    fn delete(&self, code: &RoomCode) -> Result<(), NetError> {
        self.rooms.write().remove(code);
        Ok(())
    }

    fn codes(&self) -> Result<Vec<RoomCode>, NetError> {
        Ok(self.rooms.read().keys().cloned().collect())
    }
}

/// Creates and looks up rooms on behalf of one local peer.
pub struct RoomDirectory {
    store: Arc<dyn DirectoryStore>,
    me: PeerId,
}

impl RoomDirectory {
    /// Creates a directory client for the local peer.
    pub fn new(store: Arc<dyn DirectoryStore>, me: PeerId) -> Self {
        Self { store, me }
    }

    /// Creates a room and registers the local peer as its host.
    ///
    /// Retries code generation on collision against currently active
    /// rooms; `put_if_absent` closes the race against a concurrent
    /// create landing on the same code.
    ///
    /// # Errors
    ///
    /// [`NetError::DirectoryUnavailable`] when the store fails or no
    /// free code can be found.
    pub fn create_room(&self) -> Result<Room, NetError> {
        let mut rng = rand::thread_rng();
        for _ in 0..CODE_RETRIES {
            let code = RoomCode::generate(&mut rng);
            let room = Room::new(code.clone(), self.me.clone(), now_ms());
            if self.store.put_if_absent(room.clone())? {
                info!(code = %code, host = %self.me, "room created");
                return Ok(room);
            }
            debug!(code = %code, "room code collision, retrying");
        }
        Err(NetError::DirectoryUnavailable(
            "could not allocate a free room code".into(),
        ))
    }

    /// Adds the local peer to an existing room.
    ///
    /// # Errors
    ///
    /// [`NetError::RoomNotFound`] when no room is registered under
    /// `code`, [`NetError::RoomFull`] when the room already holds
    /// [`MAX_PEERS`] members; store failures propagate as
    /// [`NetError::DirectoryUnavailable`].
    pub fn join_room(&self, code: &RoomCode) -> Result<Room, NetError> {
        let Some(mut room) = self.store.get(code)? else {
            return Err(NetError::RoomNotFound(code.clone()));
        };
        if room.members.len() >= MAX_PEERS && !room.members.contains(&self.me) {
            return Err(NetError::RoomFull(code.clone()));
        }
        room.members.insert(self.me.clone());
        self.store.update(room.clone())?;
        info!(code = %code, peer = %self.me, "joined room");
        Ok(room)
    }

    /// Removes the local peer from a room.
    ///
    /// A departing host deletes the room outright; anyone else just
    /// shrinks the member set.
    ///
    /// # Errors
    ///
    /// Store failures propagate as [`NetError::DirectoryUnavailable`].
    pub fn leave_room(&self, code: &RoomCode) -> Result<(), NetError> {
        let Some(mut room) = self.store.get(code)? else {
            return Ok(());
        };
        if room.host == self.me {
            self.store.delete(code)?;
            info!(code = %code, "host left, room destroyed");
        } else {
            room.members.remove(&self.me);
            self.store.update(room)?;
            info!(code = %code, peer = %self.me, "left room");
        }
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(id: &str) -> (RoomDirectory, Arc<InMemoryDirectory>) {
        let store = Arc::new(InMemoryDirectory::new());
        let dir = RoomDirectory::new(store.clone(), PeerId::from(id));
        (dir, store)
    }

    #[test]
    fn test_code_shape() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = RoomCode::generate(&mut rng);
            assert_eq!(code.as_str().len(), 6);
            assert!(code
                .as_str()
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_code_validation() {
        assert!(RoomCode::new("AB12CD").is_some());
        assert!(RoomCode::new("ab12cd").is_none());
        assert!(RoomCode::new("AB12C").is_none());
        assert!(RoomCode::new("AB12CDE").is_none());
        assert!(RoomCode::new("AB12C!").is_none());
    }

    #[test]
    fn test_create_and_join() {
        let (host_dir, store) = directory("host");
        let room = host_dir.create_room().unwrap();
        assert_eq!(room.host, PeerId::from("host"));
        assert_eq!(room.members.len(), 1);

        let client_dir = RoomDirectory::new(store, PeerId::from("client"));
        let joined = client_dir.join_room(&room.code).unwrap();
        assert!(joined.members.contains(&PeerId::from("client")));
        assert_eq!(joined.members.len(), 2);
    }

    #[test]
    fn test_join_missing_room() {
        let (dir, _) = directory("client");
        let code = RoomCode::new("ZZZZZZ").unwrap();
        let err = dir.join_room(&code).unwrap_err();
        assert_eq!(err, NetError::RoomNotFound(code));
    }

    #[test]
    fn test_host_leave_destroys_room() {
        let (host_dir, store) = directory("host");
        let room = host_dir.create_room().unwrap();

        let client_dir = RoomDirectory::new(store.clone(), PeerId::from("client"));
        client_dir.join_room(&room.code).unwrap();

        host_dir.leave_room(&room.code).unwrap();
        assert!(store.get(&room.code).unwrap().is_none());
    }

    #[test]
    fn test_member_leave_shrinks_room() {
        let (host_dir, store) = directory("host");
        let room = host_dir.create_room().unwrap();

        let client_dir = RoomDirectory::new(store.clone(), PeerId::from("client"));
        client_dir.join_room(&room.code).unwrap();
        client_dir.leave_room(&room.code).unwrap();

        let remaining = store.get(&room.code).unwrap().unwrap();
        assert_eq!(remaining.members.len(), 1);
        assert!(remaining.members.contains(&PeerId::from("host")));
    }

    #[test]
    fn test_join_full_room_refused() {
        let (host_dir, store) = directory("host");
        let room = host_dir.create_room().unwrap();

        for i in 1..MAX_PEERS {
            let member = RoomDirectory::new(store.clone(), PeerId::from(format!("peer{i}")));
            member.join_room(&room.code).unwrap();
        }

        let ninth = RoomDirectory::new(store.clone(), PeerId::from("ninth"));
        let err = ninth.join_room(&room.code).unwrap_err();
        assert_eq!(err, NetError::RoomFull(room.code.clone()));
        assert_eq!(store.get(&room.code).unwrap().unwrap().members.len(), MAX_PEERS);
    }

    #[test]
    fn test_put_if_absent_is_exclusive() {
        let store = InMemoryDirectory::new();
        let code = RoomCode::new("AAAAAA").unwrap();
        let first = Room::new(code.clone(), PeerId::from("a"), 1);
        let second = Room::new(code.clone(), PeerId::from("b"), 2);

        assert!(store.put_if_absent(first).unwrap());
        assert!(!store.put_if_absent(second).unwrap());
        assert_eq!(store.get(&code).unwrap().unwrap().host, PeerId::from("a"));
    }
}
