//! Room Store port.
//!
//! A room is persisted as one record: the whole [`RoomAggregate`] with its
//! members, assignments, claims, bids, choices and bracket. Every committed
//! change carries the next `version`, so a store shared between processes
//! can reject a writer that did not see the latest state.

use std::collections::HashMap;
use std::future::Future;

use huddle_protocol::RoomId;
use tokio::sync::RwLock;

use crate::{RoomAggregate, StorageError};

pub trait RoomStore: Send + Sync + 'static {
    fn load(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<Option<RoomAggregate>, StorageError>> + Send;

    /// Persists `room`. Its version must be exactly one past the stored
    /// version, or `1` for a room the store has not seen.
    fn save(&self, room: &RoomAggregate) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Removes the room. Deleting an unknown room returns `Ok(false)`.
    fn delete(&self, room_id: RoomId) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn list(&self) -> impl Future<Output = Result<Vec<RoomAggregate>, StorageError>> + Send;
}

/// In-process store. Default for single-node deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<RoomId, RoomAggregate>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

impl RoomStore for MemoryRoomStore {
    async fn load(&self, room_id: RoomId) -> Result<Option<RoomAggregate>, StorageError> {
        Ok(self.rooms.read().await.get(&room_id).cloned())
    }

    async fn save(&self, room: &RoomAggregate) -> Result<(), StorageError> {
        let mut rooms = self.rooms.write().await;
        let stored = rooms.get(&room.room_id()).map_or(0, RoomAggregate::version);
        let expected = stored + 1;
        if room.version() != expected {
            return Err(StorageError::VersionConflict {
                room_id: room.room_id(),
                expected,
                actual: room.version(),
            });
        }
        rooms.insert(room.room_id(), room.clone());
        Ok(())
    }

    async fn delete(&self, room_id: RoomId) -> Result<bool, StorageError> {
        Ok(self.rooms.write().await.remove(&room_id).is_some())
    }

    async fn list(&self) -> Result<Vec<RoomAggregate>, StorageError> {
        let mut rooms: Vec<RoomAggregate> = self.rooms.read().await.values().cloned().collect();
        rooms.sort_by_key(RoomAggregate::room_id);
        Ok(rooms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoomSettings;
    use huddle_protocol::{Timestamp, UserId};

    fn room(id: u64) -> RoomAggregate {
        RoomAggregate::open(
            RoomId(id),
            UserId(1),
            "host".into(),
            RoomSettings::default(),
            Timestamp(0),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_requires_next_version() {
        let store = MemoryRoomStore::new();
        let mut r = room(1);
        store.save(&r).await.unwrap();

        let err = store.save(&r).await.unwrap_err();
        assert_eq!(
            err,
            StorageError::VersionConflict {
                room_id: RoomId(1),
                expected: 2,
                actual: 1
            }
        );

        r.bump_version();
        store.save(&r).await.unwrap();
        assert_eq!(store.load(RoomId(1)).await.unwrap().unwrap().version(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryRoomStore::new();
        store.save(&room(1)).await.unwrap();
        assert!(store.delete(RoomId(1)).await.unwrap());
        assert!(!store.delete(RoomId(1)).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_id() {
        let store = MemoryRoomStore::new();
        store.save(&room(3)).await.unwrap();
        store.save(&room(1)).await.unwrap();
        let ids: Vec<RoomId> = store.list().await.unwrap().iter().map(RoomAggregate::room_id).collect();
        assert_eq!(ids, vec![RoomId(1), RoomId(3)]);
    }
}
