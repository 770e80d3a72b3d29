use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory room membership table: room id -> connected members.
///
/// Holds no message content and nothing durable. On process restart the
/// table starts empty and is rebuilt as clients reconnect and re-join.
/// Rooms have no lifecycle of their own: an entry exists exactly as long
/// as at least one connection is subscribed.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room's member set. Idempotent.
    pub async fn subscribe(&self, room_id: Uuid, connection_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room_id).or_default().insert(connection_id)
    }

    /// Remove a connection from one room's member set. Unsubscribing a
    /// connection that was never subscribed is a no-op. The entry is
    /// dropped with its last member so idle rooms do not accumulate.
    pub async fn unsubscribe(&self, room_id: Uuid, connection_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(&room_id) else {
            return false;
        };

        let removed = members.remove(&connection_id);
        if members.is_empty() {
            rooms.remove(&room_id);
        }
        removed
    }

    /// Snapshot of a room's current members. An absent room and an empty
    /// room are indistinguishable: both yield an empty snapshot.
    ///
    /// The snapshot may be stale by the time the caller acts on it; fan-out
    /// tolerates members that disconnect between snapshot and delivery.
    pub async fn members(&self, room_id: Uuid) -> Vec<Uuid> {
        self.rooms
            .read()
            .await
            .get(&room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::RoomRegistry;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscribe_twice_yields_one_member() {
        let registry = RoomRegistry::new();
        let room_id = Uuid::new_v4();
        let connection_id = Uuid::new_v4();

        assert!(registry.subscribe(room_id, connection_id).await);
        assert!(!registry.subscribe(room_id, connection_id).await);

        assert_eq!(registry.members(room_id).await, vec![connection_id]);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_room_is_noop() {
        let registry = RoomRegistry::new();

        assert!(!registry.unsubscribe(Uuid::new_v4(), Uuid::new_v4()).await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_only_touches_the_named_room() {
        let registry = RoomRegistry::new();
        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();
        let connection_id = Uuid::new_v4();

        registry.subscribe(room_a, connection_id).await;
        registry.subscribe(room_b, connection_id).await;
        registry.unsubscribe(room_a, connection_id).await;

        assert!(registry.members(room_a).await.is_empty());
        assert_eq!(registry.members(room_b).await, vec![connection_id]);
    }

    #[tokio::test]
    async fn empty_room_entry_is_pruned() {
        let registry = RoomRegistry::new();
        let room_id = Uuid::new_v4();
        let connection_id = Uuid::new_v4();

        registry.subscribe(room_id, connection_id).await;
        assert_eq!(registry.room_count().await, 1);

        registry.unsubscribe(room_id, connection_id).await;
        assert_eq!(registry.room_count().await, 0);
        assert!(registry.members(room_id).await.is_empty());
    }

    #[tokio::test]
    async fn members_of_absent_room_is_empty() {
        let registry = RoomRegistry::new();
        assert!(registry.members(Uuid::new_v4()).await.is_empty());
    }
}
