use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use commune_common::protocol::ws::WsMessage;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::registry::RoomRegistry;

#[derive(Debug, Default)]
struct ConnectionRecord {
    joined: HashSet<Uuid>,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
}

/// Owns the lifecycle of every live connection.
///
/// Each connection carries its joined-room set and the outbound channel to
/// its transport task. This manager is the only writer that removes room
/// registry entries on teardown, which is what keeps `members` free of
/// permanently dead connections.
///
/// Registry updates happen while the connection table's write guard is
/// held, so a join can never interleave with a disconnect of the same
/// connection and leave a stale subscription behind.
#[derive(Debug)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<Uuid, ConnectionRecord>>,
    registry: Arc<RoomRegistry>,
}

impl ConnectionManager {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { connections: RwLock::new(HashMap::new()), registry }
    }

    /// Allocate a new connection with an empty joined-room set. Total; no
    /// failure mode.
    pub async fn connect(&self) -> Uuid {
        let connection_id = Uuid::new_v4();
        self.connections.write().await.insert(connection_id, ConnectionRecord::default());
        connection_id
    }

    /// Wire the transport task's outbound sender. Returns false when the
    /// connection is already gone.
    pub async fn register_outbound(
        &self,
        connection_id: Uuid,
        sender: mpsc::UnboundedSender<WsMessage>,
    ) -> bool {
        match self.connections.write().await.get_mut(&connection_id) {
            Some(record) => {
                record.outbound = Some(sender);
                true
            }
            None => false,
        }
    }

    /// Join a room. Joining a room twice is a no-op. Returns false when the
    /// connection does not exist.
    pub async fn join(&self, connection_id: Uuid, room_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        let Some(record) = connections.get_mut(&connection_id) else {
            return false;
        };

        if record.joined.insert(room_id) {
            self.registry.subscribe(room_id, connection_id).await;
        }
        true
    }

    /// Leave one room; other memberships are untouched. Leaving a room that
    /// was never joined is a no-op.
    pub async fn leave(&self, connection_id: Uuid, room_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        let Some(record) = connections.get_mut(&connection_id) else {
            return false;
        };

        let was_joined = record.joined.remove(&room_id);
        if was_joined {
            self.registry.unsubscribe(room_id, connection_id).await;
        }
        was_joined
    }

    /// Tear down a connection: unsubscribe it from every joined room, then
    /// discard the record.
    ///
    /// Safe to run concurrently with an in-flight broadcast that still holds
    /// this connection in its member snapshot: the broadcast finds the
    /// outbound channel closed and skips the member.
    pub async fn disconnect(&self, connection_id: Uuid) {
        let mut connections = self.connections.write().await;
        let Some(record) = connections.remove(&connection_id) else {
            return;
        };

        for room_id in record.joined {
            self.registry.unsubscribe(room_id, connection_id).await;
        }
    }

    /// Snapshot of the outbound handle, used by fan-out. None once the
    /// connection is gone or before the transport registered its channel.
    pub async fn outbound_for(
        &self,
        connection_id: Uuid,
    ) -> Option<mpsc::UnboundedSender<WsMessage>> {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .and_then(|record| record.outbound.clone())
    }

    #[cfg(test)]
    pub(crate) async fn joined_rooms(&self, connection_id: Uuid) -> Option<Vec<Uuid>> {
        self.connections.read().await.get(&connection_id).map(|record| {
            let mut rooms = record.joined.iter().copied().collect::<Vec<_>>();
            rooms.sort();
            rooms
        })
    }
}
