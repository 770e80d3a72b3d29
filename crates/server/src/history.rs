use commune_common::types::ChatMessage;
use tracing::debug;
use uuid::Uuid;

use crate::store::{MessageStore, StoreError};

/// Read side for durable room history.
///
/// Always re-reads the store: the in-memory registries hold no message
/// content, and other processes may write to the same database. Never
/// touches connection or room membership state.
#[derive(Clone)]
pub struct HistoryService {
    store: MessageStore,
}

impl HistoryService {
    pub fn new(store: MessageStore) -> Self {
        Self { store }
    }

    /// The room's full message sequence, ascending by creation time with
    /// ids breaking ties. A room nobody ever wrote to yields an empty
    /// sequence.
    pub async fn history(&self, room_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.store.history(room_id).await?;
        debug!(room_id = %room_id, count = messages.len(), "room history loaded");
        Ok(messages)
    }
}
