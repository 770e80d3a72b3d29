use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use commune_common::types::ChatMessage;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug)]
pub enum StoreError {
    Append { source: sqlx::Error },

    History { source: sqlx::Error },

    Unavailable,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Append { source } => {
                write!(f, "failed to append message to postgres: {source}")
            }
            Self::History { source } => {
                write!(f, "failed to load room history from postgres: {source}")
            }
            Self::Unavailable => write!(f, "durable message store is unavailable"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Append { source } | Self::History { source } => Some(source),
            Self::Unavailable => None,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    room_id: Uuid,
    sender_id: Uuid,
    content: String,
    created_at: chrono::DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

/// In-process stand-in for postgres. Mirrors the ordering contract and can
/// inject append failures, per room or wholesale, to model an unreachable
/// or constraint-violating backend.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: HashMap<Uuid, Vec<ChatMessage>>,
    failing_rooms: HashSet<Uuid>,
    fail_all: bool,
}

/// The durable store of record for messages.
///
/// Message ids are generated here, at persistence time, along with the
/// creation timestamp. Appends are not deduplicated: a caller that retries
/// a failed publish may produce a duplicate row, which is the documented
/// at-least-once behavior.
#[derive(Clone)]
pub enum MessageStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<MemoryMessageStore>>),
}

impl MessageStore {
    /// Persist one message and return it with its generated id and
    /// timestamp.
    pub async fn append(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        match self {
            Self::Postgres(pool) => sqlx::query_as::<_, MessageRow>(
                "
                INSERT INTO messages (id, room_id, sender_id, content, created_at)
                VALUES ($1, $2, $3, $4, now())
                RETURNING id, room_id, sender_id, content, created_at
                ",
            )
            .bind(Uuid::new_v4())
            .bind(room_id)
            .bind(sender_id)
            .bind(content)
            .fetch_one(pool)
            .await
            .map(MessageRow::into_message)
            .map_err(|source| StoreError::Append { source }),
            Self::Memory(store) => {
                let mut guard = store.write().await;
                if guard.fail_all || guard.failing_rooms.contains(&room_id) {
                    return Err(StoreError::Unavailable);
                }

                let message = ChatMessage {
                    id: Uuid::new_v4(),
                    room_id,
                    sender_id,
                    content: content.to_owned(),
                    created_at: Utc::now(),
                };
                guard.messages.entry(room_id).or_default().push(message.clone());
                Ok(message)
            }
        }
    }

    /// Load a room's full history, ascending by creation time with ids
    /// breaking ties. Unknown rooms yield an empty sequence.
    pub async fn history(&self, room_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        match self {
            Self::Postgres(pool) => sqlx::query_as::<_, MessageRow>(
                "
                SELECT id, room_id, sender_id, content, created_at
                FROM messages
                WHERE room_id = $1
                ORDER BY created_at ASC, id ASC
                ",
            )
            .bind(room_id)
            .fetch_all(pool)
            .await
            .map(|rows| rows.into_iter().map(MessageRow::into_message).collect())
            .map_err(|source| StoreError::History { source }),
            Self::Memory(store) => {
                let guard = store.read().await;
                let mut messages = guard.messages.get(&room_id).cloned().unwrap_or_default();
                messages.sort_by_key(ChatMessage::ordering_key);
                Ok(messages)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryMessageStore::default())))
    }

    /// Make appends to one room fail until cleared. Memory variant only.
    #[cfg(test)]
    pub(crate) async fn fail_appends_for(&self, room_id: Uuid) {
        if let Self::Memory(store) = self {
            store.write().await.failing_rooms.insert(room_id);
        }
    }

    #[cfg(test)]
    pub(crate) async fn fail_all_appends(&self, fail: bool) {
        if let Self::Memory(store) = self {
            store.write().await.fail_all = fail;
        }
    }

    /// Insert a fully formed message, bypassing id/timestamp generation.
    /// Lets tests seed histories with explicit timestamps.
    #[cfg(test)]
    pub(crate) async fn seed(&self, message: ChatMessage) {
        if let Self::Memory(store) = self {
            store.write().await.messages.entry(message.room_id).or_default().push(message);
        }
    }

    /// Message ids in the order they were appended, which is persistence
    /// completion order. Memory variant only.
    #[cfg(test)]
    pub(crate) async fn appended_order(&self, room_id: Uuid) -> Vec<Uuid> {
        match self {
            Self::Memory(store) => store
                .read()
                .await
                .messages
                .get(&room_id)
                .map(|messages| messages.iter().map(|message| message.id).collect())
                .unwrap_or_default(),
            Self::Postgres(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageStore, StoreError};
    use chrono::{TimeZone, Utc};
    use commune_common::types::ChatMessage;
    use uuid::Uuid;

    fn seeded_message(room_id: Uuid, secs: i64, id: Uuid) -> ChatMessage {
        ChatMessage {
            id,
            room_id,
            sender_id: Uuid::new_v4(),
            content: format!("message at {secs}"),
            created_at: Utc.timestamp_opt(secs, 0).single().expect("timestamp should be valid"),
        }
    }

    #[tokio::test]
    async fn append_generates_id_and_timestamp() {
        let store = MessageStore::for_tests();
        let room_id = Uuid::new_v4();
        let sender_id = Uuid::new_v4();

        let message =
            store.append(room_id, sender_id, "hello").await.expect("append should succeed");

        assert_eq!(message.room_id, room_id);
        assert_eq!(message.sender_id, sender_id);
        assert_eq!(message.content, "hello");
    }

    #[tokio::test]
    async fn history_of_unknown_room_is_empty() {
        let store = MessageStore::for_tests();
        let history = store.history(Uuid::new_v4()).await.expect("history should succeed");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn history_orders_by_timestamp_then_id() {
        let store = MessageStore::for_tests();
        let room_id = Uuid::new_v4();
        let low_id = Uuid::from_u128(1);
        let high_id = Uuid::from_u128(2);

        store.seed(seeded_message(room_id, 20, high_id)).await;
        store.seed(seeded_message(room_id, 10, low_id)).await;
        store.seed(seeded_message(room_id, 20, low_id)).await;

        let history = store.history(room_id).await.expect("history should succeed");
        let ids = history.iter().map(|message| message.id).collect::<Vec<_>>();

        assert_eq!(ids, vec![low_id, low_id, high_id]);
        assert!(history.windows(2).all(|pair| pair[0].created_at <= pair[1].created_at));
    }

    #[tokio::test]
    async fn injected_failure_only_hits_the_marked_room() {
        let store = MessageStore::for_tests();
        let failing_room = Uuid::new_v4();
        let healthy_room = Uuid::new_v4();
        store.fail_appends_for(failing_room).await;

        let error = store
            .append(failing_room, Uuid::new_v4(), "doomed")
            .await
            .expect_err("append to the failing room should error");
        assert!(matches!(error, StoreError::Unavailable));

        store
            .append(healthy_room, Uuid::new_v4(), "fine")
            .await
            .expect("append to the healthy room should succeed");
    }

    #[tokio::test]
    async fn retried_appends_are_not_deduplicated() {
        let store = MessageStore::for_tests();
        let room_id = Uuid::new_v4();
        let sender_id = Uuid::new_v4();

        let first = store.append(room_id, sender_id, "again").await.expect("append");
        let second = store.append(room_id, sender_id, "again").await.expect("append");

        assert_ne!(first.id, second.id);
        assert_eq!(store.history(room_id).await.expect("history").len(), 2);
    }
}
