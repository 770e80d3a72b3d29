use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use commune_common::protocol::ws::WsMessage;
use commune_common::types::{validate_content, ChatMessage, ContentError};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::error::ErrorCode;
use crate::registry::RoomRegistry;
use crate::store::{MessageStore, StoreError};

pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug)]
pub enum PublishError {
    InvalidContent { source: ContentError },

    Persistence { source: StoreError },

    PersistTimeout { timeout: Duration },
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidContent { source } => {
                write!(f, "message rejected before persistence: {source}")
            }
            Self::Persistence { source } => write!(f, "failed to persist message: {source}"),
            Self::PersistTimeout { timeout } => {
                write!(f, "persisting message timed out after {}ms", timeout.as_millis())
            }
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidContent { source } => Some(source),
            Self::Persistence { source } => Some(source),
            Self::PersistTimeout { .. } => None,
        }
    }
}

impl PublishError {
    /// Wire-level code reported to the publishing client. Delivery failures
    /// never appear here: fan-out is best effort and skipped members are
    /// only logged.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidContent { .. } => ErrorCode::ValidationFailed,
            Self::Persistence { .. } | Self::PersistTimeout { .. } => ErrorCode::PersistenceFailed,
        }
    }
}

/// Outcome of a successful publish: the persisted message plus fan-out
/// accounting.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub message: ChatMessage,
    /// Members whose outbound channel accepted the delivery.
    pub delivered: usize,
    /// Members skipped because their transport was already gone.
    pub skipped: usize,
}

/// Persists inbound messages, then fans them out to the publishing room.
///
/// The central guarantee is durability-before-visibility: no member ever
/// sees a `message_delivered` frame for a message the store did not accept.
/// Publishes to one room are serialized across their persist-then-deliver
/// steps, so every member observes messages in persistence-completion
/// order; different rooms proceed independently.
pub struct MessageBroker {
    store: MessageStore,
    registry: Arc<RoomRegistry>,
    connections: Arc<ConnectionManager>,
    room_locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
    persist_timeout: Duration,
}

impl MessageBroker {
    pub fn new(
        store: MessageStore,
        registry: Arc<RoomRegistry>,
        connections: Arc<ConnectionManager>,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            connections,
            room_locks: RwLock::new(HashMap::new()),
            persist_timeout,
        }
    }

    pub async fn publish(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<PublishOutcome, PublishError> {
        validate_content(content).map_err(|source| PublishError::InvalidContent { source })?;

        let room_lock = self.lock_for_room(room_id).await;
        let _guard = room_lock.lock().await;

        let message = match tokio::time::timeout(
            self.persist_timeout,
            self.store.append(room_id, sender_id, content),
        )
        .await
        {
            Ok(Ok(message)) => message,
            Ok(Err(source)) => {
                warn!(
                    room_id = %room_id,
                    sender_id = %sender_id,
                    error = %source,
                    "message persistence failed, publish aborted"
                );
                return Err(PublishError::Persistence { source });
            }
            Err(_) => {
                warn!(
                    room_id = %room_id,
                    sender_id = %sender_id,
                    timeout_ms = self.persist_timeout.as_millis() as u64,
                    "message persistence timed out, publish aborted"
                );
                return Err(PublishError::PersistTimeout { timeout: self.persist_timeout });
            }
        };

        // The message is durable from here on. Everything below is
        // best-effort live delivery: a member that fails to receive still
        // finds the message in history.
        let members = self.registry.members(room_id).await;
        let mut delivered = 0;
        let mut skipped = 0;
        for member in members {
            let Some(outbound) = self.connections.outbound_for(member).await else {
                skipped += 1;
                debug!(
                    room_id = %room_id,
                    connection_id = %member,
                    "member has no live transport, skipping delivery"
                );
                continue;
            };

            if outbound.send(WsMessage::MessageDelivered { message: message.clone() }).is_ok() {
                delivered += 1;
            } else {
                skipped += 1;
                debug!(
                    room_id = %room_id,
                    connection_id = %member,
                    "member transport closed mid-broadcast, skipping delivery"
                );
            }
        }

        debug!(
            room_id = %room_id,
            message_id = %message.id,
            delivered,
            skipped,
            "message persisted and fanned out"
        );

        Ok(PublishOutcome { message, delivered, skipped })
    }

    async fn lock_for_room(&self, room_id: Uuid) -> Arc<Mutex<()>> {
        if let Some(existing) = self.room_locks.read().await.get(&room_id).cloned() {
            return existing;
        }

        let mut locks = self.room_locks.write().await;
        locks.entry(room_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}
