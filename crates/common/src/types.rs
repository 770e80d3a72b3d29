// Core domain types shared across the Commune crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Largest accepted message body in bytes.
pub const MAX_CONTENT_BYTES: usize = 8 * 1024;

/// A chat message as persisted by the durable store.
///
/// Immutable once persisted. The total order over a room's messages is
/// `created_at` ascending with ties broken by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    /// The community entity this message belongs to.
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Sort key for the room-wide total order.
    pub fn ordering_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("message content is empty or whitespace-only")]
    Empty,

    #[error("message content exceeds maximum length of {MAX_CONTENT_BYTES} bytes (got {0})")]
    TooLong(usize),
}

/// Validate message content before it is allowed anywhere near persistence.
///
/// Rules:
/// - Reject empty or whitespace-only content
/// - Enforce the max byte limit (a frame must stay transportable)
///
/// Surrounding whitespace is preserved; only fully blank content is invalid.
pub fn validate_content(content: &str) -> Result<(), ContentError> {
    if content.trim().is_empty() {
        return Err(ContentError::Empty);
    }

    if content.len() > MAX_CONTENT_BYTES {
        return Err(ContentError::TooLong(content.len()));
    }

    Ok(())
}
