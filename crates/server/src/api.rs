// REST read surface for room history.
//
// The WebSocket protocol has its own `fetch_history` frame; this route is
// the plain-HTTP equivalent for clients that render a room before opening
// a socket.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::error::{ChatError, ErrorCode};
use crate::history::HistoryService;

const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    /// Return only the most recent N messages, still in ascending order.
    /// Absent means the full history.
    limit: Option<usize>,
}

pub fn router(history: HistoryService) -> Router {
    Router::new()
        .route("/v1/rooms/{room_id}/messages", get(room_messages))
        .with_state(history)
}

async fn room_messages(
    Path(room_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    State(history): State<HistoryService>,
) -> Response {
    match history.history(room_id).await {
        Ok(mut messages) => {
            if let Some(limit) = query.limit {
                let limit = limit.min(MAX_PAGE_SIZE);
                if messages.len() > limit {
                    messages.drain(..messages.len() - limit);
                }
            }
            Json(messages).into_response()
        }
        Err(source) => {
            error!(room_id = %room_id, error = %source, "failed to load room history");
            ChatError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}
