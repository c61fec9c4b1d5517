use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::db::models::RoomId;
use crate::db::queries::{messages, presence, rooms};
use crate::engine::validation;

use super::app_state::AppState;

#[derive(Debug, Deserialize)]
pub struct JoinRoomRequest {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub room_id: RoomId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn invalid_input(errors: Vec<FieldError>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "message": "Invalid input", "errors": errors })),
    )
        .into_response()
}

fn parse_room_id(raw: &str) -> Result<RoomId, Response> {
    raw.parse::<RoomId>()
        .map_err(|_| error_body(StatusCode::BAD_REQUEST, "Invalid room ID"))
}

/// POST /api/rooms/join: resolve a password to its room, creating it on first use.
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    body: Result<Json<JoinRoomRequest>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return invalid_input(vec![FieldError {
                field: "body",
                message: rejection.body_text(),
            }]);
        }
    };

    let mut errors = Vec::new();
    if let Err(message) = validation::validate_room_password(&body.password) {
        errors.push(FieldError {
            field: "password",
            message,
        });
    }
    if let Err(message) = validation::validate_username(&body.username) {
        errors.push(FieldError {
            field: "username",
            message,
        });
    }
    if !errors.is_empty() {
        return invalid_input(errors);
    }

    match rooms::get_or_create_room(&state.db, &body.password).await {
        Ok(room) => {
            info!(room_id = room.id, username = %body.username.trim(), "room password accepted");
            Json(JoinRoomResponse {
                room_id: room.id,
                created_at: room.created_at,
            })
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to resolve room");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to join room")
        }
    }
}

/// GET /api/rooms/{roomId}/messages: full history, oldest first.
pub async fn get_messages(State(state): State<Arc<AppState>>, Path(room_id): Path<String>) -> Response {
    let room_id = match parse_room_id(&room_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match messages::list_messages(&state.db, room_id).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            error!(room_id, error = %e, "failed to fetch messages");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch messages")
        }
    }
}

/// GET /api/rooms/{roomId}/users: current presence records.
pub async fn get_active_users(State(state): State<Arc<AppState>>, Path(room_id): Path<String>) -> Response {
    let room_id = match parse_room_id(&room_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match presence::list_active(&state.db, room_id).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            error!(room_id, error = %e, "failed to fetch active users");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch active users")
        }
    }
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "rooms": state.relay.registry().room_count(),
        "purges": state.relay.purger().purges_completed(),
    }))
}
