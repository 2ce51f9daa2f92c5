use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use huddle_core::AppState;
use huddle_models::room::MemberRole;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

pub async fn list_rooms(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let rooms = state.dispatcher.rooms_for_user(auth.user_id).await?;
    Ok(Json(json!(rooms)))
}

pub async fn join_room(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(room_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let room = huddle_core::room::join_room(&state.db, auth.user_id, room_id).await?;
    tracing::debug!(user_id = auth.user_id, room_id, "joined room");
    Ok(Json(json!({
        "id": room.id.to_string(),
        "name": room.name,
        "description": room.description,
        "is_private": room.is_private,
        "updated_at": room.updated_at,
    })))
}

pub async fn leave_room(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(room_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    huddle_core::room::leave_room(&state.db, state.hub(), auth.user_id, room_id).await?;
    tracing::debug!(user_id = auth.user_id, room_id, "left room");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(room_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.dispatcher.authorize_join(auth.user_id, room_id).await?;

    let members = huddle_db::members::get_room_members(&state.db, room_id).await?;
    let presence = state.presence();
    let result: Vec<Value> = members
        .iter()
        .map(|m| {
            json!({
                "user_id": m.user_id.to_string(),
                "username": m.username,
                "display_name": m.display_name.as_deref().unwrap_or(&m.username),
                "avatar_url": m.avatar_url,
                "role": MemberRole::parse(&m.role),
                "joined_at": m.joined_at,
                "is_online": presence.is_online(m.user_id),
                "last_seen": presence.last_seen(m.user_id).or(m.last_seen),
            })
        })
        .collect();
    Ok(Json(json!(result)))
}
