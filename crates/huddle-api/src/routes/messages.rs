use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use huddle_core::AppState;
use huddle_models::gateway::SendMessage;
use huddle_models::message::MessageType;
use huddle_util::pagination::OffsetParams;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default, rename = "type")]
    pub message_type: MessageType,
    #[serde(default, with = "huddle_models::id::option")]
    pub reply_to_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default, alias = "roomId", with = "huddle_models::id::option")]
    pub room_id: Option<i64>,
}

pub async fn get_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(room_id): Path<i64>,
    Query(params): Query<OffsetParams>,
) -> Result<Json<Value>, ApiError> {
    let messages = state
        .dispatcher
        .room_history(auth.user_id, room_id, params.limit(), params.offset())
        .await?;
    Ok(Json(json!(messages)))
}

/// Same persist-then-broadcast path as a gateway `send-message`, with no
/// originating connection to exclude.
pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(room_id): Path<i64>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = huddle_db::users::get_user_by_id(&state.db, auth.user_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    let identity =
        huddle_models::user::UserIdentity::new(user.id, user.username, user.display_name);

    let delivered = state
        .dispatcher
        .send_message(
            &identity,
            None,
            SendMessage {
                room_id,
                content: body.content,
                message_type: body.message_type,
                reply_to_id: body.reply_to_id,
                nonce: None,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "message": *delivered }))))
}

pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((room_id, message_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let message = huddle_db::messages::get_message(&state.db, message_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if message.room_id != room_id {
        return Err(ApiError::NotFound);
    }
    huddle_core::message::delete_own_message(&state.db, auth.user_id, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn search(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Value>, ApiError> {
    let hits =
        huddle_core::message::search(&state.db, auth.user_id, &params.q, params.room_id).await?;
    Ok(Json(json!(hits)))
}
