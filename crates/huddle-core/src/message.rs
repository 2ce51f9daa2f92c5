use crate::error::CoreError;
use huddle_db::DbPool;
use huddle_models::message::MessageType;
use serde::Serialize;

pub const SEARCH_LIMIT: i64 = 50;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(with = "huddle_models::id")]
    pub id: i64,
    #[serde(with = "huddle_models::id")]
    pub room_id: i64,
    pub room_name: String,
    #[serde(with = "huddle_models::id")]
    pub sender_id: i64,
    pub username: String,
    pub display_name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Case-insensitive substring search over the rooms the user belongs to.
pub async fn search(
    pool: &DbPool,
    user_id: i64,
    query: &str,
    room_id: Option<i64>,
) -> Result<Vec<SearchHit>, CoreError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CoreError::Validation("search query is empty".into()));
    }
    let rows = huddle_db::messages::search_messages(pool, user_id, query, room_id, SEARCH_LIMIT).await?;
    Ok(rows
        .into_iter()
        .map(|row| SearchHit {
            id: row.id,
            room_id: row.room_id,
            room_name: row.room_name,
            sender_id: row.sender_id,
            display_name: row.display_name.unwrap_or_else(|| row.username.clone()),
            username: row.username,
            content: row.content,
            message_type: MessageType::parse(&row.message_type).unwrap_or_default(),
            created_at: row.created_at,
        })
        .collect())
}

/// Soft-deletes one of the caller's own messages.
pub async fn delete_own_message(pool: &DbPool, user_id: i64, message_id: i64) -> Result<(), CoreError> {
    let message = huddle_db::messages::get_message(pool, message_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    if message.sender_id != user_id {
        return Err(CoreError::Forbidden);
    }
    if !huddle_db::messages::soft_delete_message(pool, message_id, user_id).await? {
        return Err(CoreError::NotFound);
    }
    Ok(())
}
