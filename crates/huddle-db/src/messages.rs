use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub message_type: String,
    pub reply_to_id: Option<i64>,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A message joined with its sender's public profile.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageWithSenderRow {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub message_type: String,
    pub reply_to_id: Option<i64>,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SearchResultRow {
    pub id: i64,
    pub room_id: i64,
    pub room_name: String,
    pub sender_id: i64,
    pub content: String,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessageRow<'a> {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub content: &'a str,
    pub message_type: &'a str,
    pub reply_to_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

const MESSAGE_WITH_SENDER_SELECT: &str =
    "SELECT m.id, m.room_id, m.sender_id, m.content, m.message_type, m.reply_to_id,
            m.edited_at, m.created_at, u.username, u.display_name
     FROM messages m
     INNER JOIN users u ON u.id = m.sender_id";

/// Inserts a message in a single statement. A reply target that does not exist
/// in the same room (or was deleted) makes the insert a no-op and yields `None`.
pub async fn create_message(
    pool: &DbPool,
    new: &NewMessageRow<'_>,
) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (id, room_id, sender_id, content, message_type, reply_to_id, created_at)
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
         WHERE ?6 IS NULL
            OR EXISTS (SELECT 1 FROM messages WHERE id = ?6 AND room_id = ?2 AND deleted = 0)
         RETURNING id, room_id, sender_id, content, message_type, reply_to_id, edited_at, created_at",
    )
    .bind(new.id)
    .bind(new.room_id)
    .bind(new.sender_id)
    .bind(new.content)
    .bind(new.message_type)
    .bind(new.reply_to_id)
    .bind(new.created_at)
    .fetch_optional(pool)
    .await?;

    if let Some(ref message) = row {
        if let Err(e) = crate::rooms::touch_room(pool, message.room_id, message.created_at).await {
            tracing::warn!(room_id = message.room_id, "failed to bump room activity: {e}");
        }
    }
    Ok(row)
}

pub async fn get_message(pool: &DbPool, id: i64) -> Result<Option<MessageWithSenderRow>, DbError> {
    let row = sqlx::query_as::<_, MessageWithSenderRow>(&format!(
        "{MESSAGE_WITH_SENDER_SELECT} WHERE m.id = ?1 AND m.deleted = 0"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Newest-first page of a room's history. Callers reverse it for display.
pub async fn get_room_messages(
    pool: &DbPool,
    room_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<MessageWithSenderRow>, DbError> {
    let rows = sqlx::query_as::<_, MessageWithSenderRow>(&format!(
        "{MESSAGE_WITH_SENDER_SELECT}
         WHERE m.room_id = ?1 AND m.deleted = 0
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ?2 OFFSET ?3"
    ))
    .bind(room_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_room_messages(pool: &DbPool, room_id: i64) -> Result<i64, DbError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE room_id = ?1 AND deleted = 0")
            .bind(room_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Only the sender may delete; returns `false` when nothing matched.
pub async fn soft_delete_message(pool: &DbPool, id: i64, sender_id: i64) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE messages SET deleted = 1 WHERE id = ?1 AND sender_id = ?2 AND deleted = 0",
    )
    .bind(id)
    .bind(sender_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Substring search across the rooms the user belongs to.
pub async fn search_messages(
    pool: &DbPool,
    user_id: i64,
    query: &str,
    room_id: Option<i64>,
    limit: i64,
) -> Result<Vec<SearchResultRow>, DbError> {
    let pattern = format!("%{}%", escape_like(query));
    let rows = sqlx::query_as::<_, SearchResultRow>(
        "SELECT m.id, m.room_id, r.name AS room_name, m.sender_id, m.content, m.message_type,
                m.created_at, u.username, u.display_name
         FROM messages m
         INNER JOIN users u ON u.id = m.sender_id
         INNER JOIN rooms r ON r.id = m.room_id
         INNER JOIN room_members rm ON rm.room_id = m.room_id AND rm.user_id = ?1
         WHERE m.deleted = 0
           AND m.content LIKE ?2 ESCAPE '\\'
           AND (?3 IS NULL OR m.room_id = ?3)
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ?4",
    )
    .bind(user_id)
    .bind(pattern)
    .bind(room_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
