use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemberWithUserRow {
    pub user_id: i64,
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Returns `true` when a new membership row was written.
pub async fn add_member(
    pool: &DbPool,
    room_id: i64,
    user_id: i64,
    role: &str,
    joined_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO room_members (room_id, user_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT DO NOTHING",
    )
    .bind(room_id)
    .bind(user_id)
    .bind(role)
    .bind(joined_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn remove_member(pool: &DbPool, room_id: i64, user_id: i64) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2")
        .bind(room_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn is_member(pool: &DbPool, room_id: i64, user_id: i64) -> Result<bool, DbError> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM room_members WHERE room_id = ?1 AND user_id = ?2",
    )
    .bind(room_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

pub async fn get_room_members(pool: &DbPool, room_id: i64) -> Result<Vec<MemberWithUserRow>, DbError> {
    let rows = sqlx::query_as::<_, MemberWithUserRow>(
        "SELECT m.user_id, m.role, m.joined_at,
                u.username, u.display_name, u.avatar_url, u.last_seen
         FROM room_members m
         INNER JOIN users u ON u.id = m.user_id
         WHERE m.room_id = ?1
         ORDER BY m.joined_at ASC, m.user_id ASC",
    )
    .bind(room_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
