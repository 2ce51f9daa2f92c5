use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoomRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const ROOM_COLUMNS: &str = "id, name, description, is_private, created_by, created_at, updated_at";

pub async fn create_room(
    pool: &DbPool,
    id: i64,
    name: &str,
    description: Option<&str>,
    is_private: bool,
    created_by: Option<i64>,
    created_at: DateTime<Utc>,
) -> Result<RoomRow, DbError> {
    let row = sqlx::query_as::<_, RoomRow>(&format!(
        "INSERT INTO rooms (id, name, description, is_private, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         RETURNING {ROOM_COLUMNS}"
    ))
    .bind(id)
    .bind(name)
    .bind(description)
    .bind(is_private)
    .bind(created_by)
    .bind(created_at)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_room(pool: &DbPool, id: i64) -> Result<Option<RoomRow>, DbError> {
    let row = sqlx::query_as::<_, RoomRow>(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// The oldest room is the default room new accounts are enrolled in.
pub async fn get_default_room(pool: &DbPool) -> Result<Option<RoomRow>, DbError> {
    let row = sqlx::query_as::<_, RoomRow>(&format!(
        "SELECT {ROOM_COLUMNS} FROM rooms ORDER BY created_at ASC, id ASC LIMIT 1"
    ))
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Rooms the user belongs to, most recently active first.
pub async fn get_user_rooms(pool: &DbPool, user_id: i64) -> Result<Vec<RoomRow>, DbError> {
    let rows = sqlx::query_as::<_, RoomRow>(
        "SELECT r.id, r.name, r.description, r.is_private, r.created_by, r.created_at, r.updated_at
         FROM rooms r
         INNER JOIN room_members m ON m.room_id = r.id
         WHERE m.user_id = ?1
         ORDER BY r.updated_at DESC, r.id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn touch_room(pool: &DbPool, id: i64, at: DateTime<Utc>) -> Result<(), DbError> {
    sqlx::query("UPDATE rooms SET updated_at = ?2 WHERE id = ?1")
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_rooms(pool: &DbPool) -> Result<i64, DbError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rooms")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
