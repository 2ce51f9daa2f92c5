use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, display_name, avatar_url, is_online, last_seen, created_at";

pub async fn create_user(
    pool: &DbPool,
    id: i64,
    username: &str,
    email: &str,
    password_hash: &str,
    display_name: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<UserRow, DbError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "INSERT INTO users (id, username, email, password_hash, display_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         RETURNING {USER_COLUMNS}"
    ))
    .bind(id)
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(display_name)
    .bind(created_at)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_user_by_id(pool: &DbPool, id: i64) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Login accepts either the username or the email address.
pub async fn get_user_by_login(pool: &DbPool, login: &str) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE username = ?1 OR LOWER(email) = LOWER(?1)
         LIMIT 1"
    ))
    .bind(login)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn username_or_email_taken(
    pool: &DbPool,
    username: &str,
    email: &str,
) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM users WHERE username = ?1 OR LOWER(email) = LOWER(?2)",
    )
    .bind(username)
    .bind(email)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

pub async fn set_presence(
    pool: &DbPool,
    id: i64,
    online: bool,
    last_seen: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1")
        .bind(id)
        .bind(online)
        .bind(last_seen)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Clears stale online flags left behind by an unclean shutdown.
pub async fn reset_presence(pool: &DbPool) -> Result<u64, DbError> {
    let result = sqlx::query("UPDATE users SET is_online = 0 WHERE is_online = 1")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
