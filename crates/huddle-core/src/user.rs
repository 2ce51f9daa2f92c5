use crate::auth::hash_password;
use crate::error::CoreError;
use crate::outbound::CloseReason;
use crate::presence::PresenceRegistry;
use chrono::Utc;
use huddle_db::DbPool;
use huddle_models::room::MemberRole;
use huddle_util::validation;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Create an account and enroll it in the default room.
pub async fn register(
    pool: &DbPool,
    worker_id: u16,
    input: &Registration,
) -> Result<huddle_db::users::UserRow, CoreError> {
    let username = input.username.trim();
    let email = input.email.trim();
    let display_name = input
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    validation::validate_username(username)?;
    validation::validate_email(email)?;
    validation::validate_password(&input.password)?;
    if let Some(name) = display_name {
        validation::validate_display_name(name)?;
    }

    if huddle_db::users::username_or_email_taken(pool, username, email).await? {
        return Err(CoreError::Conflict("username or email already registered".into()));
    }

    let hash = hash_password(&input.password)?;
    let id = huddle_util::snowflake::generate(worker_id);
    let user =
        huddle_db::users::create_user(pool, id, username, email, &hash, display_name, Utc::now())
            .await?;

    if let Some(room) = huddle_db::rooms::get_default_room(pool).await? {
        huddle_db::members::add_member(pool, room.id, user.id, MemberRole::Member.as_str(), Utc::now())
            .await?;
    } else {
        tracing::warn!(user_id = user.id, "no default room to enroll new user in");
    }

    tracing::info!(user_id = user.id, username = %user.username, "user registered");
    Ok(user)
}

/// Ends every live gateway connection of the user. Each connection runs its
/// normal close path, which announces the user offline and persists it once
/// the last one is gone. With nothing connected the flag is written here.
pub async fn logout(
    pool: &DbPool,
    presence: &PresenceRegistry,
    user_id: i64,
) -> Result<usize, CoreError> {
    let closed = presence.close_user_connections(user_id, CloseReason::Logout);
    if closed == 0 {
        huddle_db::users::set_presence(pool, user_id, false, Utc::now()).await?;
    }
    tracing::info!(user_id, connections = closed, "user logged out");
    Ok(closed)
}
