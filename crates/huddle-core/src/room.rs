use crate::error::CoreError;
use crate::hub::RoomHub;
use chrono::Utc;
use huddle_db::DbPool;
use huddle_models::gateway::ServerEvent;
use huddle_models::room::MemberRole;

pub const DEFAULT_ROOM_DESCRIPTION: &str = "Everyone starts here";

/// Returns the default room, creating it on a fresh database.
pub async fn ensure_default_room(
    pool: &DbPool,
    worker_id: u16,
    name: &str,
) -> Result<huddle_db::rooms::RoomRow, CoreError> {
    if let Some(room) = huddle_db::rooms::get_default_room(pool).await? {
        return Ok(room);
    }
    let id = huddle_util::snowflake::generate(worker_id);
    let room = huddle_db::rooms::create_room(
        pool,
        id,
        name,
        Some(DEFAULT_ROOM_DESCRIPTION),
        false,
        None,
        Utc::now(),
    )
    .await?;
    tracing::info!(room_id = room.id, name, "created default room");
    Ok(room)
}

/// Adds the user to a public room. A private room the caller is not in is
/// reported as not found.
pub async fn join_room(
    pool: &DbPool,
    user_id: i64,
    room_id: i64,
) -> Result<huddle_db::rooms::RoomRow, CoreError> {
    let room = huddle_db::rooms::get_room(pool, room_id)
        .await?
        .ok_or(CoreError::NotFound)?;

    if huddle_db::members::is_member(pool, room_id, user_id).await? {
        return Ok(room);
    }
    if room.is_private {
        return Err(CoreError::NotFound);
    }
    huddle_db::members::add_member(pool, room_id, user_id, MemberRole::Member.as_str(), Utc::now())
        .await?;
    Ok(room)
}

/// Revokes membership and drops the user's live subscriptions to the room.
pub async fn leave_room(
    pool: &DbPool,
    hub: &RoomHub,
    user_id: i64,
    room_id: i64,
) -> Result<(), CoreError> {
    if !huddle_db::members::remove_member(pool, room_id, user_id).await? {
        return Err(CoreError::NotFound);
    }
    let evicted = hub.evict_user(room_id, user_id);
    for handle in evicted {
        if let Err(e) = handle.deliver(std::sync::Arc::new(ServerEvent::RoomLeft { room_id })) {
            tracing::debug!(connection = %handle.id(), "room-left not queued: {e}");
        }
    }
    Ok(())
}
