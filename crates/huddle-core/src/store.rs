//! The persistence seam used by the realtime core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_db::DbPool;
use huddle_models::message::{DeliveredMessage, Message, MessageSender, MessageType};
use huddle_models::room::{MemberRole, Room, RoomMember};
use huddle_models::user::UserIdentity;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("reply target not found")]
    InvalidReply,
}

impl From<huddle_db::DbError> for StoreError {
    fn from(err: huddle_db::DbError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// A message about to be persisted. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<i64>,
}

/// Durable storage for rooms, memberships and messages.
///
/// `create_message` is the only write on the send path and must be atomic:
/// either the message is durable and returned, or nothing was written.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    async fn is_member(&self, room_id: i64, user_id: i64) -> Result<bool, StoreError>;

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// A page of history in chronological order. `offset` counts back from
    /// the newest message.
    async fn room_messages(
        &self,
        room_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeliveredMessage>, StoreError>;

    async fn room_members(&self, room_id: i64) -> Result<Vec<RoomMember>, StoreError>;

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserIdentity>, StoreError>;

    async fn rooms_for_user(&self, user_id: i64) -> Result<Vec<Room>, StoreError>;

    async fn record_presence(
        &self,
        user_id: i64,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// [`MessageStore`] over the SQLite pool.
#[derive(Clone)]
pub struct SqlStore {
    db: DbPool,
    worker_id: u16,
}

impl SqlStore {
    pub fn new(db: DbPool, worker_id: u16) -> Self {
        Self { db, worker_id }
    }
}

pub(crate) fn room_from_row(row: huddle_db::rooms::RoomRow) -> Room {
    Room {
        id: row.id,
        name: row.name,
        description: row.description,
        is_private: row.is_private,
        updated_at: row.updated_at,
    }
}

pub(crate) fn message_from_row(row: huddle_db::messages::MessageRow) -> Message {
    Message {
        id: row.id,
        room_id: row.room_id,
        sender_id: row.sender_id,
        content: row.content,
        message_type: MessageType::parse(&row.message_type).unwrap_or_default(),
        reply_to_id: row.reply_to_id,
        created_at: row.created_at,
        edited_at: row.edited_at,
    }
}

pub(crate) fn delivered_from_row(row: huddle_db::messages::MessageWithSenderRow) -> DeliveredMessage {
    let sender = UserIdentity::new(row.sender_id, row.username, row.display_name);
    DeliveredMessage {
        message: Message {
            id: row.id,
            room_id: row.room_id,
            sender_id: row.sender_id,
            content: row.content,
            message_type: MessageType::parse(&row.message_type).unwrap_or_default(),
            reply_to_id: row.reply_to_id,
            created_at: row.created_at,
            edited_at: row.edited_at,
        },
        sender: MessageSender {
            username: sender.username,
            display_name: sender.display_name,
        },
    }
}

#[async_trait]
impl MessageStore for SqlStore {
    async fn is_member(&self, room_id: i64, user_id: i64) -> Result<bool, StoreError> {
        Ok(huddle_db::members::is_member(&self.db, room_id, user_id).await?)
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let id = huddle_util::snowflake::generate(self.worker_id);
        let row = huddle_db::messages::create_message(
            &self.db,
            &huddle_db::messages::NewMessageRow {
                id,
                room_id: message.room_id,
                sender_id: message.sender_id,
                content: &message.content,
                message_type: message.message_type.as_str(),
                reply_to_id: message.reply_to_id,
                created_at: Utc::now(),
            },
        )
        .await?
        .ok_or(StoreError::InvalidReply)?;
        Ok(message_from_row(row))
    }

    async fn room_messages(
        &self,
        room_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeliveredMessage>, StoreError> {
        let rows = huddle_db::messages::get_room_messages(&self.db, room_id, limit, offset).await?;
        Ok(rows.into_iter().rev().map(delivered_from_row).collect())
    }

    async fn room_members(&self, room_id: i64) -> Result<Vec<RoomMember>, StoreError> {
        let rows = huddle_db::members::get_room_members(&self.db, room_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| RoomMember {
                user_id: row.user_id,
                role: MemberRole::parse(&row.role),
            })
            .collect())
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserIdentity>, StoreError> {
        let row = huddle_db::users::get_user_by_id(&self.db, user_id).await?;
        Ok(row.map(|u| UserIdentity::new(u.id, u.username, u.display_name)))
    }

    async fn rooms_for_user(&self, user_id: i64) -> Result<Vec<Room>, StoreError> {
        let rows = huddle_db::rooms::get_user_rooms(&self.db, user_id).await?;
        Ok(rows.into_iter().map(room_from_row).collect())
    }

    async fn record_presence(
        &self,
        user_id: i64,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        huddle_db::users::set_presence(&self.db, user_id, online, at).await?;
        Ok(())
    }
}
