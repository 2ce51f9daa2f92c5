//! Gateway wire protocol.
//!
//! Every frame is a JSON object `{"t": <event name>, "d": <payload>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{DeliveredMessage, MessageType};
use crate::room::Room;
use crate::user::UserIdentity;

/// WebSocket close code sent when identification fails or times out.
pub const CLOSE_AUTH_FAILED: u16 = 4004;
/// WebSocket close code sent when the connection is dropped for falling behind.
pub const CLOSE_UNHEALTHY: u16 = 4008;
/// WebSocket close code sent when no frame arrived within the idle timeout.
pub const CLOSE_IDLE_TIMEOUT: u16 = 4009;

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "kebab-case")]
pub enum ClientEvent {
    Identify {
        token: String,
    },
    Heartbeat,
    JoinRoom {
        #[serde(with = "crate::id")]
        room_id: i64,
    },
    LeaveRoom {
        #[serde(with = "crate::id")]
        room_id: i64,
    },
    SendMessage(SendMessage),
    TypingStart {
        #[serde(with = "crate::id")]
        room_id: i64,
    },
    TypingStop {
        #[serde(with = "crate::id")]
        room_id: i64,
    },
    /// Ends every live connection of the identified user.
    Logout,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::Heartbeat => "heartbeat",
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::SendMessage(_) => "send-message",
            Self::TypingStart { .. } => "typing-start",
            Self::TypingStop { .. } => "typing-stop",
            Self::Logout => "logout",
        }
    }
}

/// Payload of `send-message`. Timestamps are never accepted from clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    #[serde(with = "crate::id")]
    pub room_id: i64,
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default, with = "crate::id::option")]
    pub reply_to_id: Option<i64>,
    /// Client correlation token, echoed back in `message-error`.
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "kebab-case")]
pub enum ServerEvent {
    Hello {
        heartbeat_interval_ms: u64,
    },
    Ready {
        user: UserIdentity,
        rooms: Vec<Room>,
    },
    HeartbeatAck,
    RoomJoined {
        #[serde(with = "crate::id")]
        room_id: i64,
        #[serde(serialize_with = "crate::id::vec::serialize", skip_deserializing)]
        online_user_ids: Vec<i64>,
    },
    RoomLeft {
        #[serde(with = "crate::id")]
        room_id: i64,
    },
    NewMessage(DeliveredMessage),
    UserOnline {
        #[serde(with = "crate::id")]
        user_id: i64,
        username: String,
    },
    UserOffline {
        #[serde(with = "crate::id")]
        user_id: i64,
        username: String,
        last_seen: DateTime<Utc>,
    },
    UserTyping {
        #[serde(with = "crate::id")]
        room_id: i64,
        #[serde(with = "crate::id")]
        user_id: i64,
        username: String,
        is_typing: bool,
    },
    MessageError(MessageError),
}

impl ServerEvent {
    /// Ephemeral signals that may be discarded when a subscriber's queue is
    /// full. Chat messages and errors are never droppable.
    pub fn is_droppable(&self) -> bool {
        matches!(
            self,
            Self::UserTyping { .. } | Self::UserOnline { .. } | Self::UserOffline { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Ready { .. } => "ready",
            Self::HeartbeatAck => "heartbeat-ack",
            Self::RoomJoined { .. } => "room-joined",
            Self::RoomLeft { .. } => "room-left",
            Self::NewMessage(_) => "new-message",
            Self::UserOnline { .. } => "user-online",
            Self::UserOffline { .. } => "user-offline",
            Self::UserTyping { .. } => "user-typing",
            Self::MessageError(_) => "message-error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthFailed,
    Forbidden,
    EmptyMessage,
    ValidationError,
    NotFound,
    StoreUnavailable,
    RateLimited,
    InvalidPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, with = "crate::id::option", skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}
