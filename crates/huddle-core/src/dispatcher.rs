//! Inbound chat actions: authorize, persist, then fan out.

use crate::error::CoreError;
use crate::hub::RoomHub;
use crate::outbound::ConnectionId;
use crate::presence::PresenceRegistry;
use crate::store::{MessageStore, NewMessage};
use huddle_models::gateway::{SendMessage, ServerEvent};
use huddle_models::message::{DeliveredMessage, MessageSender};
use huddle_models::room::{Room, RoomMember};
use huddle_models::user::UserIdentity;
use huddle_util::validation::validate_message_content;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;

const ORDERING_SHARDS: usize = 64;

pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    hub: Arc<RoomHub>,
    presence: Arc<PresenceRegistry>,
    echo_to_sender: bool,
    /// Held across persist + broadcast so two sends from the same sender to
    /// the same room reach subscribers in submission order.
    ordering: Vec<Mutex<()>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        hub: Arc<RoomHub>,
        presence: Arc<PresenceRegistry>,
        echo_to_sender: bool,
    ) -> Self {
        Self {
            store,
            hub,
            presence,
            echo_to_sender,
            ordering: (0..ORDERING_SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    fn ordering_lock(&self, room_id: i64, sender_id: i64) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        (room_id, sender_id).hash(&mut hasher);
        &self.ordering[(hasher.finish() as usize) % self.ordering.len()]
    }

    /// Validates, re-checks membership against the store, persists, and only
    /// then broadcasts `new-message` to the room. Nothing is broadcast unless
    /// the store confirmed the write.
    ///
    /// `origin` is the sending connection, if any; it is excluded from the
    /// fan-out only when echo is disabled.
    pub async fn send_message(
        &self,
        sender: &UserIdentity,
        origin: Option<ConnectionId>,
        request: SendMessage,
    ) -> Result<Arc<DeliveredMessage>, CoreError> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(CoreError::EmptyMessage);
        }
        validate_message_content(content)?;

        let room_id = request.room_id;
        let _order = self.ordering_lock(room_id, sender.id).lock().await;

        if !self.store.is_member(room_id, sender.id).await? {
            tracing::debug!(room_id, user_id = sender.id, "send rejected: not a member");
            return Err(CoreError::Forbidden);
        }

        let message = self
            .store
            .create_message(NewMessage {
                room_id,
                sender_id: sender.id,
                content: content.to_string(),
                message_type: request.message_type,
                reply_to_id: request.reply_to_id,
            })
            .await
            .map_err(|e| {
                tracing::warn!(room_id, user_id = sender.id, "message persist failed: {e}");
                CoreError::from(e)
            })?;

        let delivered = DeliveredMessage {
            message,
            sender: MessageSender {
                username: sender.username.clone(),
                display_name: sender.display_name.clone(),
            },
        };
        let exclude = if self.echo_to_sender { None } else { origin };
        let report = self
            .hub
            .broadcast(room_id, ServerEvent::NewMessage(delivered.clone()), exclude);
        tracing::debug!(
            room_id,
            message_id = delivered.message.id,
            delivered = report.delivered,
            dead = report.dead,
            "message dispatched"
        );
        Ok(Arc::new(delivered))
    }

    /// Membership is authoritative in the store; there is no cache to go stale.
    pub async fn authorize_join(&self, user_id: i64, room_id: i64) -> Result<(), CoreError> {
        if self.store.is_member(room_id, user_id).await? {
            Ok(())
        } else {
            Err(CoreError::Forbidden)
        }
    }

    pub async fn room_history(
        &self,
        user_id: i64,
        room_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeliveredMessage>, CoreError> {
        self.authorize_join(user_id, room_id).await?;
        Ok(self.store.room_messages(room_id, limit, offset).await?)
    }

    pub async fn room_members(
        &self,
        user_id: i64,
        room_id: i64,
    ) -> Result<Vec<RoomMember>, CoreError> {
        self.authorize_join(user_id, room_id).await?;
        Ok(self.store.room_members(room_id).await?)
    }

    pub async fn rooms_for_user(&self, user_id: i64) -> Result<Vec<Room>, CoreError> {
        Ok(self.store.rooms_for_user(user_id).await?)
    }
}
