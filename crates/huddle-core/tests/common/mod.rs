#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_core::auth::{AuthError, AuthService, Credentials};
use huddle_core::connection::Connection;
use huddle_core::dispatcher::Dispatcher;
use huddle_core::hub::RoomHub;
use huddle_core::outbound::{ConnectionHandle, OutboundReceiver};
use huddle_core::presence::PresenceRegistry;
use huddle_core::store::{MessageStore, NewMessage, StoreError};
use huddle_core::RealtimeConfig;
use huddle_models::gateway::ServerEvent;
use huddle_models::message::{DeliveredMessage, Message, MessageSender};
use huddle_models::room::{MemberRole, Room, RoomMember};
use huddle_models::user::UserIdentity;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const FUN_FRIDAY: i64 = 1;

#[derive(Default)]
struct Inner {
    users: HashMap<i64, UserIdentity>,
    rooms: BTreeMap<i64, Room>,
    members: BTreeSet<(i64, i64)>,
    messages: Vec<Message>,
    presence: HashMap<i64, (bool, DateTime<Utc>)>,
}

/// In-memory store with switchable failures.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    watched: Mutex<Option<ConnectionHandle>>,
    queued_at_write: Mutex<Vec<usize>>,
}

impl MemoryStore {
    pub fn add_user(&self, id: i64, username: &str) {
        self.inner
            .lock()
            .users
            .insert(id, UserIdentity::new(id, username, None));
    }

    pub fn add_room(&self, id: i64, name: &str) {
        self.inner.lock().rooms.insert(
            id,
            Room {
                id,
                name: name.to_string(),
                description: None,
                is_private: false,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn add_member(&self, room_id: i64, user_id: i64) {
        self.inner.lock().members.insert((room_id, user_id));
    }

    pub fn remove_member(&self, room_id: i64, user_id: i64) {
        self.inner.lock().members.remove(&(room_id, user_id));
    }

    pub fn message_count(&self, room_id: i64) -> usize {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .count()
    }

    pub fn presence_of(&self, user_id: i64) -> Option<bool> {
        self.inner.lock().presence.get(&user_id).map(|(online, _)| *online)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Records how many events `handle` has queued each time a message is
    /// written.
    pub fn watch_queue(&self, handle: ConnectionHandle) {
        *self.watched.lock() = Some(handle);
    }

    pub fn queued_at_write(&self) -> Vec<usize> {
        self.queued_at_write.lock().clone()
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("reads disabled".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn is_member(&self, room_id: i64, user_id: i64) -> Result<bool, StoreError> {
        self.check_reads()?;
        Ok(self.inner.lock().members.contains(&(room_id, user_id)))
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        if let Some(handle) = self.watched.lock().as_ref() {
            self.queued_at_write.lock().push(handle.queued());
        }
        let mut inner = self.inner.lock();
        let stored = Message {
            id: inner.messages.len() as i64 + 1000,
            room_id: message.room_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type: message.message_type,
            reply_to_id: message.reply_to_id,
            created_at: Utc::now(),
            edited_at: None,
        };
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn room_messages(
        &self,
        room_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeliveredMessage>, StoreError> {
        self.check_reads()?;
        let inner = self.inner.lock();
        let mut page: Vec<DeliveredMessage> = inner
            .messages
            .iter()
            .rev()
            .filter(|m| m.room_id == room_id)
            .skip(offset as usize)
            .take(limit as usize)
            .map(|m| {
                let sender = inner.users.get(&m.sender_id);
                DeliveredMessage {
                    message: m.clone(),
                    sender: MessageSender {
                        username: sender.map(|u| u.username.clone()).unwrap_or_default(),
                        display_name: sender.map(|u| u.display_name.clone()).unwrap_or_default(),
                    },
                }
            })
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn room_members(&self, room_id: i64) -> Result<Vec<RoomMember>, StoreError> {
        self.check_reads()?;
        Ok(self
            .inner
            .lock()
            .members
            .iter()
            .filter(|(room, _)| *room == room_id)
            .map(|(_, user_id)| RoomMember {
                user_id: *user_id,
                role: MemberRole::Member,
            })
            .collect())
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserIdentity>, StoreError> {
        self.check_reads()?;
        Ok(self.inner.lock().users.get(&user_id).cloned())
    }

    async fn rooms_for_user(&self, user_id: i64) -> Result<Vec<Room>, StoreError> {
        self.check_reads()?;
        let inner = self.inner.lock();
        Ok(inner
            .members
            .iter()
            .filter(|(_, member)| *member == user_id)
            .filter_map(|(room_id, _)| inner.rooms.get(room_id).cloned())
            .collect())
    }

    async fn record_presence(
        &self,
        user_id: i64,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.lock().presence.insert(user_id, (online, at));
        Ok(())
    }
}

/// Accepts tokens of the form `token-<user id>`.
pub struct StaticAuth;

#[async_trait]
impl AuthService for StaticAuth {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<UserIdentity, AuthError> {
        Err(AuthError::InvalidCredentials)
    }

    async fn validate_session_token(&self, token: &str) -> Option<i64> {
        token.strip_prefix("token-")?.parse().ok()
    }
}

/// Alice (1) and Bob (2) are members of room 1 "Fun Friday Group";
/// Carol (3) exists but belongs to no room.
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::default());
    store.add_user(1, "alice");
    store.add_user(2, "bob");
    store.add_user(3, "carol");
    store.add_room(FUN_FRIDAY, "Fun Friday Group");
    store.add_member(FUN_FRIDAY, 1);
    store.add_member(FUN_FRIDAY, 2);
    store
}

pub fn dispatcher(store: Arc<MemoryStore>, echo_to_sender: bool) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        store,
        Arc::new(RoomHub::new()),
        Arc::new(PresenceRegistry::new()),
        echo_to_sender,
    ))
}

pub fn config() -> RealtimeConfig {
    RealtimeConfig {
        typing_expiry: Duration::from_secs(2),
        outbound_queue_capacity: 16,
        ..RealtimeConfig::default()
    }
}

pub fn drain(rx: &mut OutboundReceiver) -> Vec<ServerEvent> {
    rx.drain().into_iter().map(|e| (*e).clone()).collect()
}

pub fn names(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

/// Opens, identifies and joins `rooms`, then discards the setup replies.
pub async fn connect(
    dispatcher: &Arc<Dispatcher>,
    config: &RealtimeConfig,
    user_id: i64,
    rooms: &[i64],
) -> (Connection, OutboundReceiver) {
    let (mut connection, mut rx) = Connection::open(dispatcher.clone(), config);
    connection
        .identify(&StaticAuth, &format!("token-{user_id}"))
        .await
        .expect("identify");
    for room_id in rooms {
        connection
            .handle_event(
                huddle_models::gateway::ClientEvent::JoinRoom { room_id: *room_id },
                tokio::time::Instant::now(),
            )
            .await;
    }
    drain(&mut rx);
    (connection, rx)
}
