//! A live gateway connection: the session state machine wired to the hub,
//! the presence registry and the store. Transport code feeds it decoded
//! client events and drains its outbound queue.

use crate::auth::AuthService;
use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::outbound::{self, CloseReason, ConnectionHandle, ConnectionId, OutboundReceiver};
use crate::presence::PresenceTransition;
use crate::session::{Session, SessionEffect, SessionInput};
use crate::RealtimeConfig;
use chrono::{DateTime, Utc};
use huddle_models::gateway::{ClientEvent, ErrorCode, MessageError, ServerEvent};
use huddle_models::user::UserIdentity;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;

pub struct Connection {
    dispatcher: Arc<Dispatcher>,
    session: Session,
    handle: ConnectionHandle,
    /// Rooms whose subscribers hear this user's presence changes: every room
    /// the user belonged to at identify time plus any joined since.
    presence_rooms: BTreeSet<i64>,
}

impl Connection {
    pub fn open(dispatcher: Arc<Dispatcher>, config: &RealtimeConfig) -> (Self, OutboundReceiver) {
        let (handle, receiver) = outbound::channel(config.outbound_queue_capacity);
        let connection = Self {
            dispatcher,
            session: Session::new(config.typing_expiry),
            handle,
            presence_rooms: BTreeSet::new(),
        };
        (connection, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn identity(&self) -> Option<&UserIdentity> {
        self.session.identity()
    }

    pub fn next_typing_deadline(&self) -> Option<Instant> {
        self.session.next_typing_deadline()
    }

    /// Sends an event to this connection only.
    pub fn reply(&self, event: ServerEvent) {
        if let Err(e) = self.handle.deliver(Arc::new(event)) {
            tracing::debug!(connection = %self.id(), "reply not queued: {e}");
        }
    }

    /// Resolves the token to a user, registers presence and queues `ready`.
    /// On failure the session is closed and the reason queued for the client.
    pub async fn identify(
        &mut self,
        auth: &dyn AuthService,
        token: &str,
    ) -> Result<UserIdentity, CoreError> {
        let Some(user_id) = auth.validate_session_token(token).await else {
            self.apply(SessionInput::AuthenticationFailed);
            return Err(crate::auth::AuthError::InvalidToken.into());
        };

        let store = self.dispatcher.store().clone();
        let resolved = async {
            let identity = store.user_by_id(user_id).await?;
            let rooms = store.rooms_for_user(user_id).await?;
            Ok::<_, crate::store::StoreError>(identity.map(|identity| (identity, rooms)))
        }
        .await;

        let (identity, rooms) = match resolved {
            Ok(Some(found)) => found,
            Ok(None) => {
                self.apply(SessionInput::AuthenticationFailed);
                return Err(crate::auth::AuthError::InvalidToken.into());
            }
            Err(e) => {
                tracing::warn!(user_id, "identify failed: {e}");
                let err = CoreError::from(e);
                self.reply(ServerEvent::MessageError(err.to_client(None, None)));
                self.close(CloseReason::ServerError);
                return Err(err);
            }
        };

        self.presence_rooms = rooms.iter().map(|room| room.id).collect();
        self.apply(SessionInput::Authenticated(identity.clone()));
        self.reply(ServerEvent::Ready {
            user: identity.clone(),
            rooms,
        });
        tracing::info!(connection = %self.id(), user_id, "session identified");
        Ok(identity)
    }

    /// Catches the session up with changes made from outside this
    /// connection: a closed outbound queue (logout, overflow) closes the
    /// session, and rooms the hub evicted it from are left.
    pub fn sync(&mut self) {
        if self.session.is_closed() {
            return;
        }
        if let Some(reason) = self.handle.close_reason() {
            self.close(reason);
            return;
        }
        let hub = self.dispatcher.hub().clone();
        let evicted: Vec<i64> = self
            .session
            .rooms()
            .filter(|room_id| !hub.is_subscribed(*room_id, self.id()))
            .collect();
        for room_id in evicted {
            tracing::debug!(connection = %self.id(), room_id, "dropping evicted room");
            self.apply(SessionInput::Leave(room_id));
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent, now: Instant) {
        self.sync();
        if self.session.is_closed() {
            return;
        }
        let Some(user) = self.session.identity().cloned() else {
            self.reply(ServerEvent::MessageError(MessageError {
                code: ErrorCode::AuthFailed,
                message: "identify first".into(),
                room_id: None,
                nonce: None,
            }));
            return;
        };
        self.dispatcher.presence().touch(user.id);

        match event {
            ClientEvent::Identify { .. } => self.reply(ServerEvent::MessageError(MessageError {
                code: ErrorCode::InvalidPayload,
                message: "already identified".into(),
                room_id: None,
                nonce: None,
            })),
            ClientEvent::Heartbeat => self.reply(ServerEvent::HeartbeatAck),
            ClientEvent::JoinRoom { room_id } => {
                match self.dispatcher.authorize_join(user.id, room_id).await {
                    Ok(()) => {
                        self.presence_rooms.insert(room_id);
                        self.apply(SessionInput::JoinAuthorized(room_id));
                        let online_user_ids = self.dispatcher.hub().online_user_ids(room_id);
                        self.reply(ServerEvent::RoomJoined {
                            room_id,
                            online_user_ids,
                        });
                    }
                    Err(err) => self.apply(SessionInput::JoinRejected {
                        room_id,
                        error: err.to_client(Some(room_id), None),
                    }),
                }
            }
            ClientEvent::LeaveRoom { room_id } => {
                if self.session.is_joined(room_id) {
                    self.apply(SessionInput::Leave(room_id));
                    self.reply(ServerEvent::RoomLeft { room_id });
                }
            }
            ClientEvent::SendMessage(request) => {
                let room_id = request.room_id;
                let nonce = request.nonce.clone();
                if !self.session.is_joined(room_id) {
                    self.reply(ServerEvent::MessageError(
                        CoreError::Forbidden.to_client(Some(room_id), nonce),
                    ));
                    return;
                }
                match self
                    .dispatcher
                    .send_message(&user, Some(self.id()), request)
                    .await
                {
                    Ok(_) => self.apply(SessionInput::MessageSent(room_id)),
                    Err(err) => {
                        self.reply(ServerEvent::MessageError(err.to_client(Some(room_id), nonce)))
                    }
                }
            }
            ClientEvent::TypingStart { room_id } => {
                self.apply(SessionInput::TypingStart { room_id, now })
            }
            ClientEvent::TypingStop { room_id } => self.apply(SessionInput::TypingStop(room_id)),
            ClientEvent::Logout => {
                let closed = self
                    .dispatcher
                    .presence()
                    .close_user_connections(user.id, CloseReason::Logout);
                tracing::info!(user_id = user.id, connections = closed, "user logged out");
                self.close(CloseReason::Logout);
            }
        }
    }

    pub fn expire_typing(&mut self, now: Instant) {
        self.sync();
        self.apply(SessionInput::TypingDeadline(now));
    }

    /// Releases every subscription, presence registration and typing state.
    /// Safe to call more than once.
    pub fn close(&mut self, reason: CloseReason) {
        if !self.session.is_closed() {
            tracing::info!(connection = %self.id(), reason = reason.as_str(), "session closing");
        }
        self.apply(SessionInput::Close(reason));
    }

    fn apply(&mut self, input: SessionInput) {
        for effect in self.session.apply(input) {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: SessionEffect) {
        let hub = self.dispatcher.hub().clone();
        let presence = self.dispatcher.presence().clone();
        // Identity survives close, so cleanup effects can still name the user.
        let user = self.session.identity().cloned();

        match (effect, user) {
            (SessionEffect::Reject(error), _) => self.reply(ServerEvent::MessageError(error)),
            (SessionEffect::CloseTransport(reason), _) => self.handle.close(reason),
            // Announced under the presence entry lock so a tab closing while
            // another opens cannot reach peers as online-then-offline.
            (SessionEffect::RegisterPresence, Some(user)) => {
                let rooms: Vec<i64> = self.presence_rooms.iter().copied().collect();
                let transition = presence.register_connection_with(user.id, &self.handle, |_| {
                    hub.broadcast_to_rooms(
                        &rooms,
                        ServerEvent::UserOnline {
                            user_id: user.id,
                            username: user.username.clone(),
                        },
                        Some(user.id),
                    );
                });
                if let Some(PresenceTransition::Online { .. }) = transition {
                    self.persist_presence(user.id, true, Utc::now());
                }
            }
            (SessionEffect::UnregisterPresence, Some(user)) => {
                let rooms: Vec<i64> = self.presence_rooms.iter().copied().collect();
                let transition = presence.unregister_connection_with(user.id, self.id(), |t| {
                    if let PresenceTransition::Offline { last_seen, .. } = t {
                        hub.broadcast_to_rooms(
                            &rooms,
                            ServerEvent::UserOffline {
                                user_id: user.id,
                                username: user.username.clone(),
                                last_seen: *last_seen,
                            },
                            Some(user.id),
                        );
                    }
                });
                if let Some(PresenceTransition::Offline { last_seen, .. }) = transition {
                    self.persist_presence(user.id, false, last_seen);
                }
            }
            (SessionEffect::Subscribe(room_id), Some(user)) => {
                hub.join(room_id, self.handle.clone(), user.id);
            }
            (SessionEffect::Unsubscribe(room_id), _) => {
                hub.leave(room_id, self.id());
            }
            (SessionEffect::Typing { room_id, is_typing }, Some(user)) => {
                hub.broadcast(
                    room_id,
                    ServerEvent::UserTyping {
                        room_id,
                        user_id: user.id,
                        username: user.username,
                        is_typing,
                    },
                    Some(self.id()),
                );
            }
            (effect, None) => {
                tracing::debug!(connection = %self.id(), ?effect, "effect skipped without identity");
            }
        }
    }

    /// Best-effort write of the aggregate online flag. Skipped if the user's
    /// state flipped again before the write ran.
    fn persist_presence(&self, user_id: i64, online: bool, at: DateTime<Utc>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.dispatcher.store().clone();
        let presence = self.dispatcher.presence().clone();
        runtime.spawn(async move {
            if presence.is_online(user_id) != online {
                return;
            }
            if let Err(e) = store.record_presence(user_id, online, at).await {
                tracing::warn!(user_id, online, "failed to persist presence: {e}");
            }
        });
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.session.is_closed() {
            self.close(CloseReason::TransportError("connection dropped".into()));
        }
    }
}
