//! Per-connection protocol state machine.
//!
//! `Session` owns no I/O. Each input yields the effects the caller must
//! carry out against the hub, the presence registry and the transport, which
//! keeps every transition testable without a socket.

use crate::outbound::CloseReason;
use huddle_models::gateway::{ErrorCode, MessageError};
use huddle_models::user::UserIdentity;
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    /// Authenticated with at least one room subscription.
    Joined,
    Closed(CloseReason),
}

#[derive(Debug, Clone)]
pub enum SessionInput {
    Authenticated(UserIdentity),
    AuthenticationFailed,
    JoinAuthorized(i64),
    JoinRejected { room_id: i64, error: MessageError },
    Leave(i64),
    TypingStart { room_id: i64, now: Instant },
    TypingStop(i64),
    MessageSent(i64),
    TypingDeadline(Instant),
    Close(CloseReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    RegisterPresence,
    Subscribe(i64),
    Unsubscribe(i64),
    Typing { room_id: i64, is_typing: bool },
    Reject(MessageError),
    UnregisterPresence,
    CloseTransport(CloseReason),
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    identity: Option<UserIdentity>,
    rooms: BTreeSet<i64>,
    typing: BTreeMap<i64, Instant>,
    typing_expiry: Duration,
}

impl Session {
    pub fn new(typing_expiry: Duration) -> Self {
        Self {
            state: SessionState::Connecting,
            identity: None,
            rooms: BTreeSet::new(),
            typing: BTreeMap::new(),
            typing_expiry,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    pub fn rooms(&self) -> impl Iterator<Item = i64> + '_ {
        self.rooms.iter().copied()
    }

    pub fn is_joined(&self, room_id: i64) -> bool {
        self.rooms.contains(&room_id)
    }

    pub fn is_typing(&self, room_id: i64) -> bool {
        self.typing.contains_key(&room_id)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed(_))
    }

    /// Earliest pending typing expiry, for the driver's timer.
    pub fn next_typing_deadline(&self) -> Option<Instant> {
        self.typing.values().min().copied()
    }

    pub fn apply(&mut self, input: SessionInput) -> Vec<SessionEffect> {
        if self.is_closed() {
            return Vec::new();
        }

        match input {
            SessionInput::Close(reason) => self.close(reason),
            SessionInput::Authenticated(identity) => {
                if self.state != SessionState::Connecting {
                    return Vec::new();
                }
                self.identity = Some(identity);
                self.state = SessionState::Authenticated;
                vec![SessionEffect::RegisterPresence]
            }
            SessionInput::AuthenticationFailed => {
                if self.state != SessionState::Connecting {
                    return Vec::new();
                }
                let mut effects = vec![SessionEffect::Reject(MessageError {
                    code: ErrorCode::AuthFailed,
                    message: "authentication failed".into(),
                    room_id: None,
                    nonce: None,
                })];
                effects.extend(self.close(CloseReason::AuthFailed));
                effects
            }
            // Everything below requires an identity.
            _ if self.state == SessionState::Connecting => Vec::new(),
            // Always resubscribe: the hub may have dropped this connection
            // behind the session's back, and hub joins are idempotent.
            SessionInput::JoinAuthorized(room_id) => {
                self.state = SessionState::Joined;
                self.rooms.insert(room_id);
                vec![SessionEffect::Subscribe(room_id)]
            }
            SessionInput::JoinRejected { error, .. } => vec![SessionEffect::Reject(error)],
            SessionInput::Leave(room_id) => {
                if !self.rooms.remove(&room_id) {
                    return Vec::new();
                }
                let mut effects = Vec::new();
                if self.typing.remove(&room_id).is_some() {
                    effects.push(SessionEffect::Typing {
                        room_id,
                        is_typing: false,
                    });
                }
                effects.push(SessionEffect::Unsubscribe(room_id));
                if self.rooms.is_empty() {
                    self.state = SessionState::Authenticated;
                }
                effects
            }
            SessionInput::TypingStart { room_id, now } => {
                if !self.rooms.contains(&room_id) {
                    return Vec::new();
                }
                let deadline = now + self.typing_expiry;
                match self.typing.insert(room_id, deadline) {
                    Some(_) => Vec::new(),
                    None => vec![SessionEffect::Typing {
                        room_id,
                        is_typing: true,
                    }],
                }
            }
            SessionInput::TypingStop(room_id) | SessionInput::MessageSent(room_id) => {
                match self.typing.remove(&room_id) {
                    Some(_) => vec![SessionEffect::Typing {
                        room_id,
                        is_typing: false,
                    }],
                    None => Vec::new(),
                }
            }
            SessionInput::TypingDeadline(now) => {
                let expired: Vec<i64> = self
                    .typing
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(room_id, _)| *room_id)
                    .collect();
                expired
                    .into_iter()
                    .map(|room_id| {
                        self.typing.remove(&room_id);
                        SessionEffect::Typing {
                            room_id,
                            is_typing: false,
                        }
                    })
                    .collect()
            }
        }
    }

    fn close(&mut self, reason: CloseReason) -> Vec<SessionEffect> {
        let mut effects: Vec<SessionEffect> = std::mem::take(&mut self.typing)
            .into_keys()
            .map(|room_id| SessionEffect::Typing {
                room_id,
                is_typing: false,
            })
            .collect();
        effects.extend(
            std::mem::take(&mut self.rooms)
                .into_iter()
                .map(SessionEffect::Unsubscribe),
        );
        if self.identity.is_some() {
            effects.push(SessionEffect::UnregisterPresence);
        }
        effects.push(SessionEffect::CloseTransport(reason.clone()));
        self.state = SessionState::Closed(reason);
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPIRY: Duration = Duration::from_secs(2);

    fn identity() -> UserIdentity {
        UserIdentity::new(1, "alice", None)
    }

    fn joined(rooms: &[i64]) -> Session {
        let mut session = Session::new(EXPIRY);
        session.apply(SessionInput::Authenticated(identity()));
        for room in rooms {
            session.apply(SessionInput::JoinAuthorized(*room));
        }
        session
    }

    #[test]
    fn authentication_registers_presence() {
        let mut session = Session::new(EXPIRY);
        let effects = session.apply(SessionInput::Authenticated(identity()));
        assert_eq!(effects, vec![SessionEffect::RegisterPresence]);
        assert_eq!(session.state(), &SessionState::Authenticated);
        assert!(session.apply(SessionInput::Authenticated(identity())).is_empty());
    }

    #[test]
    fn failed_authentication_rejects_and_closes() {
        let mut session = Session::new(EXPIRY);
        let effects = session.apply(SessionInput::AuthenticationFailed);
        assert!(matches!(&effects[0], SessionEffect::Reject(e) if e.code == ErrorCode::AuthFailed));
        assert_eq!(
            effects.last(),
            Some(&SessionEffect::CloseTransport(CloseReason::AuthFailed))
        );
        assert!(!effects.contains(&SessionEffect::UnregisterPresence));
        assert!(session.is_closed());
    }

    #[test]
    fn events_before_authentication_are_ignored() {
        let mut session = Session::new(EXPIRY);
        assert!(session.apply(SessionInput::JoinAuthorized(1)).is_empty());
        assert!(session
            .apply(SessionInput::TypingStart { room_id: 1, now: Instant::now() })
            .is_empty());
        assert_eq!(session.state(), &SessionState::Connecting);
    }

    #[test]
    fn repeated_join_resubscribes_and_leave_returns_to_authenticated() {
        let mut session = joined(&[]);
        assert_eq!(
            session.apply(SessionInput::JoinAuthorized(5)),
            vec![SessionEffect::Subscribe(5)]
        );
        assert_eq!(
            session.apply(SessionInput::JoinAuthorized(5)),
            vec![SessionEffect::Subscribe(5)]
        );
        assert_eq!(session.rooms().collect::<Vec<_>>(), vec![5]);
        assert_eq!(session.state(), &SessionState::Joined);

        assert_eq!(
            session.apply(SessionInput::Leave(5)),
            vec![SessionEffect::Unsubscribe(5)]
        );
        assert_eq!(session.state(), &SessionState::Authenticated);
        assert!(session.apply(SessionInput::Leave(5)).is_empty());
    }

    #[test]
    fn typing_in_unjoined_room_is_ignored() {
        let mut session = joined(&[1]);
        let now = Instant::now();
        assert!(session
            .apply(SessionInput::TypingStart { room_id: 2, now })
            .is_empty());
        assert!(session.next_typing_deadline().is_none());
    }

    #[test]
    fn typing_start_refreshes_deadline_without_repeating() {
        let mut session = joined(&[1]);
        let now = Instant::now();
        assert_eq!(
            session.apply(SessionInput::TypingStart { room_id: 1, now }),
            vec![SessionEffect::Typing { room_id: 1, is_typing: true }]
        );
        let later = now + Duration::from_secs(1);
        assert!(session
            .apply(SessionInput::TypingStart { room_id: 1, now: later })
            .is_empty());
        assert_eq!(session.next_typing_deadline(), Some(later + EXPIRY));
    }

    #[test]
    fn typing_expires_after_deadline() {
        let mut session = joined(&[1, 2]);
        let now = Instant::now();
        session.apply(SessionInput::TypingStart { room_id: 1, now });
        session.apply(SessionInput::TypingStart {
            room_id: 2,
            now: now + Duration::from_secs(1),
        });

        assert!(session
            .apply(SessionInput::TypingDeadline(now + Duration::from_millis(1999)))
            .is_empty());
        assert_eq!(
            session.apply(SessionInput::TypingDeadline(now + EXPIRY)),
            vec![SessionEffect::Typing { room_id: 1, is_typing: false }]
        );
        assert!(session.is_typing(2));
        assert!(!session.is_typing(1));
    }

    #[test]
    fn sending_a_message_clears_typing() {
        let mut session = joined(&[1]);
        session.apply(SessionInput::TypingStart { room_id: 1, now: Instant::now() });
        assert_eq!(
            session.apply(SessionInput::MessageSent(1)),
            vec![SessionEffect::Typing { room_id: 1, is_typing: false }]
        );
        assert!(session.apply(SessionInput::MessageSent(1)).is_empty());
        assert!(session.apply(SessionInput::TypingStop(1)).is_empty());
    }

    #[test]
    fn close_releases_everything_once() {
        let mut session = joined(&[1, 2]);
        session.apply(SessionInput::TypingStart { room_id: 2, now: Instant::now() });

        let effects = session.apply(SessionInput::Close(CloseReason::ClientClosed));
        assert_eq!(
            effects,
            vec![
                SessionEffect::Typing { room_id: 2, is_typing: false },
                SessionEffect::Unsubscribe(1),
                SessionEffect::Unsubscribe(2),
                SessionEffect::UnregisterPresence,
                SessionEffect::CloseTransport(CloseReason::ClientClosed),
            ]
        );
        assert_eq!(session.rooms().count(), 0);
        assert!(session.next_typing_deadline().is_none());
        assert!(session
            .apply(SessionInput::Close(CloseReason::IdleTimeout))
            .is_empty());
        assert!(session.apply(SessionInput::JoinAuthorized(3)).is_empty());
    }

    #[test]
    fn close_before_authentication_only_closes_transport() {
        let mut session = Session::new(EXPIRY);
        assert_eq!(
            session.apply(SessionInput::Close(CloseReason::IdleTimeout)),
            vec![SessionEffect::CloseTransport(CloseReason::IdleTimeout)]
        );
    }
}
