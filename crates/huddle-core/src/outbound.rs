//! Per-connection outbound queues.
//!
//! Producers never block: a full queue first sheds ephemeral events
//! (typing, presence). If only chat messages are queued the connection is
//! marked unhealthy and closed instead of silently losing a message.

use huddle_models::gateway::ServerEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    AuthFailed,
    IdleTimeout,
    /// The outbound queue overflowed with undroppable events.
    Unhealthy,
    TransportError(String),
    ServerError,
    Shutdown,
    /// The user logged out; every connection of theirs is closed.
    Logout,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::AuthFailed => "auth_failed",
            Self::IdleTimeout => "idle_timeout",
            Self::Unhealthy => "unhealthy",
            Self::TransportError(_) => "transport_error",
            Self::ServerError => "server_error",
            Self::Shutdown => "shutdown",
            Self::Logout => "logout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// An ephemeral event was discarded because the queue was full.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("outbound queue overflow")]
    Overflow,
}

struct QueueState {
    events: VecDeque<Arc<ServerEvent>>,
    closed: Option<CloseReason>,
    discarded: u64,
}

struct Shared {
    id: ConnectionId,
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

/// The sending half of a connection's outbound queue. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

/// The receiving half, owned by the connection's writer loop.
pub struct OutboundReceiver {
    shared: Arc<Shared>,
}

pub fn channel(capacity: usize) -> (ConnectionHandle, OutboundReceiver) {
    let shared = Arc::new(Shared {
        id: ConnectionId::new(),
        capacity: capacity.max(1),
        state: Mutex::new(QueueState {
            events: VecDeque::new(),
            closed: None,
            discarded: 0,
        }),
        notify: Notify::new(),
    });
    (
        ConnectionHandle {
            shared: shared.clone(),
        },
        OutboundReceiver { shared },
    )
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn deliver(&self, event: Arc<ServerEvent>) -> Result<Delivery, DeliveryError> {
        let mut state = self.shared.state.lock();
        if state.closed.is_some() {
            return Err(DeliveryError::Closed);
        }

        let mut outcome = Delivery::Queued;
        if state.events.len() >= self.shared.capacity {
            if let Some(pos) = state.events.iter().position(|e| e.is_droppable()) {
                state.events.remove(pos);
                state.discarded += 1;
                outcome = Delivery::Discarded;
            } else if event.is_droppable() {
                state.discarded += 1;
                return Ok(Delivery::Discarded);
            } else {
                state.events.clear();
                state.closed = Some(CloseReason::Unhealthy);
                drop(state);
                self.shared.notify.notify_one();
                return Err(DeliveryError::Overflow);
            }
        }

        state.events.push_back(event);
        drop(state);
        self.shared.notify.notify_one();
        Ok(outcome)
    }

    /// Closes the queue. Events already queued can still be drained.
    /// The first reason wins.
    pub fn close(&self, reason: CloseReason) {
        let mut state = self.shared.state.lock();
        if state.closed.is_none() {
            state.closed = Some(reason);
        }
        drop(state);
        self.shared.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed.is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.state.lock().closed.clone()
    }

    pub fn queued(&self) -> usize {
        self.shared.state.lock().events.len()
    }

    pub fn discarded(&self) -> u64 {
        self.shared.state.lock().discarded
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.shared.id)
            .finish()
    }
}

impl OutboundReceiver {
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Waits for the next event. Returns `None` once the queue is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<Arc<ServerEvent>> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock();
                if let Some(event) = state.events.pop_front() {
                    return Some(event);
                }
                if state.closed.is_some() {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Takes everything currently queued without waiting.
    pub fn drain(&mut self) -> Vec<Arc<ServerEvent>> {
        self.shared.state.lock().events.drain(..).collect()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.state.lock().closed.clone()
    }
}

impl Drop for OutboundReceiver {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.events.clear();
        if state.closed.is_none() {
            state.closed = Some(CloseReason::ClientClosed);
        }
    }
}
