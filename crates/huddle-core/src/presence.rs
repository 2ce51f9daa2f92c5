use crate::outbound::{CloseReason, ConnectionHandle, ConnectionId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;

/// Emitted only when a user's aggregate online state actually changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceTransition {
    Online { user_id: i64 },
    Offline { user_id: i64, last_seen: DateTime<Utc> },
}

#[derive(Debug)]
struct PresenceEntry {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    last_seen: DateTime<Utc>,
}

/// Tracks live connections per user. A user is online while at least one
/// connection is registered. Check-and-update happens under the entry lock,
/// so concurrent connect/disconnect of the same user cannot produce
/// duplicate or missing transitions.
///
/// The `*_with` variants run the announce callback while that lock is still
/// held, which keeps one user's online/offline announcements in decision
/// order. Lock order is presence entry, then hub room; the hub never calls
/// back into the registry.
#[derive(Default)]
pub struct PresenceRegistry {
    users: DashMap<i64, PresenceEntry>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_connection(
        &self,
        user_id: i64,
        handle: &ConnectionHandle,
    ) -> Option<PresenceTransition> {
        self.register_connection_with(user_id, handle, |_| {})
    }

    pub fn register_connection_with(
        &self,
        user_id: i64,
        handle: &ConnectionHandle,
        announce: impl FnOnce(&PresenceTransition),
    ) -> Option<PresenceTransition> {
        let now = Utc::now();
        let mut entry = self.users.entry(user_id).or_insert_with(|| PresenceEntry {
            connections: HashMap::new(),
            last_seen: now,
        });
        let was_offline = entry.connections.is_empty();
        entry.last_seen = now;
        let inserted = entry
            .connections
            .insert(handle.id(), handle.clone())
            .is_none();
        if !(inserted && was_offline) {
            return None;
        }
        let transition = PresenceTransition::Online { user_id };
        announce(&transition);
        Some(transition)
    }

    /// Unknown connections are ignored, so a double unregister never
    /// produces a second offline transition.
    pub fn unregister_connection(
        &self,
        user_id: i64,
        connection_id: ConnectionId,
    ) -> Option<PresenceTransition> {
        self.unregister_connection_with(user_id, connection_id, |_| {})
    }

    pub fn unregister_connection_with(
        &self,
        user_id: i64,
        connection_id: ConnectionId,
        announce: impl FnOnce(&PresenceTransition),
    ) -> Option<PresenceTransition> {
        let mut entry = self.users.get_mut(&user_id)?;
        entry.connections.remove(&connection_id)?;
        entry.last_seen = Utc::now();
        if !entry.connections.is_empty() {
            return None;
        }
        let transition = PresenceTransition::Offline {
            user_id,
            last_seen: entry.last_seen,
        };
        announce(&transition);
        Some(transition)
    }

    /// Closes the outbound queue of every live connection of the user. Each
    /// connection then runs its own close path, which unregisters it here.
    /// Returns how many connections were asked to close.
    pub fn close_user_connections(&self, user_id: i64, reason: CloseReason) -> usize {
        let handles: Vec<ConnectionHandle> = match self.users.get(&user_id) {
            Some(entry) => entry.connections.values().cloned().collect(),
            None => return 0,
        };
        for handle in &handles {
            handle.close(reason.clone());
        }
        handles.len()
    }

    /// Records activity on a live connection.
    pub fn touch(&self, user_id: i64) {
        if let Some(mut entry) = self.users.get_mut(&user_id) {
            entry.last_seen = Utc::now();
        }
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.users
            .get(&user_id)
            .map(|e| !e.connections.is_empty())
            .unwrap_or(false)
    }

    pub fn last_seen(&self, user_id: i64) -> Option<DateTime<Utc>> {
        self.users.get(&user_id).map(|e| e.last_seen)
    }

    pub fn connection_count(&self, user_id: i64) -> usize {
        self.users
            .get(&user_id)
            .map(|e| e.connections.len())
            .unwrap_or(0)
    }

    pub fn online_user_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .users
            .iter()
            .filter(|e| !e.connections.is_empty())
            .map(|e| *e.key())
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{channel, OutboundReceiver};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn conn() -> (ConnectionHandle, OutboundReceiver) {
        channel(4)
    }

    #[test]
    fn only_first_and_last_connection_transition() {
        let presence = PresenceRegistry::new();
        let ((c1, _r1), (c2, _r2)) = (conn(), conn());

        assert_eq!(
            presence.register_connection(1, &c1),
            Some(PresenceTransition::Online { user_id: 1 })
        );
        assert_eq!(presence.register_connection(1, &c2), None);
        assert_eq!(presence.connection_count(1), 2);

        assert_eq!(presence.unregister_connection(1, c1.id()), None);
        assert!(presence.is_online(1));

        match presence.unregister_connection(1, c2.id()) {
            Some(PresenceTransition::Offline { user_id, last_seen }) => {
                assert_eq!(user_id, 1);
                assert_eq!(presence.last_seen(1), Some(last_seen));
            }
            other => panic!("expected offline transition, got {other:?}"),
        }
        assert!(!presence.is_online(1));
    }

    #[test]
    fn duplicate_register_and_unknown_unregister_are_ignored() {
        let presence = PresenceRegistry::new();
        let (c1, _r1) = conn();
        assert!(presence.register_connection(3, &c1).is_some());
        assert!(presence.register_connection(3, &c1).is_none());
        assert!(presence.unregister_connection(3, ConnectionId::new()).is_none());
        assert!(presence.unregister_connection(4, c1.id()).is_none());
        assert!(presence.unregister_connection(3, c1.id()).is_some());
        assert!(presence.unregister_connection(3, c1.id()).is_none());
    }

    #[test]
    fn online_users_lists_only_connected() {
        let presence = PresenceRegistry::new();
        let ((c, _r), (other, _ro)) = (conn(), conn());
        presence.register_connection(2, &c);
        presence.register_connection(1, &other);
        presence.unregister_connection(2, c.id());
        assert_eq!(presence.online_user_ids(), vec![1]);
        assert!(presence.last_seen(2).is_some());
        assert!(presence.last_seen(9).is_none());
    }

    #[test]
    fn close_user_connections_closes_every_queue_of_that_user() {
        let presence = PresenceRegistry::new();
        let ((a1, _ra1), (a2, _ra2), (b, _rb)) = (conn(), conn(), conn());
        presence.register_connection(1, &a1);
        presence.register_connection(1, &a2);
        presence.register_connection(2, &b);

        assert_eq!(presence.close_user_connections(1, CloseReason::Logout), 2);
        assert_eq!(a1.close_reason(), Some(CloseReason::Logout));
        assert_eq!(a2.close_reason(), Some(CloseReason::Logout));
        assert!(!b.is_closed());
        // Still registered until each connection runs its close path.
        assert!(presence.is_online(1));
        assert_eq!(presence.close_user_connections(7, CloseReason::Logout), 0);
    }

    #[test]
    fn concurrent_connect_disconnect_balances_transitions() {
        let presence = Arc::new(PresenceRegistry::new());
        let online = Arc::new(AtomicUsize::new(0));
        let offline = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let presence = presence.clone();
                let online = online.clone();
                let offline = offline.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let (handle, _rx) = channel(1);
                        if presence.register_connection(42, &handle).is_some() {
                            online.fetch_add(1, Ordering::SeqCst);
                        }
                        if presence.unregister_connection(42, handle.id()).is_some() {
                            offline.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(!presence.is_online(42));
        assert!(online.load(Ordering::SeqCst) >= 1);
        assert_eq!(online.load(Ordering::SeqCst), offline.load(Ordering::SeqCst));
    }

    #[test]
    fn announcements_strictly_alternate_under_contention() {
        let presence = Arc::new(PresenceRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let presence = presence.clone();
                let log = log.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let (handle, _rx) = channel(1);
                        presence.register_connection_with(7, &handle, |_| log.lock().push(true));
                        presence.unregister_connection_with(7, handle.id(), |_| {
                            log.lock().push(false)
                        });
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let log = log.lock();
        assert!(!log.is_empty());
        assert_eq!(log.len() % 2, 0);
        for (i, online) in log.iter().enumerate() {
            assert_eq!(*online, i % 2 == 0, "announcement {i} out of order");
        }
    }
}
