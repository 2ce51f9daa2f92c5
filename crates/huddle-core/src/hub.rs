//! In-memory room subscriptions and broadcast fan-out.

use crate::outbound::{ConnectionHandle, ConnectionId, Delivery, DeliveryError};
use dashmap::DashMap;
use huddle_models::gateway::ServerEvent;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone)]
struct Subscriber {
    user_id: i64,
    handle: ConnectionHandle,
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub discarded: usize,
    /// Subscribers whose connection was closed or overflowed. They have been
    /// removed from the hub.
    pub dead: usize,
}

/// Room -> live subscribers. A room entry exists only while it has at least
/// one subscriber.
#[derive(Default)]
pub struct RoomHub {
    rooms: DashMap<i64, HashMap<ConnectionId, Subscriber>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Returns `true` when the connection was not yet subscribed.
    /// Membership must already have been checked by the caller.
    pub fn join(&self, room_id: i64, handle: ConnectionHandle, user_id: i64) -> bool {
        self.rooms
            .entry(room_id)
            .or_default()
            .insert(handle.id(), Subscriber { user_id, handle })
            .is_none()
    }

    pub fn leave(&self, room_id: i64, connection_id: ConnectionId) -> bool {
        let removed = match self.rooms.get_mut(&room_id) {
            Some(mut subscribers) => subscribers.remove(&connection_id).is_some(),
            None => false,
        };
        if removed {
            self.rooms.remove_if(&room_id, |_, subscribers| subscribers.is_empty());
        }
        removed
    }

    /// Drops every subscription `user_id` holds in the room and returns the
    /// affected connections.
    pub fn evict_user(&self, room_id: i64, user_id: i64) -> Vec<ConnectionHandle> {
        let evicted: Vec<ConnectionHandle> = match self.rooms.get_mut(&room_id) {
            Some(mut subscribers) => {
                let ids: Vec<ConnectionId> = subscribers
                    .iter()
                    .filter(|(_, s)| s.user_id == user_id)
                    .map(|(id, _)| *id)
                    .collect();
                ids.iter()
                    .filter_map(|id| subscribers.remove(id))
                    .map(|s| s.handle)
                    .collect()
            }
            None => Vec::new(),
        };
        self.rooms.remove_if(&room_id, |_, subscribers| subscribers.is_empty());
        evicted
    }

    pub fn is_subscribed(&self, room_id: i64, connection_id: ConnectionId) -> bool {
        self.rooms
            .get(&room_id)
            .map(|subscribers| subscribers.contains_key(&connection_id))
            .unwrap_or(false)
    }

    pub fn subscriber_count(&self, room_id: i64) -> usize {
        self.rooms.get(&room_id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Distinct users with at least one live subscription to the room.
    pub fn online_user_ids(&self, room_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = match self.rooms.get(&room_id) {
            Some(subscribers) => subscribers
                .values()
                .map(|s| s.user_id)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect(),
            None => Vec::new(),
        };
        ids.sort_unstable();
        ids
    }

    /// Delivers `event` to every subscriber of the room except `exclude`.
    /// The subscriber list is copied first so no lock is held while enqueuing.
    pub fn broadcast(
        &self,
        room_id: i64,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> BroadcastReport {
        let targets: Vec<ConnectionHandle> = match self.rooms.get(&room_id) {
            Some(subscribers) => subscribers
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(_, s)| s.handle.clone())
                .collect(),
            None => return BroadcastReport::default(),
        };
        self.fan_out(targets.into_iter().map(|h| (room_id, h)), event)
    }

    /// Delivers `event` once per connection subscribed to any of `room_ids`,
    /// skipping every connection that belongs to `exclude_user`.
    pub fn broadcast_to_rooms(
        &self,
        room_ids: &[i64],
        event: ServerEvent,
        exclude_user: Option<i64>,
    ) -> BroadcastReport {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for room_id in room_ids {
            if let Some(subscribers) = self.rooms.get(room_id) {
                for (id, subscriber) in subscribers.iter() {
                    if Some(subscriber.user_id) == exclude_user || !seen.insert(*id) {
                        continue;
                    }
                    targets.push((*room_id, subscriber.handle.clone()));
                }
            }
        }
        self.fan_out(targets.into_iter(), event)
    }

    fn fan_out(
        &self,
        targets: impl Iterator<Item = (i64, ConnectionHandle)>,
        event: ServerEvent,
    ) -> BroadcastReport {
        let event = Arc::new(event);
        let mut report = BroadcastReport::default();
        let mut dead = Vec::new();

        for (room_id, handle) in targets {
            match handle.deliver(event.clone()) {
                Ok(Delivery::Queued) => report.delivered += 1,
                Ok(Delivery::Discarded) => report.discarded += 1,
                Err(err) => {
                    if err == DeliveryError::Overflow {
                        tracing::warn!(
                            connection = %handle.id(),
                            room_id,
                            event = event.name(),
                            "subscriber overflowed its outbound queue; disconnecting"
                        );
                    } else {
                        tracing::debug!(connection = %handle.id(), room_id, "dropping closed subscriber");
                    }
                    dead.push(handle.id());
                }
            }
        }

        if !dead.is_empty() {
            report.dead = dead.len();
            self.remove_connections(&dead);
        }
        report
    }

    /// Drops the connections from every room they are subscribed to.
    pub fn remove_connections(&self, connection_ids: &[ConnectionId]) {
        let mut emptied = Vec::new();
        for mut entry in self.rooms.iter_mut() {
            let subscribers = entry.value_mut();
            for id in connection_ids {
                subscribers.remove(id);
            }
            if subscribers.is_empty() {
                emptied.push(*entry.key());
            }
        }
        for room_id in emptied {
            self.rooms.remove_if(&room_id, |_, subscribers| subscribers.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{channel, OutboundReceiver};

    fn ping() -> ServerEvent {
        ServerEvent::HeartbeatAck
    }

    fn subscribe(hub: &RoomHub, room_id: i64, user_id: i64) -> (ConnectionHandle, OutboundReceiver) {
        let (handle, rx) = channel(4);
        hub.join(room_id, handle.clone(), user_id);
        (handle, rx)
    }

    #[test]
    fn join_is_idempotent_and_leave_cleans_up() {
        let hub = RoomHub::new();
        let (handle, _rx) = channel(4);
        assert!(hub.join(1, handle.clone(), 10));
        assert!(!hub.join(1, handle.clone(), 10));
        assert_eq!(hub.subscriber_count(1), 1);

        assert!(hub.leave(1, handle.id()));
        assert!(!hub.leave(1, handle.id()));
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn broadcast_reaches_every_subscriber_except_excluded() {
        let hub = RoomHub::new();
        let (a, mut rx_a) = subscribe(&hub, 1, 10);
        let (_b, mut rx_b) = subscribe(&hub, 1, 11);
        let (_c, mut rx_c) = subscribe(&hub, 2, 12);

        let report = hub.broadcast(1, ping(), Some(a.id()));
        assert_eq!(report.delivered, 1);
        assert!(rx_a.drain().is_empty());
        assert_eq!(rx_b.drain().len(), 1);
        assert!(rx_c.drain().is_empty());
    }

    #[test]
    fn broadcast_to_empty_room_is_a_no_op() {
        let hub = RoomHub::new();
        assert_eq!(hub.broadcast(99, ping(), None), BroadcastReport::default());
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn dead_subscribers_are_removed_without_affecting_others() {
        let hub = RoomHub::new();
        let (dead, dead_rx) = subscribe(&hub, 1, 10);
        let (_live, mut live_rx) = subscribe(&hub, 1, 11);
        hub.join(2, dead.clone(), 10);
        drop(dead_rx);

        let report = hub.broadcast(1, ping(), None);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dead, 1);
        assert_eq!(live_rx.drain().len(), 1);
        assert!(!hub.is_subscribed(1, dead.id()));
        assert!(!hub.is_subscribed(2, dead.id()));
    }

    #[test]
    fn multi_room_broadcast_dedupes_connections_and_skips_user() {
        let hub = RoomHub::new();
        let (shared, mut shared_rx) = subscribe(&hub, 1, 20);
        hub.join(2, shared.clone(), 20);
        let (_own, mut own_rx) = subscribe(&hub, 1, 10);
        let (_other, mut other_rx) = subscribe(&hub, 2, 21);

        let report = hub.broadcast_to_rooms(&[1, 2], ping(), Some(10));
        assert_eq!(report.delivered, 2);
        assert_eq!(shared_rx.drain().len(), 1);
        assert_eq!(other_rx.drain().len(), 1);
        assert!(own_rx.drain().is_empty());
    }

    #[test]
    fn evict_user_removes_all_of_their_connections() {
        let hub = RoomHub::new();
        let (_a1, _r1) = subscribe(&hub, 1, 10);
        let (_a2, _r2) = subscribe(&hub, 1, 10);
        let (b, _r3) = subscribe(&hub, 1, 11);
        assert_eq!(hub.evict_user(1, 10).len(), 2);
        assert_eq!(hub.online_user_ids(1), vec![11]);
        assert!(hub.is_subscribed(1, b.id()));
        assert!(hub.evict_user(2, 10).is_empty());
    }

    #[test]
    fn online_users_are_distinct() {
        let hub = RoomHub::new();
        let (_a1, _r1) = subscribe(&hub, 1, 10);
        let (_a2, _r2) = subscribe(&hub, 1, 10);
        let (_b, _r3) = subscribe(&hub, 1, 7);
        assert_eq!(hub.online_user_ids(1), vec![7, 10]);
        assert!(hub.online_user_ids(5).is_empty());
    }

    #[test]
    fn concurrent_joins_and_broadcasts_do_not_deadlock() {
        let hub = Arc::new(RoomHub::new());
        let mut threads = Vec::new();
        for t in 0..8 {
            let hub = hub.clone();
            threads.push(std::thread::spawn(move || {
                let mut receivers = Vec::new();
                for i in 0..50 {
                    let (handle, rx) = channel(64);
                    hub.join(i % 4, handle.clone(), t);
                    let typing = ServerEvent::UserTyping {
                        room_id: i % 4,
                        user_id: t,
                        username: format!("user{t}"),
                        is_typing: true,
                    };
                    // Ephemeral, so full queues shed instead of disconnecting.
                    hub.broadcast(i % 4, typing, None);
                    if i % 2 == 0 {
                        hub.leave(i % 4, handle.id());
                    }
                    receivers.push(rx);
                }
                receivers.len()
            }));
        }
        for t in threads {
            assert_eq!(t.join().unwrap(), 50);
        }
        let total: usize = (0..4).map(|r| hub.subscriber_count(r)).sum();
        assert_eq!(total, 8 * 25);
    }
}
