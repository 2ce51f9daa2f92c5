use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use huddle_models::gateway::ClientEvent;
use std::num::NonZeroU32;
use std::sync::Weak;
use std::time::Duration;

/// Per-user limits shared by all of a user's connections, so opening more
/// tabs does not buy more throughput.
pub struct UserRateLimits {
    /// Every event except heartbeats.
    events: DefaultKeyedRateLimiter<i64>,
    typing: DefaultKeyedRateLimiter<i64>,
}

fn per_minute(n: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN))
}

impl UserRateLimits {
    pub fn new(events_per_minute: u32, typing_per_minute: u32) -> Self {
        Self {
            events: RateLimiter::keyed(per_minute(events_per_minute)),
            typing: RateLimiter::keyed(per_minute(typing_per_minute)),
        }
    }

    /// `Err(retry_after_ms)` when the event must be refused.
    pub fn check(&self, user_id: i64, event: &ClientEvent) -> Result<(), u64> {
        if matches!(event, ClientEvent::Heartbeat) {
            return Ok(());
        }
        let now = DefaultClock::default().now();

        if let Err(not_until) = self.events.check_key(&user_id) {
            return Err(not_until.wait_time_from(now).as_millis().max(1) as u64);
        }
        if matches!(event, ClientEvent::TypingStart { .. } | ClientEvent::TypingStop { .. }) {
            if let Err(not_until) = self.typing.check_key(&user_id) {
                return Err(not_until.wait_time_from(now).as_millis().max(1) as u64);
            }
        }
        Ok(())
    }

    fn prune(&self) {
        self.events.retain_recent();
        self.typing.retain_recent();
        self.events.shrink_to_fit();
        self.typing.shrink_to_fit();
    }
}

/// Periodically drops idle limiter entries. Stops once the limits are dropped.
pub(crate) fn spawn_pruner(limits: Weak<UserRateLimits>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    runtime.spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        interval.tick().await;
        loop {
            interval.tick().await;
            match limits.upgrade() {
                Some(limits) => {
                    limits.prune();
                    tracing::trace!("rate limiter cleanup: pruned stale entries");
                }
                None => break,
            }
        }
    });
}
