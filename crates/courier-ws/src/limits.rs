use std::num::NonZeroU32;

use courier_models::gateway::ClientEvent;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

/// Per-user inbound limits. Every routed event counts against the general
/// quota; location pings also count against their own.
pub struct EventRateLimits {
    events: DefaultKeyedRateLimiter<i64>,
    locations: DefaultKeyedRateLimiter<i64>,
}

impl EventRateLimits {
    pub fn new(events_per_minute: u32, location_updates_per_minute: u32) -> Self {
        Self {
            events: RateLimiter::keyed(per_minute(events_per_minute)),
            locations: RateLimiter::keyed(per_minute(location_updates_per_minute)),
        }
    }

    /// `Ok(())` if allowed, or `Err(retry_after_ms)`.
    pub fn check(&self, user_id: i64, event: &ClientEvent) -> Result<(), u64> {
        let now = DefaultClock::default().now();

        if let Err(not_until) = self.events.check_key(&user_id) {
            let wait = not_until.wait_time_from(now);
            return Err(wait.as_millis().max(1) as u64);
        }
        if let ClientEvent::UpdateLocation(_) = event {
            if let Err(not_until) = self.locations.check_key(&user_id) {
                let wait = not_until.wait_time_from(now);
                return Err(wait.as_millis().max(1) as u64);
            }
        }
        Ok(())
    }

    pub fn retain_recent(&self) {
        self.events.retain_recent();
        self.locations.retain_recent();
        self.events.shrink_to_fit();
        self.locations.shrink_to_fit();
    }
}

fn per_minute(limit: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_models::gateway::ContextPayload;
    use courier_models::location::LocationUpdate;

    fn location() -> ClientEvent {
        ClientEvent::UpdateLocation(LocationUpdate {
            user_id: 1,
            context_id: 1,
            lat: 0.0,
            lng: 0.0,
            accuracy: None,
            timestamp: 1,
        })
    }

    #[test]
    fn location_quota_is_separate_from_the_general_one() {
        let limits = EventRateLimits::new(100, 2);
        assert!(limits.check(1, &location()).is_ok());
        assert!(limits.check(1, &location()).is_ok());
        let retry_after = limits.check(1, &location()).unwrap_err();
        assert!(retry_after >= 1);

        // Other events still pass for the same user.
        let subscribe = ClientEvent::SubscribeContext(ContextPayload { context_id: 1 });
        assert!(limits.check(1, &subscribe).is_ok());
    }

    #[test]
    fn users_are_limited_independently() {
        let limits = EventRateLimits::new(1, 10);
        let subscribe = ClientEvent::SubscribeContext(ContextPayload { context_id: 1 });
        assert!(limits.check(1, &subscribe).is_ok());
        assert!(limits.check(1, &subscribe).is_err());
        assert!(limits.check(2, &subscribe).is_ok());
    }
}
