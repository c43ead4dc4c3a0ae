use std::time::{Duration, Instant};

use courier_models::location::LocationUpdate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationOutcome {
    Applied,
    /// The update is not newer than what is stored; nothing changed.
    Stale { latest_timestamp: i64 },
}

struct Position {
    update: LocationUpdate,
    received_at: Instant,
}

/// Latest known position per context. Updates only move forward in
/// timestamp order, so a late-arriving ping never rewinds a courier.
///
/// Contexts that stop publishing age out through [`retain_recent`].
///
/// [`retain_recent`]: LatestPositions::retain_recent
#[derive(Default)]
pub struct LatestPositions {
    positions: DashMap<i64, Position>,
}

impl LatestPositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, update: &LocationUpdate) -> LocationOutcome {
        let position = Position {
            update: update.clone(),
            received_at: Instant::now(),
        };
        match self.positions.entry(update.context_id) {
            Entry::Occupied(mut current) => {
                let latest_timestamp = current.get().update.timestamp;
                if update.timestamp <= latest_timestamp {
                    return LocationOutcome::Stale { latest_timestamp };
                }
                current.insert(position);
                LocationOutcome::Applied
            }
            Entry::Vacant(slot) => {
                slot.insert(position);
                LocationOutcome::Applied
            }
        }
    }

    pub fn latest(&self, context_id: i64) -> Option<LocationUpdate> {
        self.positions
            .get(&context_id)
            .map(|position| position.update.clone())
    }

    /// Forget contexts whose last applied update arrived more than
    /// `max_age` ago. Returns how many were dropped.
    pub fn retain_recent(&self, max_age: Duration) -> usize {
        match Instant::now().checked_sub(max_age) {
            Some(cutoff) => self.retain_since(cutoff),
            None => 0,
        }
    }

    /// Forget contexts whose last applied update arrived before `cutoff`.
    pub fn retain_since(&self, cutoff: Instant) -> usize {
        let before = self.positions.len();
        self.positions
            .retain(|_, position| position.received_at >= cutoff);
        let dropped = before.saturating_sub(self.positions.len());
        if dropped > 0 {
            tracing::debug!(dropped, "expired idle context positions");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(context_id: i64, timestamp: i64, lat: f64) -> LocationUpdate {
        LocationUpdate {
            user_id: 3,
            context_id,
            lat,
            lng: 2.0,
            accuracy: None,
            timestamp,
        }
    }

    #[test]
    fn older_update_does_not_overwrite_newer() {
        let positions = LatestPositions::new();
        assert_eq!(positions.apply(&at(1, 10, 41.0)), LocationOutcome::Applied);
        assert_eq!(
            positions.apply(&at(1, 5, 40.0)),
            LocationOutcome::Stale {
                latest_timestamp: 10
            }
        );
        let latest = positions.latest(1).unwrap();
        assert_eq!(latest.timestamp, 10);
        assert_eq!(latest.lat, 41.0);
    }

    #[test]
    fn duplicate_timestamp_is_stale() {
        let positions = LatestPositions::new();
        positions.apply(&at(1, 10, 41.0));
        assert!(matches!(
            positions.apply(&at(1, 10, 42.0)),
            LocationOutcome::Stale { .. }
        ));
    }

    #[test]
    fn contexts_are_independent() {
        let positions = LatestPositions::new();
        positions.apply(&at(1, 100, 41.0));
        assert_eq!(positions.apply(&at(2, 5, 12.0)), LocationOutcome::Applied);
        assert_eq!(positions.len(), 2);
        assert_eq!(positions.latest(1).unwrap().timestamp, 100);
        assert_eq!(positions.latest(2).unwrap().timestamp, 5);
    }

    #[test]
    fn idle_contexts_expire() {
        let positions = LatestPositions::new();
        positions.apply(&at(1, 10, 41.0));
        positions.apply(&at(2, 10, 12.0));

        assert_eq!(positions.retain_recent(Duration::from_secs(60)), 0);
        assert_eq!(positions.len(), 2);

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(positions.retain_since(later), 2);
        assert!(positions.is_empty());
        assert!(positions.latest(1).is_none());

        // An expired context starts fresh.
        assert_eq!(positions.apply(&at(1, 3, 40.0)), LocationOutcome::Applied);
    }

    #[test]
    fn fresh_updates_survive_pruning() {
        let positions = LatestPositions::new();
        positions.apply(&at(1, 10, 41.0));
        std::thread::sleep(Duration::from_millis(5));
        let cutoff = Instant::now();
        positions.apply(&at(2, 10, 12.0));

        assert_eq!(positions.retain_since(cutoff), 1);
        assert!(positions.latest(1).is_none());
        assert_eq!(positions.latest(2).unwrap().timestamp, 10);
    }
}
