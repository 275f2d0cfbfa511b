use crate::geo::Waypoint;
use crate::voyage::Mmsi;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

pub const DEFAULT_DUPLICATE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeenReport {
    pub timestamp: DateTime<Utc>,
    pub position: Waypoint,
}

impl SeenReport {
    /// Same coordinates bit for bit and within `window` of each other, in either direction.
    fn repeats(&self, timestamp: DateTime<Utc>, position: &Waypoint, window: Duration) -> bool {
        let same_position = self.position.latitude.to_bits() == position.latitude.to_bits()
            && self.position.longitude.to_bits() == position.longitude.to_bits();

        let diff = timestamp - self.timestamp;
        same_position && diff < window && diff > -window
    }
}

/// Most recent accepted report per vessel. Only one slot per vessel is kept,
/// so a repeat of an older position is not caught once the vessel moved on.
#[derive(Debug, Clone)]
pub struct LastSeen {
    entries: HashMap<Mmsi, SeenReport>,
    window: Duration,
}

impl LastSeen {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn get(&self, mmsi: &Mmsi) -> Option<&SeenReport> {
        self.entries.get(mmsi)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_duplicate(&self, mmsi: &Mmsi, timestamp: DateTime<Utc>, position: &Waypoint) -> bool {
        self.entries
            .get(mmsi)
            .is_some_and(|seen| seen.repeats(timestamp, position, self.window))
    }

    pub fn record(&mut self, mmsi: Mmsi, timestamp: DateTime<Utc>, position: Waypoint) {
        self.entries.insert(mmsi, SeenReport { timestamp, position });
    }

    /// Starts an overlay whose updates are only merged back via [`LastSeen::apply`].
    pub fn stage(&self) -> StagedLastSeen<'_> {
        StagedLastSeen {
            committed: self,
            staged: HashMap::new(),
        }
    }

    pub fn apply(&mut self, updates: HashMap<Mmsi, SeenReport>) {
        self.entries.extend(updates);
    }
}

impl Default for LastSeen {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_DUPLICATE_WINDOW_SECS))
    }
}

/// Pending view used while a batch is being written.
#[derive(Debug)]
pub struct StagedLastSeen<'a> {
    committed: &'a LastSeen,
    staged: HashMap<Mmsi, SeenReport>,
}

impl StagedLastSeen<'_> {
    pub fn is_duplicate(&self, mmsi: &Mmsi, timestamp: DateTime<Utc>, position: &Waypoint) -> bool {
        match self.staged.get(mmsi) {
            Some(seen) => seen.repeats(timestamp, position, self.committed.window),
            None => self.committed.is_duplicate(mmsi, timestamp, position),
        }
    }

    pub fn record(&mut self, mmsi: Mmsi, timestamp: DateTime<Utc>, position: Waypoint) {
        self.staged.insert(mmsi, SeenReport { timestamp, position });
    }

    pub fn into_updates(self) -> HashMap<Mmsi, SeenReport> {
        self.staged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn vessel() -> Mmsi {
        "123456789".parse().unwrap()
    }

    #[test]
    fn test_duplicate_within_window() {
        let mut seen = LastSeen::default();
        let pos = Waypoint::new(51.0, 4.0);
        seen.record(vessel(), at(0), pos);

        assert!(seen.is_duplicate(&vessel(), at(30), &pos));
        assert!(seen.is_duplicate(&vessel(), at(-30), &pos));
        assert!(!seen.is_duplicate(&vessel(), at(60), &pos));
        assert!(!seen.is_duplicate(&vessel(), at(90), &pos));
    }

    #[test]
    fn test_moved_vessel_not_duplicate() {
        let mut seen = LastSeen::default();
        seen.record(vessel(), at(0), Waypoint::new(51.0, 4.0));
        assert!(!seen.is_duplicate(&vessel(), at(10), &Waypoint::new(51.0, 4.000001)));
    }

    #[test]
    fn test_unknown_vessel_not_duplicate() {
        let seen = LastSeen::default();
        assert!(!seen.is_duplicate(&vessel(), at(0), &Waypoint::new(0.0, 0.0)));
    }

    #[test]
    fn test_staged_updates_stay_pending() {
        let mut seen = LastSeen::default();
        let pos = Waypoint::new(10.0, 10.0);

        let updates = {
            let mut staged = seen.stage();
            staged.record(vessel(), at(0), pos);
            assert!(staged.is_duplicate(&vessel(), at(5), &pos));
            assert!(!seen.is_duplicate(&vessel(), at(5), &pos));
            staged.into_updates()
        };

        seen.apply(updates);
        assert!(seen.is_duplicate(&vessel(), at(5), &pos));
    }
}
