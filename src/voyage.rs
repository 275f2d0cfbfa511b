//! Per-vessel voyage state and time-indexed position computation.
//!
//! A [`VoyageSimulator`] starts out idle. Once a route is assigned it converts
//! elapsed time and speed into a position along the route. Progress clamps at
//! the final waypoint; the simulator keeps reporting that waypoint and the last
//! known course until a new voyage replaces the current one.

use crate::geo::{initial_bearing, Waypoint};
use crate::route::Route;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MMSI_DIGITS: usize = 9;
/// Lookahead used to derive course from two position samples.
const COURSE_LOOKAHEAD_MINUTES: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
}

/// Maritime Mobile Service Identity: exactly nine ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mmsi(String);

impl Mmsi {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(value: &str) -> bool {
        value.len() == MMSI_DIGITS && value.bytes().all(|b| b.is_ascii_digit())
    }
}

impl FromStr for Mmsi {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if Self::is_valid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(SimulationError::InvalidParameter(format!(
                "MMSI must be {} digits, got {:?}",
                MMSI_DIGITS, s
            )))
        }
    }
}

impl TryFrom<String> for Mmsi {
    type Error = SimulationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(SimulationError::InvalidParameter(format!(
                "MMSI must be {} digits, got {:?}",
                MMSI_DIGITS, value
            )))
        }
    }
}

impl From<Mmsi> for String {
    fn from(value: Mmsi) -> Self {
        value.0
    }
}

impl AsRef<str> for Mmsi {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Mmsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One simulated position fix, immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub mmsi: Mmsi,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_knots: f64,
    pub course_degrees: f64,
    pub heading_degrees: f64,
    pub sequence_number: u32,
    pub elapsed_minutes: f64,
    pub distance_covered: f64,
    pub progress: f64,
}

impl PositionReport {
    pub fn position(&self) -> Waypoint {
        Waypoint::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone)]
pub struct Voyage {
    pub speed_knots: f64,
    pub route: Route,
    pub start_time: DateTime<Utc>,
    pub total_distance: f64,
    pub last_known_position: Waypoint,
    pub last_course: f64,
    pub message_count: u32,
}

impl Voyage {
    pub fn estimated_duration_hours(&self) -> f64 {
        self.total_distance / self.speed_knots
    }

    pub fn distance_covered(&self, elapsed_minutes: f64) -> f64 {
        self.speed_knots * elapsed_minutes.max(0.0) / 60.0
    }

    /// Fraction of the route completed, in [0, 1].
    pub fn progress(&self, elapsed_minutes: f64) -> f64 {
        if self.total_distance <= 0.0 {
            return 1.0;
        }
        (self.distance_covered(elapsed_minutes) / self.total_distance).min(1.0)
    }

    fn position_at(&self, elapsed_minutes: f64) -> Waypoint {
        let progress = self.progress(elapsed_minutes);
        let waypoints = self.route.waypoints();
        let segments = (waypoints.len() - 1) as f64;

        let scaled = progress * segments;
        let idx = scaled.floor() as usize;
        if idx >= waypoints.len() - 1 {
            return self.route.last();
        }

        waypoints[idx].lerp(&waypoints[idx + 1], scaled - idx as f64)
    }
}

#[derive(Debug, Clone)]
pub struct VoyageSimulator {
    mmsi: Mmsi,
    voyage: Option<Voyage>,
}

impl VoyageSimulator {
    pub fn new(mmsi: Mmsi) -> Self {
        Self { mmsi, voyage: None }
    }

    /// Parses and validates the vessel identity before creating an idle simulator.
    pub fn for_vessel(mmsi: &str) -> Result<Self, SimulationError> {
        Ok(Self::new(mmsi.parse()?))
    }

    pub fn mmsi(&self) -> &Mmsi {
        &self.mmsi
    }

    pub fn voyage(&self) -> Option<&Voyage> {
        self.voyage.as_ref()
    }

    pub fn is_voyaging(&self) -> bool {
        self.voyage.is_some()
    }

    pub fn is_arrived(&self, at: DateTime<Utc>) -> bool {
        self.voyage
            .as_ref()
            .map(|v| v.progress(elapsed_minutes_since(v.start_time, at)) >= 1.0)
            .unwrap_or(false)
    }

    pub fn start_voyage(&mut self, route: Route, speed_knots: f64) -> Result<(), SimulationError> {
        self.start_voyage_at(route, speed_knots, Utc::now())
    }

    /// Replaces any current voyage; progress restarts from the first waypoint.
    pub fn start_voyage_at(
        &mut self,
        route: Route,
        speed_knots: f64,
        start_time: DateTime<Utc>,
    ) -> Result<(), SimulationError> {
        if !speed_knots.is_finite() || speed_knots <= 0.0 {
            return Err(SimulationError::InvalidParameter(format!(
                "speed must be positive, got {}",
                speed_knots
            )));
        }

        let total_distance = route.distance_nm();
        let origin = route.first();
        self.voyage = Some(Voyage {
            speed_knots,
            route,
            start_time,
            total_distance,
            last_known_position: origin,
            last_course: 0.0,
            message_count: 0,
        });

        Ok(())
    }

    pub fn position_at(&self, elapsed_minutes: f64) -> Result<Waypoint, SimulationError> {
        let voyage = self.active_voyage()?;
        Ok(voyage.position_at(elapsed_minutes))
    }

    pub fn course_between(from: &Waypoint, to: &Waypoint) -> f64 {
        initial_bearing(from, to)
    }

    pub fn report_at(&mut self, timestamp: DateTime<Utc>) -> Result<PositionReport, SimulationError> {
        let voyage = self
            .voyage
            .as_mut()
            .ok_or(SimulationError::IllegalState("no active voyage, start a voyage first"))?;

        let elapsed_minutes = elapsed_minutes_since(voyage.start_time, timestamp);
        let current = voyage.position_at(elapsed_minutes);
        let ahead = voyage.position_at(elapsed_minutes + COURSE_LOOKAHEAD_MINUTES);

        // Once arrived both samples coincide and the previous course is kept
        if current != ahead {
            voyage.last_course = initial_bearing(&current, &ahead);
        }

        voyage.last_known_position = current;
        voyage.message_count = voyage.message_count.wrapping_add(1);

        Ok(PositionReport {
            mmsi: self.mmsi.clone(),
            timestamp,
            latitude: current.latitude,
            longitude: current.longitude,
            speed_knots: voyage.speed_knots,
            course_degrees: voyage.last_course,
            heading_degrees: voyage.last_course,
            sequence_number: voyage.message_count,
            elapsed_minutes,
            distance_covered: voyage.distance_covered(elapsed_minutes),
            progress: voyage.progress(elapsed_minutes),
        })
    }

    fn active_voyage(&self) -> Result<&Voyage, SimulationError> {
        self.voyage
            .as_ref()
            .ok_or(SimulationError::IllegalState("no active voyage, start a voyage first"))
    }
}

/// Minutes between `start` and `at`, never negative.
pub fn elapsed_minutes_since(start: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    let millis = (at - start).num_milliseconds();
    (millis as f64 / 60_000.0).max(0.0)
}
