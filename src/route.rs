//! Route generation between two geographic points.
//!
//! A maritime-aware [`PathSource`] is consulted first when one is configured.
//! Whenever it is missing, fails, or hands back something unusable, the
//! generator falls back to an evenly spaced linear route so that a voyage can
//! always be started.

use crate::geo::{haversine_nm, Waypoint};
use tracing::warn;

/// Minimum number of waypoints in a linear route.
pub const MIN_ROUTE_POINTS: usize = 10;
/// Target spacing between linear waypoints.
pub const WAYPOINT_SPACING_NM: f64 = 10.0;

#[derive(Debug, thiserror::Error)]
pub enum PathSourceError {
    #[error("routing service unavailable: {0}")]
    Unavailable(String),
    #[error("no maritime path between the requested points")]
    NoPath,
}

/// External routing capability producing a maritime-aware path.
pub trait PathSource: Send + Sync {
    fn request_path(&self, start: Waypoint, end: Waypoint) -> Result<Vec<Waypoint>, PathSourceError>;
}

/// Immutable ordered waypoint sequence with cached cumulative distances.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    waypoints: Vec<Waypoint>,
    cumulative_nm: Vec<f64>,
}

impl Route {
    /// Builds a route. Returns `None` for an empty waypoint list.
    pub fn new(waypoints: Vec<Waypoint>) -> Option<Self> {
        if waypoints.is_empty() {
            return None;
        }
        Some(Self::from_points(waypoints))
    }

    fn from_points(waypoints: Vec<Waypoint>) -> Self {
        let mut cumulative_nm = Vec::with_capacity(waypoints.len());
        let mut total = 0.0;
        cumulative_nm.push(total);
        for pair in waypoints.windows(2) {
            total += haversine_nm(&pair[0], &pair[1]);
            cumulative_nm.push(total);
        }

        Self {
            waypoints,
            cumulative_nm,
        }
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    /// Always false; a route holds at least one waypoint.
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn first(&self) -> Waypoint {
        self.waypoints[0]
    }

    pub fn last(&self) -> Waypoint {
        self.waypoints[self.waypoints.len() - 1]
    }

    /// Distance travelled from the start when reaching each waypoint.
    pub fn cumulative_distances(&self) -> &[f64] {
        &self.cumulative_nm
    }

    pub fn distance_nm(&self) -> f64 {
        self.cumulative_nm[self.cumulative_nm.len() - 1]
    }

    /// Largest distance between two consecutive waypoints.
    pub fn max_leg_nm(&self) -> f64 {
        self.cumulative_nm
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(0.0, f64::max)
    }
}

/// Sum of haversine distances between consecutive waypoints.
pub fn route_distance(route: &Route) -> f64 {
    route.distance_nm()
}

#[derive(Default)]
pub struct RouteGenerator {
    path_source: Option<Box<dyn PathSource>>,
}

impl RouteGenerator {
    pub fn new() -> Self {
        Self { path_source: None }
    }

    pub fn with_path_source(path_source: Box<dyn PathSource>) -> Self {
        Self {
            path_source: Some(path_source),
        }
    }

    pub fn has_path_source(&self) -> bool {
        self.path_source.is_some()
    }

    pub fn generate_route(&self, start: Waypoint, end: Waypoint) -> Route {
        if !start.is_valid() || !end.is_valid() {
            warn!(
                "invalid route endpoints ({:?} -> {:?}), clamping and using linear route",
                start, end
            );
            return linear_route(start.clamped(), end.clamped());
        }

        match self.request_maritime_path(start, end) {
            Ok(route) => route,
            Err(e) => {
                if self.path_source.is_some() {
                    warn!("maritime routing failed, falling back to linear route: {}", e);
                }
                linear_route(start, end)
            }
        }
    }

    fn request_maritime_path(&self, start: Waypoint, end: Waypoint) -> Result<Route, PathSourceError> {
        let source = self
            .path_source
            .as_ref()
            .ok_or_else(|| PathSourceError::Unavailable("no path source configured".to_string()))?;

        let path = source.request_path(start, end)?;
        if !path.iter().all(Waypoint::is_valid) {
            return Err(PathSourceError::Unavailable(
                "path contained out of range coordinates".to_string(),
            ));
        }

        Route::new(path).ok_or(PathSourceError::NoPath)
    }
}

/// Number of linear waypoints for a leg of the given length.
pub fn linear_point_count(distance_nm: f64) -> usize {
    let by_spacing = (distance_nm / WAYPOINT_SPACING_NM).floor();
    if by_spacing.is_finite() && by_spacing > MIN_ROUTE_POINTS as f64 {
        by_spacing as usize
    } else {
        MIN_ROUTE_POINTS
    }
}

/// Evenly spaced equirectangular interpolation from `start` to `end`, both inclusive.
///
/// Longitude is interpolated directly, so a leg crossing the antimeridian is
/// not wrapped and runs the long way round the globe.
pub fn linear_route(start: Waypoint, end: Waypoint) -> Route {
    let count = linear_point_count(haversine_nm(&start, &end));
    let last = (count - 1) as f64;

    let waypoints: Vec<Waypoint> = (0..count)
        .map(|i| {
            if i == count - 1 {
                end
            } else {
                start.lerp(&end, i as f64 / last)
            }
        })
        .collect();

    Route::from_points(waypoints)
}
