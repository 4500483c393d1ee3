//! Access and egress legs: the parts of a journey between the origin/destination and the first or
//! last transit stop.
//!
//! [`AccessEgress`] is a closed set of variants:
//! - [`StreetAccessEgress`]: a street leg (walk, bike, car) to or from a stop, optionally limited
//!   by opening hours.
//! - [`OnBoardAccess`]: the traveler is already riding a known trip.
//! - [`ExtraCostAccessEgress`]: any leg with its generalized cost scaled. The wrapped leg is kept
//!   as is and is always reachable through [`AccessEgress::remove_decorator`].

use std::collections::BTreeMap;
use std::fmt;

use crate::network::{Cost, RouteIndex, StopIndex, Timestamp, TripIndex};
use crate::pareto::ParetoSet;
use crate::utils::get_duration_str;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpeningHours {
    pub open: Timestamp,
    pub close: Timestamp,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StreetAccessEgress {
    pub stop: StopIndex,
    pub duration: Timestamp,
    pub c1: Cost,
    pub via_locations_visited: usize,
    pub opening_hours: Option<OpeningHours>,
    pub reached_by_walking: bool,
    pub mode: Box<str>,
}

impl StreetAccessEgress {
    pub fn walk(stop: StopIndex, duration: Timestamp, c1: Cost) -> Self {
        Self {
            stop,
            duration,
            c1,
            via_locations_visited: 0,
            opening_hours: None,
            reached_by_walking: true,
            mode: "Walk".into(),
        }
    }

    /// A leg that does not end on foot, e.g. a car drop-off. Walking transfers may chain from it.
    pub fn ride(stop: StopIndex, duration: Timestamp, c1: Cost, mode: &str) -> Self {
        Self {
            reached_by_walking: false,
            mode: mode.into(),
            ..Self::walk(stop, duration, c1)
        }
    }

    pub fn with_opening_hours(mut self, open: Timestamp, close: Timestamp) -> Self {
        assert!(open <= close, "Opening hours close before they open: {open} > {close}.");
        self.opening_hours = Some(OpeningHours { open, close });
        self
    }

    pub fn with_via_locations_visited(mut self, visited: usize) -> Self {
        self.via_locations_visited = visited;
        self
    }

    fn earliest_departure_time(&self, time: Timestamp) -> Option<Timestamp> {
        match self.opening_hours {
            None => Some(time),
            Some(OpeningHours { open, .. }) if time < open => Some(open),
            Some(OpeningHours { close, .. }) if time > close => None,
            Some(_) => Some(time),
        }
    }

    fn latest_arrival_time(&self, time: Timestamp) -> Option<Timestamp> {
        let start = time - self.duration;
        match self.opening_hours {
            None => Some(time),
            Some(OpeningHours { close, .. }) if start > close => Some(close + self.duration),
            Some(OpeningHours { open, .. }) if start < open => None,
            Some(_) => Some(time),
        }
    }
}

/// Boarding a trip the traveler is already on, at a known stop position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OnBoardAccess {
    pub route: RouteIndex,
    pub trip: TripIndex,
    pub stop_pos: usize,
    pub stop: StopIndex,
    pub c1: Cost,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExtraCostAccessEgress {
    pub inner: Box<AccessEgress>,
    pub factor: f64,
}

impl ExtraCostAccessEgress {
    /// The undecorated leg, unwrapping nested decorations.
    pub fn remove_decorator(&self) -> &AccessEgress { self.inner.remove_decorator() }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AccessEgress {
    Street(StreetAccessEgress),
    OnBoard(OnBoardAccess),
    ExtraCost(ExtraCostAccessEgress),
}

impl From<StreetAccessEgress> for AccessEgress {
    fn from(value: StreetAccessEgress) -> Self { Self::Street(value) }
}

impl From<OnBoardAccess> for AccessEgress {
    fn from(value: OnBoardAccess) -> Self { Self::OnBoard(value) }
}

impl AccessEgress {
    pub fn walk(stop: StopIndex, duration: Timestamp, c1: Cost) -> Self {
        StreetAccessEgress::walk(stop, duration, c1).into()
    }

    pub fn on_board(route: RouteIndex, trip: TripIndex, stop_pos: usize, stop: StopIndex, c1: Cost) -> Self {
        OnBoardAccess { route, trip, stop_pos, stop, c1 }.into()
    }

    pub fn with_extra_cost(self, factor: f64) -> Self {
        Self::ExtraCost(ExtraCostAccessEgress {
            inner: Box::new(self),
            factor,
        })
    }

    pub fn stop(&self) -> StopIndex {
        match self {
            Self::Street(s) => s.stop,
            Self::OnBoard(o) => o.stop,
            Self::ExtraCost(e) => e.inner.stop(),
        }
    }

    pub fn duration(&self) -> Timestamp {
        match self {
            Self::Street(s) => s.duration,
            Self::OnBoard(_) => 0,
            Self::ExtraCost(e) => e.inner.duration(),
        }
    }

    pub fn c1(&self) -> Cost {
        match self {
            Self::Street(s) => s.c1,
            Self::OnBoard(o) => o.c1,
            Self::ExtraCost(e) => (e.inner.c1() as f64 * e.factor).round() as Cost,
        }
    }

    /// Rides taken within the leg itself. Access and egress legs are never transit.
    pub fn number_of_rides(&self) -> usize { 0 }

    pub fn number_of_via_locations_visited(&self) -> usize {
        match self {
            Self::Street(s) => s.via_locations_visited,
            Self::OnBoard(_) => 0,
            Self::ExtraCost(e) => e.inner.number_of_via_locations_visited(),
        }
    }

    pub fn stop_reached_by_walking(&self) -> bool {
        match self {
            Self::Street(s) => s.reached_by_walking,
            Self::OnBoard(_) => false,
            Self::ExtraCost(e) => e.inner.stop_reached_by_walking(),
        }
    }

    pub fn stop_reached_on_board(&self) -> bool { !self.stop_reached_by_walking() }

    pub fn has_opening_hours(&self) -> bool {
        match self {
            Self::Street(s) => s.opening_hours.is_some(),
            Self::OnBoard(_) => false,
            Self::ExtraCost(e) => e.inner.has_opening_hours(),
        }
    }

    /// The earliest time the leg can start at or after `time`, or `None` if it has closed.
    pub fn earliest_departure_time(&self, time: Timestamp) -> Option<Timestamp> {
        match self {
            Self::Street(s) => s.earliest_departure_time(time),
            Self::OnBoard(_) => Some(time),
            Self::ExtraCost(e) => e.inner.earliest_departure_time(time),
        }
    }

    /// The latest time the leg can end at or before `time`, or `None` if it has not opened yet.
    pub fn latest_arrival_time(&self, time: Timestamp) -> Option<Timestamp> {
        match self {
            Self::Street(s) => s.latest_arrival_time(time),
            Self::OnBoard(_) => Some(time),
            Self::ExtraCost(e) => e.inner.latest_arrival_time(time),
        }
    }

    pub fn as_on_board(&self) -> Option<&OnBoardAccess> {
        match self.remove_decorator() {
            Self::OnBoard(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_on_board(&self) -> bool { self.as_on_board().is_some() }

    /// The physical leg without any cost decoration. Undecorated legs return themselves.
    pub fn remove_decorator(&self) -> &AccessEgress {
        match self {
            Self::ExtraCost(e) => e.remove_decorator(),
            _ => self,
        }
    }

    /// # Panics
    /// If the leg is not decorated.
    #[cfg(test)]
    pub(crate) fn expect_decorated(&self) -> &ExtraCostAccessEgress {
        match self {
            Self::ExtraCost(e) => e,
            other => panic!("Expected a decorated access/egress, got {other:?}."),
        }
    }

    /// Display helper: "Walk 5m", "Bike 12m30s" or "On board".
    pub fn label(&self) -> String {
        match self.remove_decorator() {
            Self::Street(s) => format!("{} {}", s.mode, get_duration_str(s.duration)),
            _ => "On board".to_owned(),
        }
    }
}

impl fmt::Display for AccessEgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to stop {} (c1 {})", self.label(), self.stop(), self.c1())
    }
}

fn street_dominance_exist(left: &AccessEgress, right: &AccessEgress) -> bool {
    left.duration() < right.duration()
        || left.number_of_rides() < right.number_of_rides()
        || left.number_of_via_locations_visited() > right.number_of_via_locations_visited()
        || (left.stop_reached_on_board() && !right.stop_reached_on_board())
        || (!left.has_opening_hours() && right.has_opening_hours())
        || (left.has_opening_hours() && right.has_opening_hours() && left != right)
}

/// Removes access/egress legs that another leg to the same stop is at least as good as. With
/// `include_cost` the generalized cost also counts as a criterion. On-board accesses are kept
/// as they are, since each pins a different trip.
pub fn remove_non_optimal_paths(paths: &[AccessEgress], include_cost: bool) -> Vec<AccessEgress> {
    let lde = |l: &AccessEgress, r: &AccessEgress| {
        street_dominance_exist(l, r) || (include_cost && l.c1() < r.c1())
    };

    let mut by_stop: BTreeMap<StopIndex, ParetoSet<AccessEgress, _>> = BTreeMap::new();
    let mut result = Vec::with_capacity(paths.len());
    for path in paths {
        if path.is_on_board() {
            result.push(path.clone());
            continue;
        }
        by_stop.entry(path.stop()).or_insert_with(|| ParetoSet::new(lde)).add(path.clone());
    }

    result.extend(by_stop.into_values().flat_map(ParetoSet::into_vec));
    result
}
