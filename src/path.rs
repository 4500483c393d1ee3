use std::fmt::{self, Display};
use std::sync::Arc;

use crate::access_egress::AccessEgress;
use crate::context::{SearchContext, ViaConnection};
use crate::direct::calculate_iteration_departure_time;
use crate::network::{Cost, RouteIndex, StopIndex, Timestamp, TransitDataProvider, TripIndex};
use crate::raptor::{ArrivalKind, StopArrival, TransitCalculator};
use crate::utils;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitLeg {
    pub route: RouteIndex,
    pub trip: TripIndex,
    pub board_stop: StopIndex,
    pub board_pos: usize,
    pub board_time: Timestamp,
    pub alight_stop: StopIndex,
    pub alight_pos: usize,
    pub alight_time: Timestamp,
}

/// One leg of a journey, in travel order. Access and egress legs hold the physical leg, without
/// any cost decoration.
#[derive(Clone, Debug, PartialEq)]
pub enum PathLeg {
    Access {
        leg: AccessEgress,
        from_time: Timestamp,
        to_time: Timestamp,
    },
    Transit(TransitLeg),
    Transfer {
        from_stop: StopIndex,
        to_stop: StopIndex,
        from_time: Timestamp,
        to_time: Timestamp,
    },
    Egress {
        leg: AccessEgress,
        from_time: Timestamp,
        to_time: Timestamp,
    },
}

impl PathLeg {
    pub fn from_time(&self) -> Timestamp {
        match self {
            Self::Access { from_time, .. } | Self::Transfer { from_time, .. } | Self::Egress { from_time, .. } => {
                *from_time
            }
            Self::Transit(leg) => leg.board_time,
        }
    }

    pub fn to_time(&self) -> Timestamp {
        match self {
            Self::Access { to_time, .. } | Self::Transfer { to_time, .. } | Self::Egress { to_time, .. } => *to_time,
            Self::Transit(leg) => leg.alight_time,
        }
    }

    pub fn as_transit(&self) -> Option<&TransitLeg> {
        match self {
            Self::Transit(leg) => Some(leg),
            _ => None,
        }
    }
}

/// Legs found by earlier via-segments, carried along with the seeds they produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathPrefix {
    pub legs: Vec<PathLeg>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RaptorPath {
    /// The iteration time a standard forward search would find this path in.
    pub iteration_departure_time: Timestamp,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub number_of_transfers: usize,
    pub c1: Cost,
    pub c2: u32,
    pub legs: Vec<PathLeg>,
}

impl RaptorPath {
    pub fn new(iteration_departure_time: Timestamp, legs: Vec<PathLeg>, rides: usize, c1: Cost, c2: u32) -> Self {
        let start_time = legs.first().map_or(iteration_departure_time, PathLeg::from_time);
        let end_time = legs.last().map_or(start_time, PathLeg::to_time);
        Self {
            iteration_departure_time,
            start_time,
            end_time,
            number_of_transfers: rides.saturating_sub(1),
            c1,
            c2,
            legs,
        }
    }

    /// A path carrying only the values a path comparator reads.
    pub(crate) fn without_legs(start_time: Timestamp, end_time: Timestamp, rides: usize, c1: Cost, c2: u32) -> Self {
        Self {
            iteration_departure_time: start_time,
            start_time,
            end_time,
            number_of_transfers: rides.saturating_sub(1),
            c1,
            c2,
            legs: Vec::new(),
        }
    }

    pub fn duration(&self) -> Timestamp { self.end_time - self.start_time }

    pub fn number_of_rides(&self) -> usize { self.transit_legs().count() }

    pub fn transit_legs(&self) -> impl Iterator<Item = &TransitLeg> { self.legs.iter().filter_map(PathLeg::as_transit) }

    pub fn access_leg(&self) -> Option<&AccessEgress> {
        match self.legs.first() {
            Some(PathLeg::Access { leg, .. }) => Some(leg),
            _ => None,
        }
    }

    pub fn egress_leg(&self) -> Option<&AccessEgress> {
        match self.legs.last() {
            Some(PathLeg::Egress { leg, .. }) => Some(leg),
            _ => None,
        }
    }

    pub fn display<'a, D: TransitDataProvider>(&'a self, data: &'a D) -> PathDisplay<'a, D> {
        PathDisplay { path: self, data }
    }
}

/// Legs of one segment in travel order, plus the prefix the segment was seeded with.
fn segment_legs<D: TransitDataProvider>(
    ctx: &SearchContext<'_, D>,
    arena: &[StopArrival],
    origin_legs: &[AccessEgress],
    index: usize,
) -> (Vec<PathLeg>, Option<Arc<PathPrefix>>) {
    let calculator = ctx.calculator;
    let forward = calculator.is_forward();

    let mut chain = Vec::new();
    let mut current = Some(index);
    while let Some(i) = current {
        chain.push(i);
        current = arena[i].prev;
    }
    chain.reverse();

    let mut legs = Vec::with_capacity(chain.len());
    let mut prefix = None;
    for &i in &chain {
        let arrival = &arena[i];
        match &arrival.kind {
            ArrivalKind::Access { leg } => {
                let leg = origin_legs[*leg].remove_decorator().clone();
                let duration = leg.duration();
                legs.push(if forward {
                    PathLeg::Access {
                        leg,
                        from_time: arrival.time - duration,
                        to_time: arrival.time,
                    }
                } else {
                    PathLeg::Egress {
                        leg,
                        from_time: arrival.time,
                        to_time: arrival.time + duration,
                    }
                });
            }
            ArrivalKind::OnBoardAccess { leg } => legs.push(PathLeg::Access {
                leg: origin_legs[*leg].remove_decorator().clone(),
                from_time: arrival.time,
                to_time: arrival.time,
            }),
            ArrivalKind::Seed { prefix: seed } => prefix = Some(seed.clone()),
            ArrivalKind::Transit { route, trip, from_stop, from_pos, from_time, to_pos, to_time } => {
                let (board, alight) = if forward {
                    ((*from_stop, *from_pos, *from_time), (arrival.stop, *to_pos, *to_time))
                } else {
                    ((arrival.stop, *to_pos, *to_time), (*from_stop, *from_pos, *from_time))
                };
                legs.push(PathLeg::Transit(TransitLeg {
                    route: *route,
                    trip: *trip,
                    board_stop: board.0,
                    board_pos: board.1,
                    board_time: board.2,
                    alight_stop: alight.0,
                    alight_pos: alight.1,
                    alight_time: alight.2,
                }));
            }
            ArrivalKind::Transfer { from_stop, duration } => {
                let start = (*from_stop, calculator.minus(arrival.time, *duration));
                let end = (arrival.stop, arrival.time);
                let (from, to) = if forward { (start, end) } else { (end, start) };
                legs.push(PathLeg::Transfer {
                    from_stop: from.0,
                    to_stop: to.0,
                    from_time: from.1,
                    to_time: to.1,
                });
            }
        }
    }

    if !forward {
        legs.reverse();
    }
    (legs, prefix)
}

/// Joins the legs of a segment with the legs found before it, in travel order.
fn with_prefix(calculator: TransitCalculator, legs: Vec<PathLeg>, prefix: Option<Arc<PathPrefix>>) -> Vec<PathLeg> {
    let Some(prefix) = prefix else {
        return legs;
    };
    let mut joined = Vec::with_capacity(prefix.legs.len() + legs.len());
    if calculator.is_forward() {
        joined.extend_from_slice(&prefix.legs);
        joined.extend(legs);
    } else {
        joined.extend(legs);
        joined.extend_from_slice(&prefix.legs);
    }
    joined
}

/// A pass-through via splits one ride into two transit legs on the same trip.
fn merge_same_trip_legs(legs: &mut Vec<PathLeg>) {
    let mut merged: Vec<PathLeg> = Vec::with_capacity(legs.len());
    for leg in legs.drain(..) {
        if let (Some(PathLeg::Transit(prev)), PathLeg::Transit(next)) = (merged.last_mut(), &leg) {
            if prev.route == next.route && prev.trip == next.trip && prev.alight_pos == next.board_pos {
                prev.alight_stop = next.alight_stop;
                prev.alight_pos = next.alight_pos;
                prev.alight_time = next.alight_time;
                continue;
            }
        }
        merged.push(leg);
    }
    *legs = merged;
}

/// Moves a street access so that it ends just in time for the first boarding, and a street egress
/// so that it starts right after the last alighting. Opening hours still apply.
fn time_shift_access_egress<D: TransitDataProvider>(ctx: &SearchContext<'_, D>, legs: &mut [PathLeg]) {
    let slack = ctx.slack;

    if let [PathLeg::Access { leg, from_time, to_time }, PathLeg::Transit(first), ..] = legs {
        if !leg.is_on_board() {
            let latest = leg.latest_arrival_time(first.board_time - slack.board_slack);
            if let Some(arrival) = latest.filter(|&t| t > *to_time && t <= first.board_time) {
                *to_time = arrival;
                *from_time = arrival - leg.duration();
            }
        }
    }

    if let [.., PathLeg::Transit(last), PathLeg::Egress { leg, from_time, to_time }] = legs {
        let earliest = leg.earliest_departure_time(last.alight_time + slack.alight_slack);
        if let Some(departure) = earliest.filter(|&t| t < *from_time && t >= last.alight_time) {
            *from_time = departure;
            *to_time = departure + leg.duration();
        }
    }
}

fn iteration_departure_time(
    calculator: TransitCalculator,
    legs: &[PathLeg],
    iteration_time: Timestamp,
    board_slack: Timestamp,
) -> Timestamp {
    let on_board_start = matches!(legs.first(), Some(PathLeg::Access { leg, .. }) if leg.is_on_board());
    if calculator.is_forward() && !on_board_start {
        return iteration_time;
    }
    let access_duration = match legs.first() {
        Some(PathLeg::Access { leg, .. }) => leg.duration(),
        _ => 0,
    };
    match legs.iter().find_map(PathLeg::as_transit) {
        Some(first) => calculate_iteration_departure_time(access_duration, first.board_time, board_slack),
        None => legs.first().map_or(iteration_time, PathLeg::from_time),
    }
}

/// Builds the full path for the stop arrival at `index` followed by `target`, the egress leg in a
/// forward search or the access leg in a reverse search.
pub(crate) fn build_path<D: TransitDataProvider>(
    ctx: &SearchContext<'_, D>,
    arena: &[StopArrival],
    origin_legs: &[AccessEgress],
    index: usize,
    target: &AccessEgress,
    iteration_time: Timestamp,
) -> RaptorPath {
    let calculator = ctx.calculator;
    let arrival = &arena[index];
    let (segment, prefix) = segment_legs(ctx, arena, origin_legs, index);
    let mut legs = with_prefix(calculator, segment, prefix);

    let start = calculator.leg_departure_time(target, arrival.time).unwrap_or(arrival.time);
    let physical = target.remove_decorator().clone();
    let duration = physical.duration();
    if calculator.is_forward() {
        legs.push(PathLeg::Egress {
            leg: physical,
            from_time: start,
            to_time: start + duration,
        });
    } else {
        legs.insert(
            0,
            PathLeg::Access {
                leg: physical,
                from_time: start - duration,
                to_time: start,
            },
        );
    }

    merge_same_trip_legs(&mut legs);
    time_shift_access_egress(ctx, &mut legs);

    let iteration_departure_time = iteration_departure_time(calculator, &legs, iteration_time, ctx.slack.board_slack);
    RaptorPath::new(
        iteration_departure_time,
        legs,
        arrival.rides as usize,
        arrival.c1 + target.c1(),
        arrival.c2,
    )
}

/// The start and end time of the path [`build_path`] returns for the same arguments, found
/// without building any legs. `None` if the arrival continues a path from an earlier via-segment.
pub(crate) fn path_bounds<D: TransitDataProvider>(
    ctx: &SearchContext<'_, D>,
    arena: &[StopArrival],
    origin_legs: &[AccessEgress],
    index: usize,
    target: &AccessEgress,
) -> Option<(Timestamp, Timestamp)> {
    let calculator = ctx.calculator;
    let slack = ctx.slack;
    let arrival = &arena[index];

    let (mut root, mut after_root) = (index, None);
    while let Some(prev) = arena[root].prev {
        after_root = Some(root);
        root = prev;
    }
    let root_arrival = &arena[root];
    let after_root = after_root.map(|i| &arena[i].kind);

    let target_time = calculator.leg_departure_time(target, arrival.time).unwrap_or(arrival.time);
    let target = target.remove_decorator();
    let duration = target.duration();

    if calculator.is_forward() {
        let start = match &root_arrival.kind {
            ArrivalKind::OnBoardAccess { .. } => root_arrival.time,
            ArrivalKind::Access { leg } => {
                let leg = origin_legs[*leg].remove_decorator();
                let mut to_time = root_arrival.time;
                if let Some(ArrivalKind::Transit { from_time: board_time, .. }) = after_root {
                    if !leg.is_on_board() {
                        let latest = leg.latest_arrival_time(board_time - slack.board_slack);
                        if let Some(t) = latest.filter(|&t| t > to_time && t <= *board_time) {
                            to_time = t;
                        }
                    }
                }
                to_time - leg.duration()
            }
            _ => return None,
        };
        let mut from_time = target_time;
        if let ArrivalKind::Transit { to_time: alight_time, .. } = &arrival.kind {
            let earliest = target.earliest_departure_time(alight_time + slack.alight_slack);
            if let Some(t) = earliest.filter(|&t| t < from_time && t >= *alight_time) {
                from_time = t;
            }
        }
        Some((start, from_time + duration))
    } else {
        let ArrivalKind::Access { leg } = &root_arrival.kind else {
            return None;
        };
        let mut to_time = target_time;
        if let ArrivalKind::Transit { to_time: board_time, .. } = &arrival.kind {
            if !target.is_on_board() {
                let latest = target.latest_arrival_time(board_time - slack.board_slack);
                if let Some(t) = latest.filter(|&t| t > to_time && t <= *board_time) {
                    to_time = t;
                }
            }
        }
        let leg = origin_legs[*leg].remove_decorator();
        let mut from_time = root_arrival.time;
        if let Some(ArrivalKind::Transit { from_time: alight_time, .. }) = after_root {
            let earliest = leg.earliest_departure_time(alight_time + slack.alight_slack);
            if let Some(t) = earliest.filter(|&t| t < from_time && t >= *alight_time) {
                from_time = t;
            }
        }
        Some((to_time - duration, from_time + leg.duration()))
    }
}

/// The legs leading to the arrival at `index`, optionally followed by the walk of a via
/// connection, for seeding the next segment.
pub(crate) fn prefix_for<D: TransitDataProvider>(
    ctx: &SearchContext<'_, D>,
    arena: &[StopArrival],
    origin_legs: &[AccessEgress],
    index: usize,
    via_walk: Option<PathLeg>,
) -> Arc<PathPrefix> {
    let (segment, prefix) = segment_legs(ctx, arena, origin_legs, index);
    let mut legs = with_prefix(ctx.calculator, segment, prefix);
    if let Some(walk) = via_walk {
        if ctx.calculator.is_forward() {
            legs.push(walk);
        } else {
            legs.insert(0, walk);
        }
    }
    Arc::new(PathPrefix { legs })
}

/// The walk of a via connection reached at `time`, after waiting at the via-location.
pub(crate) fn via_transfer_leg(
    calculator: TransitCalculator,
    connection: &ViaConnection,
    time: Timestamp,
    minimum_wait_time: Timestamp,
) -> PathLeg {
    let start = calculator.plus(time, minimum_wait_time);
    let end = calculator.plus(start, connection.duration);
    let (from_time, to_time) = if calculator.is_forward() { (start, end) } else { (end, start) };
    PathLeg::Transfer {
        from_stop: connection.from_stop,
        to_stop: connection.to_stop,
        from_time,
        to_time,
    }
}

pub struct PathDisplay<'a, D> {
    path: &'a RaptorPath,
    data: &'a D,
}

impl<D: TransitDataProvider> Display for PathDisplay<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data;
        writeln!(f, "-----------------------------------------------")?;
        for leg in &self.path.legs {
            match leg {
                PathLeg::Access { leg, from_time, to_time } => writeln!(
                    f,
                    "{} to {}, {} - {}.",
                    leg.label(),
                    data.stop_name(leg.stop()),
                    utils::get_time_str(*from_time),
                    utils::get_time_str(*to_time),
                )?,
                PathLeg::Transit(transit) => {
                    writeln!(
                        f,
                        "Board at {} at {} ({} line).",
                        data.stop_name(transit.board_stop),
                        utils::get_time_str(transit.board_time),
                        data.route_label(transit.route),
                    )?;
                    writeln!(
                        f,
                        "Arrive at {} at {}.",
                        data.stop_name(transit.alight_stop),
                        utils::get_time_str(transit.alight_time),
                    )?;
                }
                PathLeg::Transfer { from_stop, to_stop, from_time, to_time } => writeln!(
                    f,
                    "Walk from {} to {}, {} - {}.",
                    data.stop_name(*from_stop),
                    data.stop_name(*to_stop),
                    utils::get_time_str(*from_time),
                    utils::get_time_str(*to_time),
                )?,
                PathLeg::Egress { leg, from_time, to_time } => writeln!(
                    f,
                    "{} from {}, {} - {}.",
                    leg.label(),
                    data.stop_name(leg.stop()),
                    utils::get_time_str(*from_time),
                    utils::get_time_str(*to_time),
                )?,
            }
        }
        writeln!(
            f,
            "Total journey time: {} minutes, {} transfers, cost {}.",
            self.path.duration() / 60,
            self.path.number_of_transfers,
            self.path.c1
        )?;
        writeln!(f, "-----------------------------------------------")
    }
}
