//! Shortcut searches that find single-ride paths without running the round-based search.

use std::collections::BTreeSet;

use log::debug;

use crate::access_egress::AccessEgress;
use crate::aggregator::RaptorRouterResult;
use crate::context::SearchContext;
use crate::multicriteria::{DominanceFunction, ParetoCriteria, RelaxFunction};
use crate::network::{RouteIndex, Timestamp, TransitDataProvider, TripIndex, TripSchedule};
use crate::pareto::ParetoSet;
use crate::path::{PathLeg, RaptorPath, TransitLeg};
use crate::raptor::WorkerState;
use crate::timers::{SearchTimers, TimerPhase};

/// The iteration time a forward range search would have used to find a boarding at `board_time`,
/// aligned to the one-minute iteration grid.
pub fn calculate_iteration_departure_time(
    access_duration: Timestamp,
    board_time: Timestamp,
    board_slack: Timestamp,
) -> Timestamp {
    (board_time - (access_duration + board_slack)).div_euclid(60) * 60
}

fn shortcut_result(paths: Vec<RaptorPath>, timers: SearchTimers) -> RaptorRouterResult {
    RaptorRouterResult {
        paths,
        iterations: 0,
        state: WorkerState::Converged,
        diagnostics: None,
        timers,
    }
}

/// One path riding `trip` of `route` from `board_pos` to `alight_pos`, with the access leg ending
/// just in time for boarding and the egress leg starting right after alighting.
fn single_ride_path<D: TransitDataProvider, T: TripSchedule>(
    ctx: &SearchContext<'_, D>,
    access: &AccessEgress,
    egress: &AccessEgress,
    route: RouteIndex,
    trip: &T,
    board_pos: usize,
    alight_pos: usize,
) -> Option<RaptorPath> {
    let stops = ctx.data.stops_in_route(route);
    let cost = &ctx.params().cost;
    let slack = ctx.slack;
    let on_board = access.is_on_board();

    let board_time = trip.departure(board_pos);
    let alight_time = trip.arrival(alight_pos);

    let (access_from, access_to) = if on_board {
        (board_time, board_time)
    } else {
        let to = access.latest_arrival_time(board_time - slack.board_slack)?;
        (to - access.duration(), to)
    };
    let egress_from = egress.earliest_departure_time(alight_time + slack.alight_slack)?;

    let board_cost = if on_board { 0 } else { cost.boarding_cost(true, 0) };
    let c1 = access.c1() + board_cost + cost.transit_cost(alight_time - board_time) + egress.c1();
    let access_duration = if on_board { 0 } else { access.duration() };

    let legs = vec![
        PathLeg::Access {
            leg: access.remove_decorator().clone(),
            from_time: access_from,
            to_time: access_to,
        },
        PathLeg::Transit(TransitLeg {
            route,
            trip: trip.trip_index(),
            board_stop: stops[board_pos],
            board_pos,
            board_time,
            alight_stop: stops[alight_pos],
            alight_pos,
            alight_time,
        }),
        PathLeg::Egress {
            leg: egress.remove_decorator().clone(),
            from_time: egress_from,
            to_time: egress_from + egress.duration(),
        },
    ];
    let iteration_departure_time = calculate_iteration_departure_time(access_duration, board_time, slack.board_slack);
    Some(RaptorPath::new(iteration_departure_time, legs, 1, c1, ctx.merge_group(0, route)))
}

/// Rides the fixed trip of every on-board access to each later stop with an egress.
pub struct OnBoardDirectSearch<'a, D: TransitDataProvider> {
    ctx: &'a SearchContext<'a, D>,
}

impl<'a, D: TransitDataProvider> OnBoardDirectSearch<'a, D> {
    pub fn new(ctx: &'a SearchContext<'a, D>) -> Self { Self { ctx } }

    pub fn route(&self, enable_timers: bool) -> RaptorRouterResult {
        let ctx = self.ctx;
        let request = ctx.request;
        let mut timers = SearchTimers::new(enable_timers);
        let start = timers.start();
        let mut paths = ParetoSet::new(ctx.path_criteria());

        // A single ride cannot visit a via-location.
        if request.via_locations.is_empty() {
            for access in &request.access_paths {
                let Some(on_board) = access.as_on_board() else {
                    continue;
                };
                let trip = ctx.data.trip(on_board.route, on_board.trip);
                let stops = ctx.data.stops_in_route(on_board.route);

                for alight_pos in on_board.stop_pos + 1..stops.len() {
                    if !trip.can_alight(alight_pos) {
                        continue;
                    }
                    for egress in request.egress_paths.iter().filter(|egress| egress.stop() == stops[alight_pos]) {
                        let path =
                            single_ride_path(ctx, access, egress, on_board.route, &trip, on_board.stop_pos, alight_pos);
                        if let Some(path) = path.filter(|path| ctx.within_time_limit(path.end_time)) {
                            paths.add(path);
                        }
                    }
                }
            }
        }

        timers.stop(TimerPhase::Shortcut, start);
        debug!("On-board direct search found {} paths.", paths.len());
        shortcut_result(paths.into_vec(), timers)
    }
}

/// Settings of the relaxed limited transfer search. Present on a request means enabled.
#[derive(Clone, Debug, PartialEq)]
pub struct RelaxedLimitedTransferRequest {
    /// Paths are kept while their cost is within this relaxation of a cheaper path's cost.
    pub relax_c1: RelaxFunction,
    /// Scales the cost of access and egress legs in this search only.
    pub extra_access_egress_cost_factor: f64,
    /// Only stop-to-stop paths: access and egress legs must take no time.
    pub disable_access_egress: bool,
}

impl Default for RelaxedLimitedTransferRequest {
    fn default() -> Self {
        Self {
            relax_c1: RelaxFunction::new(2.0, 20 * 60),
            extra_access_egress_cost_factor: 1.0,
            disable_access_egress: false,
        }
    }
}

impl RelaxedLimitedTransferRequest {
    pub fn with_relax_c1(mut self, relax_c1: RelaxFunction) -> Self {
        self.relax_c1 = relax_c1;
        self
    }

    pub fn with_extra_access_egress_cost_factor(mut self, factor: f64) -> Self {
        self.extra_access_egress_cost_factor = factor;
        self
    }

    pub fn with_disable_access_egress(mut self, disable: bool) -> Self {
        self.disable_access_egress = disable;
        self
    }

    /// Earlier departure, earlier arrival, or a cost below the relaxed cost of the other path.
    pub fn comparator(&self) -> ParetoCriteria<RaptorPath> {
        ParetoCriteria::new()
            .with(|p: &RaptorPath| p.start_time as i64, DominanceFunction::GreaterThan)
            .with(|p: &RaptorPath| p.end_time as i64, DominanceFunction::LessThan)
            .with(|p: &RaptorPath| p.c1 as i64, DominanceFunction::Relaxed(self.relax_c1))
    }
}

/// Finds paths with a single ride that the full search may consider too expensive, as long as
/// they stay within a relaxed cost limit.
pub struct RelaxedLimitedTransferSearch<'a, D: TransitDataProvider> {
    ctx: &'a SearchContext<'a, D>,
    request: RelaxedLimitedTransferRequest,
    accesses: Vec<AccessEgress>,
    egresses: Vec<AccessEgress>,
    earliest_departure_time: Timestamp,
    latest_departure_time: Timestamp,
}

impl<'a, D: TransitDataProvider> RelaxedLimitedTransferSearch<'a, D> {
    pub fn new(ctx: &'a SearchContext<'a, D>, request: RelaxedLimitedTransferRequest) -> Self {
        let params = ctx.params();
        let prepare = |paths: &[AccessEgress]| -> Vec<AccessEgress> {
            paths
                .iter()
                .filter(|path| !path.is_on_board())
                .filter(|path| !request.disable_access_egress || path.duration() == 0)
                .map(|path| path.clone().with_extra_cost(request.extra_access_egress_cost_factor))
                .collect()
        };
        let accesses = prepare(&ctx.request.access_paths);
        let egresses = prepare(&ctx.request.egress_paths);
        Self {
            ctx,
            accesses,
            egresses,
            earliest_departure_time: params.earliest_departure_time,
            latest_departure_time: params.earliest_departure_time + params.search_window,
            request,
        }
    }

    pub fn route(&self, enable_timers: bool) -> RaptorRouterResult {
        let mut timers = SearchTimers::new(enable_timers);
        let start = timers.start();
        let mut paths = ParetoSet::new(self.request.comparator());

        if self.ctx.request.via_locations.is_empty() {
            let routes: BTreeSet<RouteIndex> = self
                .accesses
                .iter()
                .flat_map(|access| self.ctx.data.routes_for_stop(access.stop()).iter().copied())
                .collect();
            for route in routes {
                paths.add_all(self.route_search(route));
            }
        }

        timers.stop(TimerPhase::Shortcut, start);
        debug!("Relaxed limited transfer search found {} paths.", paths.len());
        shortcut_result(paths.into_vec(), timers)
    }

    /// Finds the cheapest access/egress combination on the route for the first trip in the
    /// window, then expands it to every later trip in the window.
    fn route_search(&self, route: RouteIndex) -> Vec<RaptorPath> {
        let stops = self.ctx.data.stops_in_route(route);
        let mut best: Option<(RaptorPath, &AccessEgress, &AccessEgress, TripIndex)> = None;

        for access in &self.accesses {
            let Some(board_pos) = stops.iter().position(|&stop| stop == access.stop()) else {
                continue;
            };
            for egress in &self.egresses {
                let Some(alight_pos) =
                    stops[board_pos + 1..].iter().position(|&stop| stop == egress.stop()).map(|i| board_pos + 1 + i)
                else {
                    continue;
                };
                let Some((path, trip)) = self.first_path_in_window(route, access, egress, board_pos, alight_pos) else {
                    continue;
                };
                if best.as_ref().is_none_or(|(best, ..)| path.c1 < best.c1) {
                    best = Some((path, access, egress, trip));
                }
            }
        }

        let Some((first, access, egress, first_trip)) = best else {
            return Vec::new();
        };
        let Some(transit) = first.transit_legs().next().copied() else {
            return Vec::new();
        };

        let mut paths = vec![first];
        for trip_idx in first_trip + 1..self.ctx.data.num_trips(route) as TripIndex {
            let trip = self.ctx.data.trip(route, trip_idx);
            if !trip.can_board(transit.board_pos) || !trip.can_alight(transit.alight_pos) {
                continue;
            }
            let Some(path) =
                single_ride_path(self.ctx, access, egress, route, &trip, transit.board_pos, transit.alight_pos)
            else {
                continue;
            };
            if path.start_time > self.latest_departure_time {
                break;
            }
            paths.push(path);
        }
        paths
    }

    fn first_path_in_window(
        &self,
        route: RouteIndex,
        access: &AccessEgress,
        egress: &AccessEgress,
        board_pos: usize,
        alight_pos: usize,
    ) -> Option<(RaptorPath, TripIndex)> {
        let ctx = self.ctx;
        let departure = access.earliest_departure_time(self.earliest_departure_time)?;
        let earliest_board_time = departure + access.duration() + ctx.slack.board_slack;

        let num_trips = ctx.data.num_trips(route) as TripIndex;
        let trip = (0..num_trips)
            .map(|trip_idx| ctx.data.trip(route, trip_idx))
            .filter(|trip| trip.can_board(board_pos) && trip.can_alight(alight_pos))
            .find(|trip| trip.departure(board_pos) >= earliest_board_time)?;

        let path = single_ride_path(ctx, access, egress, route, &trip, board_pos, alight_pos)?;
        (path.start_time >= self.earliest_departure_time && path.start_time <= self.latest_departure_time)
            .then(|| (path, trip.trip_index()))
    }
}
