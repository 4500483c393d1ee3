//! The multi-criteria Range-RAPTOR worker.
//!
//! A search runs one [`SegmentWorker`] per via-segment. For every iteration departure time the
//! workers run in journey order (reverse order for an arrive-by search) and each hands the stop
//! arrivals it reached at its via-location to the next one as seeds.
//!
//! Stop arrivals live in an arena. Per-stop Pareto sets hold small [`ArrivalView`] copies that
//! point back into the arena, and each arena entry points at the arrival it was reached from.
//! Paths are rebuilt by walking these back-references. Between iterations the arena is compacted
//! once it has doubled, dropping entries that no stop arrival leads back to.
//!
//! Arrivals are kept across iterations: an arrival found for a later departure is only replaced
//! when an earlier departure improves on it, which is what makes the range search cheap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::access_egress::{remove_non_optimal_paths, AccessEgress};
use crate::aggregator::RaptorRouterResult;
use crate::context::{SearchContext, SearchDirection, SegmentContext, ViaConnection, ViaLocation};
use crate::multicriteria::ParetoCriteria;
use crate::network::{
    Cost, RouteIndex, SlackProvider, StopIndex, Timestamp, TransitDataProvider, TripIndex, TripSchedule,
};
use crate::pareto::{ParetoSet, ParetoSetEventListener};
use crate::path::{self, PathPrefix, RaptorPath};
use crate::timers::{SearchTimers, TimerPhase};
use crate::transfer::Transfer;
use crate::utils;

/// Arena size below which a worker never compacts.
const MIN_ARENA_COMPACTION: usize = 4096;

/// Time arithmetic for one search direction. A reverse search walks backwards in time, so
/// "plus" subtracts and a "better" time is a later one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitCalculator {
    direction: SearchDirection,
}

impl TransitCalculator {
    pub fn new(direction: SearchDirection) -> Self { Self { direction } }

    pub fn is_forward(&self) -> bool { self.direction == SearchDirection::Forward }

    pub fn plus(&self, time: Timestamp, delta: Timestamp) -> Timestamp {
        if self.is_forward() {
            time + delta
        } else {
            time - delta
        }
    }

    pub fn minus(&self, time: Timestamp, delta: Timestamp) -> Timestamp {
        if self.is_forward() {
            time - delta
        } else {
            time + delta
        }
    }

    pub fn is_better(&self, time: Timestamp, than: Timestamp) -> bool {
        if self.is_forward() {
            time < than
        } else {
            time > than
        }
    }

    pub fn unreached(&self) -> Timestamp {
        if self.is_forward() {
            Timestamp::MAX
        } else {
            Timestamp::MIN
        }
    }

    /// Stop position of the `scan_idx`-th stop visited when scanning a route of `num_stops`.
    pub fn stop_pos(&self, scan_idx: usize, num_stops: usize) -> usize {
        if self.is_forward() {
            scan_idx
        } else {
            num_stops - 1 - scan_idx
        }
    }

    pub fn scan_index(&self, stop_pos: usize, num_stops: usize) -> usize { self.stop_pos(stop_pos, num_stops) }

    pub fn board_slack(&self, slack: SlackProvider) -> Timestamp {
        if self.is_forward() {
            slack.board_slack
        } else {
            slack.alight_slack
        }
    }

    pub fn alight_slack(&self, slack: SlackProvider) -> Timestamp {
        if self.is_forward() {
            slack.alight_slack
        } else {
            slack.board_slack
        }
    }

    pub fn board_time<T: TripSchedule>(&self, trip: &T, stop_pos: usize) -> Timestamp {
        if self.is_forward() {
            trip.departure(stop_pos)
        } else {
            trip.arrival(stop_pos)
        }
    }

    pub fn alight_time<T: TripSchedule>(&self, trip: &T, stop_pos: usize) -> Timestamp {
        if self.is_forward() {
            trip.arrival(stop_pos)
        } else {
            trip.departure(stop_pos)
        }
    }

    pub fn can_board<T: TripSchedule>(&self, trip: &T, stop_pos: usize) -> bool {
        if self.is_forward() {
            trip.can_board(stop_pos)
        } else {
            trip.can_alight(stop_pos)
        }
    }

    pub fn can_alight<T: TripSchedule>(&self, trip: &T, stop_pos: usize) -> bool {
        if self.is_forward() {
            trip.can_alight(stop_pos)
        } else {
            trip.can_board(stop_pos)
        }
    }

    /// Start of an access/egress leg that may start no earlier (later, in reverse) than `time`,
    /// taking opening hours into account.
    pub fn leg_departure_time(&self, leg: &AccessEgress, time: Timestamp) -> Option<Timestamp> {
        if self.is_forward() {
            leg.earliest_departure_time(time)
        } else {
            leg.latest_arrival_time(time)
        }
    }

    /// The first trip that can be boarded at `stop_pos` no earlier than `earliest_board_time`.
    /// Trips are sorted by departure, so the search walks backwards from the last trip and stops
    /// at the first one that leaves too early.
    pub fn find_trip<'d, D: TransitDataProvider>(
        &self,
        data: &'d D,
        route: RouteIndex,
        stop_pos: usize,
        earliest_board_time: Timestamp,
    ) -> Option<D::Trip<'d>> {
        let num_trips = data.num_trips(route) as TripIndex;
        if self.is_forward() {
            (0..num_trips)
                .rev()
                .map(|trip_idx| data.trip(route, trip_idx))
                .take_while(|trip| trip.departure(stop_pos) >= earliest_board_time)
                .filter(|trip| trip.can_board(stop_pos))
                .last()
        } else {
            (0..num_trips)
                .map(|trip_idx| data.trip(route, trip_idx))
                .take_while(|trip| trip.arrival(stop_pos) <= earliest_board_time)
                .filter(|trip| trip.can_alight(stop_pos))
                .last()
        }
    }

    pub fn transfers<'d, D: TransitDataProvider>(&self, data: &'d D, stop: StopIndex) -> &'d [Transfer] {
        if self.is_forward() {
            data.transfers_from_stop(stop)
        } else {
            data.transfers_to_stop(stop)
        }
    }

    pub fn transfer_target(&self, transfer: &Transfer) -> StopIndex {
        if self.is_forward() {
            transfer.to_stop
        } else {
            transfer.from_stop
        }
    }

    /// The stop of a via connection that the search reaches first.
    pub fn via_source(&self, connection: &ViaConnection) -> StopIndex {
        if self.is_forward() {
            connection.from_stop
        } else {
            connection.to_stop
        }
    }

    pub fn via_target(&self, connection: &ViaConnection) -> StopIndex {
        if self.is_forward() {
            connection.to_stop
        } else {
            connection.from_stop
        }
    }

    /// Cost of a ride made independent of where it was boarded, so rides on the same trip can be
    /// compared: riding on adds the same cost to both.
    pub fn relative_c1(&self, c1: Cost, board_time: Timestamp, transit_reluctance: f64) -> i64 {
        let ride_cost = (transit_reluctance * board_time as f64).round() as i64;
        if self.is_forward() {
            c1 as i64 - ride_cost
        } else {
            c1 as i64 + ride_cost
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrivalTag {
    Access,
    /// Handed over from the previous via-segment.
    Seed,
    Transit,
    Transfer,
}

/// A stop arrival as seen by the per-stop Pareto sets and their listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArrivalView {
    /// Position of the full arrival in the worker's arena.
    pub index: usize,
    pub stop: StopIndex,
    pub time: Timestamp,
    pub c1: Cost,
    pub c2: u32,
    pub rides: u8,
    pub walking: bool,
    pub tag: ArrivalTag,
}

#[derive(Clone, Debug)]
pub(crate) enum ArrivalKind {
    Access {
        leg: usize,
    },
    OnBoardAccess {
        leg: usize,
    },
    Seed {
        prefix: Arc<PathPrefix>,
    },
    /// Boarded at `from_*`, alighted at this arrival's stop. Positions and times are in search
    /// order: for a reverse search `from` is where the vehicle is left.
    Transit {
        route: RouteIndex,
        trip: TripIndex,
        from_stop: StopIndex,
        from_pos: usize,
        from_time: Timestamp,
        to_pos: usize,
        to_time: Timestamp,
    },
    Transfer {
        from_stop: StopIndex,
        duration: Timestamp,
    },
}

impl ArrivalKind {
    fn tag(&self) -> ArrivalTag {
        match self {
            Self::Access { .. } | Self::OnBoardAccess { .. } => ArrivalTag::Access,
            Self::Seed { .. } => ArrivalTag::Seed,
            Self::Transit { .. } => ArrivalTag::Transit,
            Self::Transfer { .. } => ArrivalTag::Transfer,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct StopArrival {
    pub round: usize,
    pub stop: StopIndex,
    pub time: Timestamp,
    pub c1: Cost,
    pub c2: u32,
    pub rides: u8,
    pub walking: bool,
    pub prev: Option<usize>,
    pub kind: ArrivalKind,
}

/// A trip boarded during a route scan. The route bag keeps the rides that are Pareto-optimal so
/// far along the route.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Ride {
    pub prev: usize,
    pub trip: TripIndex,
    pub board_stop: StopIndex,
    pub board_pos: usize,
    pub board_time: Timestamp,
    pub c1: Cost,
    pub relative_c1: i64,
    pub rides: u8,
    pub c2: u32,
}

/// Work handed from one via-segment to the next.
#[derive(Clone, Debug)]
pub(crate) enum SegmentSeed {
    Stop {
        stop: StopIndex,
        time: Timestamp,
        c1: Cost,
        c2: u32,
        rides: u8,
        walking: bool,
        prefix: Arc<PathPrefix>,
    },
    /// The traveler stays on board through a pass-through location.
    OnBoard {
        route: RouteIndex,
        trip: TripIndex,
        stop_pos: usize,
        stop: StopIndex,
        time: Timestamp,
        c1: Cost,
        c2: u32,
        rides: u8,
        prefix: Arc<PathPrefix>,
    },
}

/// Best single-criterion values per stop over a whole search.
#[derive(Clone, Debug)]
pub struct SingleCriteriaStopArrivals {
    calculator: TransitCalculator,
    best_overall: Vec<Timestamp>,
    best_transit: Vec<Timestamp>,
    fewest_rides: Vec<u8>,
}

impl SingleCriteriaStopArrivals {
    pub fn new(num_stops: usize, calculator: TransitCalculator) -> Self {
        Self {
            calculator,
            best_overall: vec![calculator.unreached(); num_stops],
            best_transit: vec![calculator.unreached(); num_stops],
            fewest_rides: vec![u8::MAX; num_stops],
        }
    }

    fn update(&mut self, view: &ArrivalView) {
        let stop = view.stop as usize;
        if self.calculator.is_better(view.time, self.best_overall[stop]) {
            self.best_overall[stop] = view.time;
        }
        if view.tag == ArrivalTag::Transit && self.calculator.is_better(view.time, self.best_transit[stop]) {
            self.best_transit[stop] = view.time;
        }
        self.fewest_rides[stop] = self.fewest_rides[stop].min(view.rides);
    }

    fn reached(&self, time: Timestamp) -> Option<Timestamp> { (time != self.calculator.unreached()).then_some(time) }

    pub fn best_overall_arrival_time(&self, stop: StopIndex) -> Option<Timestamp> {
        self.reached(self.best_overall[stop as usize])
    }

    pub fn best_transit_arrival_time(&self, stop: StopIndex) -> Option<Timestamp> {
        self.reached(self.best_transit[stop as usize])
    }

    pub fn fewest_rides(&self, stop: StopIndex) -> Option<u8> {
        let rides = self.fewest_rides[stop as usize];
        (rides != u8::MAX).then_some(rides)
    }

    pub fn fewest_transfers(&self, stop: StopIndex) -> Option<u8> {
        self.fewest_rides(stop).map(|rides| rides.saturating_sub(1))
    }

    pub fn num_reached(&self) -> usize { self.fewest_rides.iter().filter(|&&rides| rides != u8::MAX).count() }
}

struct McStopArrivals {
    sets: Vec<ParetoSet<ArrivalView, ParetoCriteria<ArrivalView>>>,
    touched: Vec<bool>,
    touched_stops: Vec<StopIndex>,
    best: SingleCriteriaStopArrivals,
}

impl McStopArrivals {
    fn new(
        num_stops: usize,
        criteria: ParetoCriteria<ArrivalView>,
        listener: Option<Arc<dyn ParetoSetEventListener<ArrivalView>>>,
        calculator: TransitCalculator,
    ) -> Self {
        Self {
            sets: (0..num_stops).map(|_| ParetoSet::with_listener(criteria.clone(), listener.clone())).collect(),
            touched: vec![false; num_stops],
            touched_stops: Vec::new(),
            best: SingleCriteriaStopArrivals::new(num_stops, calculator),
        }
    }

    fn add(&mut self, view: ArrivalView) -> bool {
        let stop = view.stop as usize;
        if !self.sets[stop].add(view) {
            return false;
        }
        self.best.update(&view);
        if !self.touched[stop] {
            self.touched[stop] = true;
            self.touched_stops.push(view.stop);
        }
        true
    }

    fn after_marker(&self, stop: StopIndex) -> &[ArrivalView] { self.sets[stop as usize].elements_after_marker() }

    /// Arrivals left over from the last round of the previous iteration are old news.
    fn start_iteration(&mut self) {
        for stop in self.touched_stops.drain(..) {
            self.touched[stop as usize] = false;
            self.sets[stop as usize].mark_at_end_of_set();
        }
    }

    /// Copies the arrivals of the round just finished into `prev_round` and starts a new round.
    fn snapshot_round(&mut self, prev_round: &mut [Vec<ArrivalView>], prev_touched: &mut Vec<StopIndex>) {
        for stop in self.touched_stops.drain(..) {
            let set = &mut self.sets[stop as usize];
            self.touched[stop as usize] = false;
            prev_round[stop as usize].extend_from_slice(set.elements_after_marker());
            set.mark_at_end_of_set();
            prev_touched.push(stop);
        }
    }
}

pub(crate) struct SegmentWorker<'a, D: TransitDataProvider> {
    ctx: &'a SearchContext<'a, D>,
    segment: usize,
    origin_legs: Vec<AccessEgress>,
    target_legs: HashMap<StopIndex, Vec<AccessEgress>>,
    handoff: Option<&'a ViaLocation>,
    handoff_connections: HashMap<StopIndex, Vec<&'a ViaConnection>>,
    arena: Vec<StopArrival>,
    arena_limit: usize,
    arrivals: McStopArrivals,
    route_bag: ParetoSet<Ride, ParetoCriteria<Ride>>,
    paths: ParetoSet<RaptorPath, ParetoCriteria<RaptorPath>>,
    handoffs: Vec<SegmentSeed>,
    // Arrivals of the previous round, indexed by stop.
    prev_round: Vec<Vec<ArrivalView>>,
    prev_touched: Vec<StopIndex>,
    // The equivalent of the set Q in the RAPTOR paper, as a scan index per route.
    earliest_stop_for_route: Vec<Option<usize>>,
    pending_rides: Vec<(RouteIndex, usize, Ride)>,
    on_board_seeded: bool,
    iteration_time: Timestamp,
    ride_scratch: Vec<Ride>,
    view_scratch: Vec<ArrivalView>,
    stop_scratch: Vec<StopIndex>,
    timers: SearchTimers,
}

impl<'a, D: TransitDataProvider> SegmentWorker<'a, D> {
    pub(crate) fn new(ctx: &'a SearchContext<'a, D>, segment: SegmentContext<'a>, enable_timers: bool) -> Self {
        let data = ctx.data;
        let calculator = ctx.calculator;
        let multi_criteria = ctx.params().is_multi_criteria();

        let (origin, target, handoff) = match ctx.params().direction {
            SearchDirection::Forward => (segment.access_paths, segment.egress_paths, segment.via),
            SearchDirection::Reverse => (
                segment.egress_paths,
                segment.access_paths,
                segment.index.checked_sub(1).and_then(|i| ctx.request.via_locations.get(i)),
            ),
        };

        let origin: Vec<AccessEgress> = origin.into_iter().cloned().collect();
        let origin_legs = remove_non_optimal_paths(&origin, multi_criteria);
        let target: Vec<AccessEgress> = target.into_iter().cloned().collect();
        let mut target_legs: HashMap<StopIndex, Vec<AccessEgress>> = HashMap::new();
        for leg in remove_non_optimal_paths(&target, multi_criteria) {
            target_legs.entry(leg.stop()).or_default().push(leg);
        }

        let mut handoff_connections: HashMap<StopIndex, Vec<&'a ViaConnection>> = HashMap::new();
        for connection in handoff.into_iter().flat_map(|via| &via.connections) {
            handoff_connections.entry(calculator.via_source(connection)).or_default().push(connection);
        }

        debug!(
            "Segment {}: {} origin legs, {} target stops, {} via connections.",
            segment.index,
            origin_legs.len(),
            target_legs.len(),
            handoff_connections.len()
        );

        Self {
            ctx,
            segment: segment.index,
            origin_legs,
            target_legs,
            handoff,
            handoff_connections,
            arena: Vec::new(),
            arena_limit: MIN_ARENA_COMPACTION,
            arrivals: McStopArrivals::new(
                data.num_stops(),
                ctx.arrival_criteria(),
                ctx.request.stop_arrival_listener.clone(),
                calculator,
            ),
            route_bag: ParetoSet::new(ctx.ride_criteria()),
            paths: ParetoSet::new(ctx.path_criteria()),
            handoffs: Vec::new(),
            prev_round: vec![Vec::new(); data.num_stops()],
            prev_touched: Vec::new(),
            earliest_stop_for_route: vec![None; data.num_routes()],
            pending_rides: Vec::new(),
            on_board_seeded: false,
            iteration_time: 0,
            ride_scratch: Vec::new(),
            view_scratch: Vec::new(),
            stop_scratch: Vec::new(),
            timers: SearchTimers::new(enable_timers),
        }
    }

    /// Runs all rounds for one iteration time and returns the seeds for the next segment.
    pub(crate) fn run_iteration(&mut self, iteration_time: Timestamp, seeds: &[SegmentSeed]) -> Vec<SegmentSeed> {
        let route_timer = self.timers.start();
        self.iteration_time = iteration_time;
        self.arrivals.start_iteration();
        self.pending_rides.clear();
        self.maybe_compact_arena();

        self.seed_origin(iteration_time);
        self.seed_from_previous_segment(seeds);
        self.relax_transfers(0);
        self.relax_egress();
        self.collect_visit_seeds();

        for round in 1..=self.ctx.params().max_rounds {
            if utils::is_zero(&self.arrivals.touched) && (round > 1 || self.pending_rides.is_empty()) {
                break;
            }
            self.prepare_round();

            let transit_timer = self.timers.start();
            self.scan_routes(round);
            self.timers.stop(TimerPhase::Transit, transit_timer);

            let transfer_timer = self.timers.start();
            self.relax_transfers(round);
            self.timers.stop(TimerPhase::Transfers, transfer_timer);

            self.relax_egress();
            self.collect_visit_seeds();
            trace!(
                "Segment {} at {}, round {round}: {} stops improved.",
                self.segment,
                utils::get_time_str(iteration_time),
                self.arrivals.touched_stops.len()
            );
        }

        self.timers.stop(TimerPhase::Route, route_timer);
        std::mem::take(&mut self.handoffs)
    }

    fn maybe_compact_arena(&mut self) {
        if self.arena.len() < self.arena_limit {
            return;
        }
        let before = self.arena.len();
        self.compact_arena();
        self.arena_limit = (2 * self.arena.len()).max(MIN_ARENA_COMPACTION);
        trace!("Segment {}: arena compacted from {before} to {} arrivals.", self.segment, self.arena.len());
    }

    /// Drops the arena entries no stop arrival leads back to and renumbers the rest. Only valid
    /// between iterations, when no pending ride refers to the arena.
    fn compact_arena(&mut self) {
        let mut live = vec![false; self.arena.len()];
        let mut stack: Vec<usize> =
            self.arrivals.sets.iter().flat_map(|set| set.iter().map(|view| view.index)).collect();
        while let Some(i) = stack.pop() {
            if std::mem::replace(&mut live[i], true) {
                continue;
            }
            if let Some(prev) = self.arena[i].prev {
                stack.push(prev);
            }
        }

        let mut remap = vec![usize::MAX; self.arena.len()];
        let mut next = 0;
        for (i, &keep) in live.iter().enumerate() {
            if keep {
                remap[i] = next;
                next += 1;
            }
        }
        let mut pos = 0;
        self.arena.retain(|_| {
            pos += 1;
            live[pos - 1]
        });

        for arrival in &mut self.arena {
            arrival.prev = arrival.prev.map(|prev| remap[prev]);
        }
        for set in &mut self.arrivals.sets {
            for view in set.iter_mut() {
                view.index = remap[view.index];
            }
        }
        for &stop in &self.prev_touched {
            self.prev_round[stop as usize].clear();
        }
        self.prev_touched.clear();
    }

    fn add_arrival(&mut self, arrival: StopArrival) -> bool {
        let view = ArrivalView {
            index: self.arena.len(),
            stop: arrival.stop,
            time: arrival.time,
            c1: arrival.c1,
            c2: arrival.c2,
            rides: arrival.rides,
            walking: arrival.walking,
            tag: arrival.kind.tag(),
        };
        if !self.arrivals.add(view) {
            return false;
        }
        self.arena.push(arrival);
        true
    }

    // Arena entries that no stop set refers to, such as the root of a ride that starts on board.
    fn push_detached(&mut self, arrival: StopArrival) -> usize {
        self.arena.push(arrival);
        self.arena.len() - 1
    }

    fn queue_ride(&mut self, route: RouteIndex, ride: Ride) {
        let num_stops = self.ctx.data.stops_in_route(route).len();
        let scan_idx = self.ctx.calculator.scan_index(ride.board_pos, num_stops);
        self.pending_rides.push((route, scan_idx, ride));
    }

    fn seed_origin(&mut self, iteration_time: Timestamp) {
        let ctx = self.ctx;
        let calculator = ctx.calculator;

        for leg_idx in 0..self.origin_legs.len() {
            let leg = &self.origin_legs[leg_idx];

            if let Some(&on_board) = leg.as_on_board() {
                // The trip is fixed, so one seed covers every iteration.
                if self.on_board_seeded {
                    continue;
                }
                let c1 = leg.c1();
                let trip = ctx.data.trip(on_board.route, on_board.trip);
                let board_time = calculator.board_time(&trip, on_board.stop_pos);
                let root = self.push_detached(StopArrival {
                    round: 0,
                    stop: on_board.stop,
                    time: board_time,
                    c1,
                    c2: 0,
                    rides: 0,
                    walking: false,
                    prev: None,
                    kind: ArrivalKind::OnBoardAccess { leg: leg_idx },
                });
                let ride = Ride {
                    prev: root,
                    trip: on_board.trip,
                    board_stop: on_board.stop,
                    board_pos: on_board.stop_pos,
                    board_time,
                    c1,
                    relative_c1: calculator.relative_c1(c1, board_time, ctx.params().cost.transit_reluctance),
                    rides: 1,
                    c2: ctx.merge_group(0, on_board.route),
                };
                self.queue_ride(on_board.route, ride);
                continue;
            }

            let Some(departure) = calculator.leg_departure_time(leg, iteration_time) else {
                continue;
            };
            let time = calculator.plus(departure, leg.duration());
            if !ctx.within_time_limit(time) {
                continue;
            }
            let arrival = StopArrival {
                round: 0,
                stop: leg.stop(),
                time,
                c1: leg.c1(),
                c2: 0,
                rides: 0,
                walking: leg.stop_reached_by_walking(),
                prev: None,
                kind: ArrivalKind::Access { leg: leg_idx },
            };
            self.add_arrival(arrival);
        }
        self.on_board_seeded = true;
    }

    fn seed_from_previous_segment(&mut self, seeds: &[SegmentSeed]) {
        let ctx = self.ctx;
        for seed in seeds {
            match seed {
                SegmentSeed::Stop { stop, time, c1, c2, rides, walking, prefix } => {
                    self.add_arrival(StopArrival {
                        round: 0,
                        stop: *stop,
                        time: *time,
                        c1: *c1,
                        c2: *c2,
                        rides: *rides,
                        walking: *walking,
                        prev: None,
                        kind: ArrivalKind::Seed { prefix: prefix.clone() },
                    });
                }
                SegmentSeed::OnBoard { route, trip, stop_pos, stop, time, c1, c2, rides, prefix } => {
                    let root = self.push_detached(StopArrival {
                        round: 0,
                        stop: *stop,
                        time: *time,
                        c1: *c1,
                        c2: *c2,
                        rides: *rides,
                        walking: false,
                        prev: None,
                        kind: ArrivalKind::Seed { prefix: prefix.clone() },
                    });
                    let ride = Ride {
                        prev: root,
                        trip: *trip,
                        board_stop: *stop,
                        board_pos: *stop_pos,
                        board_time: *time,
                        c1: *c1,
                        relative_c1: ctx.calculator.relative_c1(*c1, *time, ctx.params().cost.transit_reluctance),
                        rides: *rides,
                        c2: *c2,
                    };
                    self.queue_ride(*route, ride);
                }
            }
        }
    }

    fn prepare_round(&mut self) {
        for &stop in &self.prev_touched {
            self.prev_round[stop as usize].clear();
        }
        self.prev_touched.clear();
        self.arrivals.snapshot_round(&mut self.prev_round, &mut self.prev_touched);
    }

    fn scan_routes(&mut self, round: usize) {
        let data = self.ctx.data;
        let calculator = self.ctx.calculator;

        self.earliest_stop_for_route.fill(None);
        for &stop in &self.prev_touched {
            for &route in data.routes_for_stop(stop) {
                let stops = data.stops_in_route(route);
                let num_stops = stops.len();
                let earliest = &mut self.earliest_stop_for_route[route as usize];
                let limit = earliest.unwrap_or(num_stops);
                if let Some(scan_idx) = (0..limit).find(|&i| stops[calculator.stop_pos(i, num_stops)] == stop) {
                    *earliest = Some(scan_idx);
                }
            }
        }
        if round == 1 {
            for &(route, scan_idx, _) in &self.pending_rides {
                let earliest = &mut self.earliest_stop_for_route[route as usize];
                *earliest = Some(earliest.map_or(scan_idx, |e| e.min(scan_idx)));
            }
        }

        for route in 0..self.earliest_stop_for_route.len() {
            if let Some(start) = self.earliest_stop_for_route[route] {
                self.scan_route(route as RouteIndex, start, round);
            }
        }
    }

    fn scan_route(&mut self, route: RouteIndex, start: usize, round: usize) {
        let ctx = self.ctx;
        let calculator = ctx.calculator;
        let stops = ctx.data.stops_in_route(route);
        let num_stops = stops.len();
        let pass_through = self.handoff.is_some_and(ViaLocation::is_pass_through);
        let mut rides = std::mem::take(&mut self.ride_scratch);
        self.route_bag.clear();

        for scan_idx in start..num_stops {
            let stop_pos = calculator.stop_pos(scan_idx, num_stops);
            let stop = stops[stop_pos];

            // Alight before boarding, so a ride never ends where it started.
            if !self.route_bag.is_empty() {
                rides.clear();
                rides.extend_from_slice(self.route_bag.as_slice());
                for ride in &rides {
                    self.alight(route, ride, stop, stop_pos, round);
                }
                if pass_through && self.handoff_connections.contains_key(&stop) {
                    self.pass_through_seeds(route, stop, stop_pos, round, &rides);
                }
            }

            if round == 1 {
                for &(seed_route, seed_idx, ride) in &self.pending_rides {
                    if seed_route == route && seed_idx == scan_idx {
                        self.route_bag.add(ride);
                    }
                }
            }

            for i in 0..self.prev_round[stop as usize].len() {
                let arrival = self.prev_round[stop as usize][i];
                if let Some(ride) = self.board(route, &arrival, stop, stop_pos) {
                    self.route_bag.add(ride);
                }
            }
        }

        self.ride_scratch = rides;
    }

    fn board(&self, route: RouteIndex, arrival: &ArrivalView, stop: StopIndex, stop_pos: usize) -> Option<Ride> {
        let ctx = self.ctx;
        let params = ctx.params();
        let calculator = ctx.calculator;
        if arrival.rides as usize >= params.max_rounds {
            return None;
        }

        // Access legs are time-shifted to arrive just in time, so they neither wait nor need the
        // stop's transfer time.
        let from_access = arrival.tag == ArrivalTag::Access;
        let transfer_time = if from_access { 0 } else { ctx.data.transfer_time(stop) };
        let earliest_board_time = calculator.plus(arrival.time, calculator.board_slack(ctx.slack) + transfer_time);

        let trip = calculator.find_trip(ctx.data, route, stop_pos, earliest_board_time)?;
        let board_time = calculator.board_time(&trip, stop_pos);
        let wait_time = if from_access { 0 } else { (board_time - arrival.time).abs() };
        let c1 = arrival.c1 + params.cost.boarding_cost(arrival.rides == 0, wait_time);

        Some(Ride {
            prev: arrival.index,
            trip: trip.trip_index(),
            board_stop: stop,
            board_pos: stop_pos,
            board_time,
            c1,
            relative_c1: calculator.relative_c1(c1, board_time, params.cost.transit_reluctance),
            rides: arrival.rides + 1,
            c2: ctx.merge_group(arrival.c2, route),
        })
    }

    fn alight(&mut self, route: RouteIndex, ride: &Ride, stop: StopIndex, stop_pos: usize, round: usize) {
        let ctx = self.ctx;
        let calculator = ctx.calculator;
        let trip = ctx.data.trip(route, ride.trip);
        if !calculator.can_alight(&trip, stop_pos) {
            return;
        }

        let alight_time = calculator.alight_time(&trip, stop_pos);
        let time = calculator.plus(alight_time, calculator.alight_slack(ctx.slack));
        if !ctx.within_time_limit(time) {
            return;
        }

        let c1 = ride.c1 + ctx.params().cost.transit_cost((alight_time - ride.board_time).abs());
        self.add_arrival(StopArrival {
            round,
            stop,
            time,
            c1,
            c2: ride.c2,
            rides: ride.rides,
            walking: false,
            prev: Some(ride.prev),
            kind: ArrivalKind::Transit {
                route,
                trip: ride.trip,
                from_stop: ride.board_stop,
                from_pos: ride.board_pos,
                from_time: ride.board_time,
                to_pos: stop_pos,
                to_time: alight_time,
            },
        });
    }

    // Rides passing a pass-through stop continue on the same trip in the next segment.
    fn pass_through_seeds(&mut self, route: RouteIndex, stop: StopIndex, stop_pos: usize, round: usize, rides: &[Ride]) {
        let ctx = self.ctx;
        let calculator = ctx.calculator;

        for ride in rides {
            let trip = ctx.data.trip(route, ride.trip);
            let passing_time = calculator.alight_time(&trip, stop_pos);
            let continue_time = calculator.board_time(&trip, stop_pos);
            if !ctx.within_time_limit(continue_time) {
                continue;
            }

            let c1 = ride.c1 + ctx.params().cost.transit_cost((continue_time - ride.board_time).abs());
            let index = self.push_detached(StopArrival {
                round,
                stop,
                time: passing_time,
                c1,
                c2: ride.c2,
                rides: ride.rides,
                walking: false,
                prev: Some(ride.prev),
                kind: ArrivalKind::Transit {
                    route,
                    trip: ride.trip,
                    from_stop: ride.board_stop,
                    from_pos: ride.board_pos,
                    from_time: ride.board_time,
                    to_pos: stop_pos,
                    to_time: passing_time,
                },
            });
            let prefix = path::prefix_for(ctx, &self.arena, &self.origin_legs, index, None);
            self.handoffs.push(SegmentSeed::OnBoard {
                route,
                trip: ride.trip,
                stop_pos,
                stop,
                time: continue_time,
                c1,
                c2: ride.c2,
                rides: ride.rides,
                prefix,
            });
        }
    }

    fn relax_transfers(&mut self, round: usize) {
        let ctx = self.ctx;
        let calculator = ctx.calculator;
        let allow_walk_chaining = ctx.params().allow_walk_chaining;
        let mut stops = std::mem::take(&mut self.stop_scratch);
        let mut views = std::mem::take(&mut self.view_scratch);
        stops.clear();
        stops.extend_from_slice(&self.arrivals.touched_stops);

        for &stop in &stops {
            views.clear();
            views.extend(
                self.arrivals
                    .after_marker(stop)
                    .iter()
                    .filter(|a| a.tag != ArrivalTag::Transfer && (allow_walk_chaining || !a.walking)),
            );
            for arrival in &views {
                for transfer in calculator.transfers(ctx.data, stop) {
                    let time = calculator.plus(arrival.time, transfer.duration);
                    if !ctx.within_time_limit(time) {
                        continue;
                    }
                    self.add_arrival(StopArrival {
                        round,
                        stop: calculator.transfer_target(transfer),
                        time,
                        c1: arrival.c1 + transfer.c1,
                        c2: arrival.c2,
                        rides: arrival.rides,
                        walking: true,
                        prev: Some(arrival.index),
                        kind: ArrivalKind::Transfer { from_stop: stop, duration: transfer.duration },
                    });
                }
            }
        }

        self.stop_scratch = stops;
        self.view_scratch = views;
    }

    fn relax_egress(&mut self) {
        if self.target_legs.is_empty() {
            return;
        }
        let ctx = self.ctx;
        let calculator = ctx.calculator;
        let allow_walk_chaining = ctx.params().allow_walk_chaining;
        let mut views = std::mem::take(&mut self.view_scratch);

        for i in 0..self.arrivals.touched_stops.len() {
            let stop = self.arrivals.touched_stops[i];
            let Some(legs) = self.target_legs.get(&stop) else {
                continue;
            };
            views.clear();
            views.extend(self.arrivals.after_marker(stop).iter().filter(|a| a.rides > 0));

            for arrival in &views {
                for leg in legs {
                    if arrival.walking && leg.stop_reached_by_walking() && !allow_walk_chaining {
                        continue;
                    }
                    let Some(departure) = calculator.leg_departure_time(leg, arrival.time) else {
                        continue;
                    };
                    if !ctx.within_time_limit(calculator.plus(departure, leg.duration())) {
                        continue;
                    }
                    let bounds = path::path_bounds(ctx, &self.arena, &self.origin_legs, arrival.index, leg);
                    if let Some((start_time, end_time)) = bounds {
                        let c1 = arrival.c1 + leg.c1();
                        let candidate =
                            RaptorPath::without_legs(start_time, end_time, arrival.rides as usize, c1, arrival.c2);
                        if !self.paths.qualify(&candidate) {
                            continue;
                        }
                    }
                    let path =
                        path::build_path(ctx, &self.arena, &self.origin_legs, arrival.index, leg, self.iteration_time);
                    self.paths.add(path);
                }
            }
        }

        self.view_scratch = views;
    }

    fn collect_visit_seeds(&mut self) {
        let Some(via) = self.handoff else {
            return;
        };
        let ctx = self.ctx;
        let calculator = ctx.calculator;
        let minimum_wait_time = via.minimum_wait_time();
        let mut views = std::mem::take(&mut self.view_scratch);

        for i in 0..self.arrivals.touched_stops.len() {
            let stop = self.arrivals.touched_stops[i];
            let Some(connections) = self.handoff_connections.get(&stop) else {
                continue;
            };
            // Staying on board is handled during the route scan; here only alightings count.
            views.clear();
            views.extend(
                self.arrivals
                    .after_marker(stop)
                    .iter()
                    .filter(|a| !via.is_pass_through() || a.tag == ArrivalTag::Transit),
            );

            for arrival in &views {
                // Connections without a walk share the prefix of the arrival.
                let mut stop_prefix: Option<Arc<PathPrefix>> = None;
                for &connection in connections {
                    let time = calculator.plus(arrival.time, minimum_wait_time + connection.duration);
                    if !ctx.within_time_limit(time) {
                        continue;
                    }
                    let prefix = if connection.is_transfer() {
                        let walk = path::via_transfer_leg(calculator, connection, arrival.time, minimum_wait_time);
                        path::prefix_for(ctx, &self.arena, &self.origin_legs, arrival.index, Some(walk))
                    } else {
                        stop_prefix
                            .get_or_insert_with(|| {
                                path::prefix_for(ctx, &self.arena, &self.origin_legs, arrival.index, None)
                            })
                            .clone()
                    };
                    self.handoffs.push(SegmentSeed::Stop {
                        stop: calculator.via_target(connection),
                        time,
                        c1: arrival.c1 + connection.c1,
                        c2: arrival.c2,
                        rides: arrival.rides,
                        walking: arrival.walking || connection.is_transfer(),
                        prefix,
                    });
                }
            }
        }

        self.view_scratch = views;
    }

    fn into_parts(self) -> (Vec<RaptorPath>, SingleCriteriaStopArrivals, SearchTimers) {
        (self.paths.into_vec(), self.arrivals.best, self.timers)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Initialized,
    Iterating,
    Converged,
    BudgetExhausted,
}

/// Limits on the work of one request. Clones share the iteration counter, so sub-searches
/// running in parallel draw from the same budget.
#[derive(Clone, Debug)]
pub struct SearchBudget {
    max_iterations: Option<usize>,
    deadline: Option<Instant>,
    started: Arc<AtomicUsize>,
}

impl SearchBudget {
    pub fn new(max_iterations: Option<usize>, timeout: Option<Duration>) -> Self {
        Self {
            max_iterations,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
            started: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unlimited() -> Self { Self::new(None, None) }

    pub fn try_start_iteration(&self) -> bool {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return false;
        }
        let started = self.started.fetch_add(1, Ordering::Relaxed);
        self.max_iterations.is_none_or(|max| started < max)
    }
}

/// Runs the via-segment workers of one request over a list of iteration times.
pub struct RangeRaptorSearch<'a, D: TransitDataProvider> {
    ctx: &'a SearchContext<'a, D>,
    workers: Vec<SegmentWorker<'a, D>>,
    budget: SearchBudget,
    state: WorkerState,
    iterations: usize,
}

impl<'a, D: TransitDataProvider> RangeRaptorSearch<'a, D> {
    pub fn new(ctx: &'a SearchContext<'a, D>, budget: SearchBudget, enable_timers: bool) -> Self {
        let mut workers: Vec<_> =
            ctx.segments().into_iter().map(|segment| SegmentWorker::new(ctx, segment, enable_timers)).collect();
        if !ctx.calculator.is_forward() {
            workers.reverse();
        }
        Self {
            ctx,
            workers,
            budget,
            state: WorkerState::Initialized,
            iterations: 0,
        }
    }

    pub fn run(mut self, iteration_times: &[Timestamp]) -> RaptorRouterResult {
        self.state = WorkerState::Iterating;
        for &iteration_time in iteration_times {
            if !self.budget.try_start_iteration() {
                warn!(
                    "Search budget exhausted after {} iterations, returning partial result.",
                    self.iterations
                );
                self.state = WorkerState::BudgetExhausted;
                break;
            }
            let mut seeds = Vec::new();
            for worker in &mut self.workers {
                seeds = worker.run_iteration(iteration_time, &seeds);
            }
            self.iterations += 1;
        }
        if self.state == WorkerState::Iterating {
            self.state = WorkerState::Converged;
        }
        self.into_result()
    }

    fn into_result(self) -> RaptorRouterResult {
        let mut paths = ParetoSet::new(self.ctx.path_criteria());
        let mut timers = SearchTimers::default();
        let mut diagnostics = None;
        for worker in self.workers {
            let (worker_paths, best, worker_timers) = worker.into_parts();
            paths.add_all(worker_paths);
            timers.merge(&worker_timers);
            diagnostics = Some(best);
        }
        debug!("Search finished after {} iterations with {} paths.", self.iterations, paths.len());

        RaptorRouterResult {
            paths: paths.into_vec(),
            iterations: self.iterations,
            state: self.state,
            diagnostics,
            timers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RaptorRequest, SearchParams};
    use crate::network::{Network, NetworkBuilder, StopTime};

    // A: 08:00, B: 08:10, C: 08:20 on trips every 15 minutes from 08:00.
    fn line() -> Network {
        let mut builder = NetworkBuilder::new(0);
        let route = builder.add_route("L1", &["A", "B", "C"]);
        for i in 0..4 {
            let start = 8 * 3600 + i * 900;
            builder.add_trip(route, &[(start, start), (start + 600, start + 600), (start + 1200, start + 1200)]);
        }
        let mut no_boarding = StopTime::new(9 * 3600, 9 * 3600);
        no_boarding.boarding = false;
        builder.add_trip_with_stop_times(
            route,
            vec![
                no_boarding,
                StopTime::new(9 * 3600 + 600, 9 * 3600 + 600),
                StopTime::new(9 * 3600 + 1200, 9 * 3600 + 1200),
            ],
        );
        builder.build()
    }

    #[test]
    fn calculator_arithmetic() {
        let forward = TransitCalculator::new(SearchDirection::Forward);
        let reverse = TransitCalculator::new(SearchDirection::Reverse);
        assert_eq!(forward.plus(100, 20), 120);
        assert_eq!(reverse.plus(100, 20), 80);
        assert_eq!(reverse.minus(100, 20), 120);
        assert!(forward.is_better(10, 20));
        assert!(reverse.is_better(20, 10));
        assert_eq!(forward.stop_pos(0, 5), 0);
        assert_eq!(reverse.stop_pos(0, 5), 4);
        assert_eq!(reverse.scan_index(reverse.stop_pos(3, 5), 5), 3);
    }

    #[test]
    fn forward_trip_search_finds_earliest_boardable() {
        let network = line();
        let forward = TransitCalculator::new(SearchDirection::Forward);

        let trip = forward.find_trip(&network, 0, 0, 8 * 3600 + 1).unwrap();
        assert_eq!(trip.trip_index(), 1);

        let trip = forward.find_trip(&network, 0, 1, 8 * 3600 + 600).unwrap();
        assert_eq!(trip.trip_index(), 0);

        // The 09:00 trip does not pick up at A.
        assert!(forward.find_trip(&network, 0, 0, 8 * 3600 + 2701).is_none());
        assert_eq!(forward.find_trip(&network, 0, 1, 8 * 3600 + 2701).unwrap().trip_index(), 3);
    }

    #[test]
    fn reverse_trip_search_finds_latest_alightable() {
        let network = line();
        let reverse = TransitCalculator::new(SearchDirection::Reverse);

        let trip = reverse.find_trip(&network, 0, 2, 8 * 3600 + 2000).unwrap();
        assert_eq!(trip.trip_index(), 0);
        assert!(reverse.find_trip(&network, 0, 2, 8 * 3600 + 1199).is_none());
    }

    #[test]
    fn budget_counts_iterations() {
        let budget = SearchBudget::new(Some(2), None);
        let shared = budget.clone();
        assert!(budget.try_start_iteration());
        assert!(shared.try_start_iteration());
        assert!(!budget.try_start_iteration());

        let expired = SearchBudget::new(None, Some(Duration::ZERO));
        assert!(!expired.try_start_iteration());
        assert!(SearchBudget::unlimited().try_start_iteration());
    }

    fn run_worker<'a>(
        ctx: &'a SearchContext<'a, Network>,
        compact_every_iteration: bool,
    ) -> SegmentWorker<'a, Network> {
        let segment = ctx.segments().remove(0);
        let mut worker = SegmentWorker::new(ctx, segment, false);
        for time in ctx.iteration_times() {
            if compact_every_iteration {
                worker.compact_arena();
            }
            worker.run_iteration(time, &[]);
        }
        worker
    }

    fn window_request(network: &Network) -> RaptorRequest {
        let (a, b, c) = (network.get_stop_idx("A"), network.get_stop_idx("B"), network.get_stop_idx("C"));
        RaptorRequest::new(SearchParams::new(8 * 3600 - 600, 3600))
            .with_access(AccessEgress::walk(a, 120, 120))
            .with_access(AccessEgress::walk(b, 900, 300))
            .with_egress(AccessEgress::walk(c, 60, 60))
    }

    #[test]
    fn compacted_arena_gives_the_same_paths() {
        let network = line();
        let request = window_request(&network);
        let ctx = SearchContext::new(&request, &network);

        let plain = run_worker(&ctx, false);
        let mut compacted = run_worker(&ctx, true);
        let plain_len = plain.arena.len();
        compacted.compact_arena();
        assert!(compacted.arena.len() < plain_len, "{} >= {plain_len}", compacted.arena.len());

        // Every remaining entry is reachable and the views point at matching entries.
        for set in &compacted.arrivals.sets {
            for view in set.iter() {
                let arrival = &compacted.arena[view.index];
                assert_eq!((arrival.stop, arrival.time, arrival.c1), (view.stop, view.time, view.c1));
            }
        }
        for arrival in &compacted.arena {
            assert!(arrival.prev.is_none_or(|prev| prev < compacted.arena.len()));
        }

        let keys = |worker: SegmentWorker<'_, Network>| {
            let mut keys: Vec<_> = worker
                .paths
                .into_vec()
                .into_iter()
                .map(|p| (p.start_time, p.end_time, p.c1, p.legs.len()))
                .collect();
            keys.sort();
            keys
        };
        let expected = keys(plain);
        assert!(!expected.is_empty());
        assert_eq!(keys(compacted), expected);
    }

    #[test]
    fn path_bounds_match_built_paths() {
        let network = line();
        let forward = window_request(&network);
        let reverse = RaptorRequest {
            params: SearchParams::new(8 * 3600, 3600).with_latest_arrival_time(9 * 3600 + 1800).reverse(),
            ..forward.clone()
        };

        for request in [forward, reverse] {
            let ctx = SearchContext::new(&request, &network);
            let worker = run_worker(&ctx, false);
            let mut checked = 0;
            for (index, arrival) in worker.arena.iter().enumerate() {
                let Some(legs) = worker.target_legs.get(&arrival.stop) else {
                    continue;
                };
                for leg in legs {
                    let Some(bounds) = path::path_bounds(&ctx, &worker.arena, &worker.origin_legs, index, leg) else {
                        continue;
                    };
                    let path = path::build_path(&ctx, &worker.arena, &worker.origin_legs, index, leg, 0);
                    assert_eq!(bounds, (path.start_time, path.end_time), "{path:?}");
                    checked += 1;
                }
            }
            assert!(checked > 0);
        }
    }

    #[test]
    fn stop_connections_share_one_prefix() {
        let network = line();
        let (a, b, c) = (network.get_stop_idx("A"), network.get_stop_idx("B"), network.get_stop_idx("C"));
        let via = ViaLocation::visit("B", 0, &[b, b]);
        let request = RaptorRequest::new(SearchParams::new(8 * 3600, 0))
            .with_access(AccessEgress::walk(a, 0, 0))
            .with_egress(AccessEgress::walk(c, 0, 0))
            .with_via(via);
        let ctx = SearchContext::new(&request, &network);
        let segment = ctx.segments().remove(0);
        let mut worker = SegmentWorker::new(&ctx, segment, false);

        let seeds = worker.run_iteration(8 * 3600, &[]);
        let prefixes: Vec<_> = seeds
            .iter()
            .map(|seed| match seed {
                SegmentSeed::Stop { prefix, .. } | SegmentSeed::OnBoard { prefix, .. } => prefix,
            })
            .collect();
        assert_eq!(prefixes.len(), 2);
        assert!(Arc::ptr_eq(prefixes[0], prefixes[1]));
    }

    #[test]
    fn single_criteria_arrivals() {
        let mut best = SingleCriteriaStopArrivals::new(2, TransitCalculator::new(SearchDirection::Forward));
        assert_eq!(best.best_overall_arrival_time(0), None);
        let view = |time, rides, tag| ArrivalView {
            index: 0,
            stop: 0,
            time,
            c1: 0,
            c2: 0,
            rides,
            walking: false,
            tag,
        };
        best.update(&view(500, 2, ArrivalTag::Transfer));
        best.update(&view(700, 1, ArrivalTag::Transit));
        assert_eq!(best.best_overall_arrival_time(0), Some(500));
        assert_eq!(best.best_transit_arrival_time(0), Some(700));
        assert_eq!(best.fewest_transfers(0), Some(0));
        assert_eq!(best.num_reached(), 1);
    }
}
