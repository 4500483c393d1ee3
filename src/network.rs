use std::collections::HashMap;

use crate::transfer::{Transfer, TransferFilter, TransferIndex, TransferIndexError};

// Timestamp is seconds relative to the search reference point (not wall-clock), so it may be
// negative or exceed a day.
pub type Timestamp = i32;
pub type StopIndex = u32;
pub type RouteIndex = u32;
pub type TripIndex = u32;
pub type Cost = i32;

/// Read-only view of one scheduled trip on a route pattern.
pub trait TripSchedule {
    fn trip_index(&self) -> TripIndex;
    fn num_stops(&self) -> usize;
    fn arrival(&self, stop_pos: usize) -> Timestamp;
    fn departure(&self, stop_pos: usize) -> Timestamp;
    fn can_board(&self, stop_pos: usize) -> bool;
    fn can_alight(&self, stop_pos: usize) -> bool;
}

/// Slack added around every boarding and alighting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlackProvider {
    pub board_slack: Timestamp,
    pub alight_slack: Timestamp,
}

/// The transit data a search reads. Implementations must be safe to share between threads,
/// since every sub-search of a request (and every concurrent request) reads the same instance.
pub trait TransitDataProvider: Sync {
    type Trip<'a>: TripSchedule + Copy
    where
        Self: 'a;

    fn num_stops(&self) -> usize;
    fn num_routes(&self) -> usize;
    fn routes_for_stop(&self, stop: StopIndex) -> &[RouteIndex];
    fn stops_in_route(&self, route: RouteIndex) -> &[StopIndex];
    fn num_trips(&self, route: RouteIndex) -> usize;
    fn trip(&self, route: RouteIndex, trip: TripIndex) -> Self::Trip<'_>;
    fn transfers_from_stop(&self, stop: StopIndex) -> &[Transfer];
    fn transfers_to_stop(&self, stop: StopIndex) -> &[Transfer];
    fn slack(&self) -> SlackProvider;
    /// Minimum time needed to change vehicles at a stop.
    fn transfer_time(&self, stop: StopIndex) -> Timestamp;
    /// Bitmask of the transit-priority group the route belongs to.
    fn priority_group(&self, route: RouteIndex) -> u32;
    fn route_label(&self, route: RouteIndex) -> &str;
    fn stop_name(&self, stop: StopIndex) -> &str;

    /// Checked once per request, before any transfer is queried.
    fn check_transfers_indexed(&self) -> Result<(), TransferIndexError> { Ok(()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopTime {
    pub arrival_time: Timestamp,
    pub departure_time: Timestamp,
    pub boarding: bool,
    pub alighting: bool,
}

impl StopTime {
    pub fn new(arrival_time: Timestamp, departure_time: Timestamp) -> Self {
        Self { arrival_time, departure_time, boarding: true, alighting: true }
    }
}

pub struct Route {
    pub line: Box<str>,
    pub num_stops: usize,
    pub num_trips: TripIndex,
    pub route_stops_idx: usize,
    pub stop_times_idx: usize,
    pub priority_group: u32,
}

impl Route {
    pub fn get_stops<'a>(&self, route_stops: &'a [StopIndex]) -> &'a [StopIndex] {
        &route_stops[self.route_stops_idx..(self.route_stops_idx + self.num_stops)]
    }

    pub fn get_trip<'a>(&self, trip: usize, stop_times: &'a [StopTime]) -> &'a [StopTime] {
        let start = self.stop_times_idx + trip * self.num_stops;
        let end = start + self.num_stops;
        &stop_times[start..end]
    }
}

#[derive(Clone, Copy)]
pub struct TripView<'a> {
    trip_idx: TripIndex,
    stop_times: &'a [StopTime],
}

impl TripSchedule for TripView<'_> {
    fn trip_index(&self) -> TripIndex { self.trip_idx }

    fn num_stops(&self) -> usize { self.stop_times.len() }

    fn arrival(&self, stop_pos: usize) -> Timestamp { self.stop_times[stop_pos].arrival_time }

    fn departure(&self, stop_pos: usize) -> Timestamp { self.stop_times[stop_pos].departure_time }

    fn can_board(&self, stop_pos: usize) -> bool { self.stop_times[stop_pos].boarding }

    fn can_alight(&self, stop_pos: usize) -> bool { self.stop_times[stop_pos].alighting }
}

pub struct Stop {
    pub name: Box<str>,
    pub routes_idx: usize,
    pub num_routes: usize,
}

impl Stop {
    pub fn new(name: String) -> Self {
        Self {
            name: name.into_boxed_str(),
            routes_idx: 0,
            num_routes: 0,
        }
    }

    pub fn get_routes<'a>(&self, stop_routes: &'a [RouteIndex]) -> &'a [RouteIndex] {
        &stop_routes[self.routes_idx..(self.routes_idx + self.num_routes)]
    }
}

/// In-memory transit network with trips of each route stored back to back.
pub struct Network {
    pub routes: Vec<Route>,
    pub stops: Vec<Stop>,
    pub stop_index: HashMap<String, StopIndex>,
    pub stop_times: Vec<StopTime>,
    pub stop_routes: Vec<RouteIndex>,
    pub route_stops: Vec<StopIndex>,
    pub transfer_times: Vec<Timestamp>,
    pub transfers: TransferIndex,
    pub slack: SlackProvider,
}

impl Network {
    pub fn set_transfer_time_for_stop(&mut self, stop_name: &str, transfer_time: Timestamp) {
        let stop_idx = self.get_stop_idx(stop_name) as usize;
        self.transfer_times[stop_idx] = transfer_time;
    }

    pub fn get_stop(&self, stop: StopIndex) -> &Stop { &self.stops[stop as usize] }

    pub fn get_stop_idx(&self, stop_name: &str) -> StopIndex { self.stop_index[stop_name] }

    pub fn get_stop_idx_from_name(&self, stop_name: &str) -> Option<StopIndex> {
        self.stop_index.get(stop_name).copied()
    }

    pub fn get_route_idx(&self, line: &str) -> Option<RouteIndex> {
        self.routes.iter().position(|route| &*route.line == line).map(|idx| idx as RouteIndex)
    }

    pub fn num_stops_in_route(&self, route_idx: usize) -> usize { self.routes[route_idx].num_stops }

    pub fn get_trip(&self, route_idx: usize, trip_idx: usize) -> &[StopTime] {
        let route = &self.routes[route_idx];
        route.get_trip(trip_idx, &self.stop_times)
    }

    pub fn print_stats(&self) {
        log::info!(
            "Network has {} stops, {} routes, {} stop times and {} transfers.",
            self.stops.len(),
            self.routes.len(),
            self.stop_times.len(),
            self.transfers.len(),
        );
    }
}

impl TransitDataProvider for Network {
    type Trip<'a> = TripView<'a>;

    fn num_stops(&self) -> usize { self.stops.len() }

    fn num_routes(&self) -> usize { self.routes.len() }

    fn routes_for_stop(&self, stop: StopIndex) -> &[RouteIndex] {
        self.stops[stop as usize].get_routes(&self.stop_routes)
    }

    fn stops_in_route(&self, route: RouteIndex) -> &[StopIndex] {
        self.routes[route as usize].get_stops(&self.route_stops)
    }

    fn num_trips(&self, route: RouteIndex) -> usize { self.routes[route as usize].num_trips as usize }

    fn trip(&self, route: RouteIndex, trip: TripIndex) -> TripView<'_> {
        let route = &self.routes[route as usize];
        assert!(
            trip < route.num_trips,
            "Trip index {trip} out of range for route {} with {} trips.",
            route.line,
            route.num_trips
        );
        TripView {
            trip_idx: trip,
            stop_times: route.get_trip(trip as usize, &self.stop_times),
        }
    }

    fn transfers_from_stop(&self, stop: StopIndex) -> &[Transfer] {
        self.transfers.transfers_from(stop).expect("Network transfers are indexed on build.")
    }

    fn transfers_to_stop(&self, stop: StopIndex) -> &[Transfer] {
        self.transfers.transfers_to(stop).expect("Network transfers are indexed on build.")
    }

    fn slack(&self) -> SlackProvider { self.slack }

    fn transfer_time(&self, stop: StopIndex) -> Timestamp { self.transfer_times[stop as usize] }

    fn priority_group(&self, route: RouteIndex) -> u32 { self.routes[route as usize].priority_group }

    fn route_label(&self, route: RouteIndex) -> &str { &self.routes[route as usize].line }

    fn stop_name(&self, stop: StopIndex) -> &str { &self.stops[stop as usize].name }

    fn check_transfers_indexed(&self) -> Result<(), TransferIndexError> {
        if self.transfers.is_indexed() {
            Ok(())
        } else {
            Err(TransferIndexError::NotIndexed)
        }
    }
}

struct RouteData {
    line: String,
    stops: Vec<StopIndex>,
    trips: Vec<Vec<StopTime>>,
    priority_group: u32,
}

/// Builds a [`Network`] from named stops, routes and trips.
pub struct NetworkBuilder {
    stops: Vec<Stop>,
    stop_index: HashMap<String, StopIndex>,
    routes: Vec<RouteData>,
    transfers: Vec<Transfer>,
    transfer_filter: Option<Box<dyn TransferFilter>>,
    transfer_times: HashMap<StopIndex, Timestamp>,
    default_transfer_time: Timestamp,
    slack: SlackProvider,
}

impl Default for NetworkBuilder {
    fn default() -> Self { Self::new(0) }
}

impl NetworkBuilder {
    pub fn new(default_transfer_time: Timestamp) -> Self {
        Self {
            stops: Vec::new(),
            stop_index: HashMap::new(),
            routes: Vec::new(),
            transfers: Vec::new(),
            transfer_filter: None,
            transfer_times: HashMap::new(),
            default_transfer_time,
            slack: SlackProvider::default(),
        }
    }

    pub fn with_slack(mut self, slack: SlackProvider) -> Self {
        self.slack = slack;
        self
    }

    pub fn with_transfer_filter(mut self, filter: impl TransferFilter + 'static) -> Self {
        self.transfer_filter = Some(Box::new(filter));
        self
    }

    /// Returns the index of the named stop, adding it if unknown.
    pub fn add_stop(&mut self, name: &str) -> StopIndex {
        if let Some(&idx) = self.stop_index.get(name) {
            return idx;
        }
        let idx = self.stops.len() as StopIndex;
        self.stops.push(Stop::new(name.to_owned()));
        self.stop_index.insert(name.to_owned(), idx);
        idx
    }

    pub fn add_route(&mut self, line: &str, stop_names: &[&str]) -> RouteIndex {
        assert!(stop_names.len() >= 2, "Route {line} needs at least two stops.");
        let stops = stop_names.iter().map(|name| self.add_stop(name)).collect();
        self.routes.push(RouteData {
            line: line.to_owned(),
            stops,
            trips: Vec::new(),
            priority_group: 0,
        });
        (self.routes.len() - 1) as RouteIndex
    }

    /// Adds a trip where boarding and alighting is allowed everywhere. Each entry is an
    /// (arrival, departure) pair.
    pub fn add_trip(&mut self, route: RouteIndex, times: &[(Timestamp, Timestamp)]) {
        let stop_times = times.iter().map(|&(arr, dep)| StopTime::new(arr, dep)).collect();
        self.add_trip_with_stop_times(route, stop_times);
    }

    pub fn add_trip_with_stop_times(&mut self, route: RouteIndex, stop_times: Vec<StopTime>) {
        let route = &mut self.routes[route as usize];
        assert_eq!(
            stop_times.len(),
            route.stops.len(),
            "Trip on route {} must have one stop time per stop.",
            route.line
        );
        route.trips.push(stop_times);
    }

    pub fn set_priority_group(&mut self, route: RouteIndex, group: u32) {
        self.routes[route as usize].priority_group = group;
    }

    pub fn add_transfer(&mut self, from: &str, to: &str, duration: Timestamp, c1: Cost) {
        let from_stop = self.add_stop(from);
        let to_stop = self.add_stop(to);
        self.transfers.push(Transfer { from_stop, to_stop, duration, c1 });
    }

    pub fn set_transfer_time_for_stop(&mut self, stop_name: &str, transfer_time: Timestamp) {
        let stop = self.add_stop(stop_name);
        self.transfer_times.insert(stop, transfer_time);
    }

    pub fn build(self) -> Network {
        let mut stops = self.stops;
        let mut routes = Vec::with_capacity(self.routes.len());
        let mut route_stops = Vec::new();
        let mut stop_times = Vec::new();

        for mut route in self.routes {
            // Sort trips in route based on earliest departure time. A stable sort keeps the
            // insertion order of trips departing at the same time.
            route.trips.sort_by_key(|trip| trip[0].departure_time);

            routes.push(Route {
                line: route.line.into_boxed_str(),
                num_stops: route.stops.len(),
                num_trips: route.trips.len() as TripIndex,
                route_stops_idx: route_stops.len(),
                stop_times_idx: stop_times.len(),
                priority_group: route.priority_group,
            });
            route_stops.extend_from_slice(&route.stops);
            for trip in route.trips {
                stop_times.extend(trip);
            }
        }

        // Index the routes for a given stop.
        let mut stop_routes = Vec::new();
        for (stop_idx, stop) in stops.iter_mut().enumerate() {
            stop.routes_idx = stop_routes.len();

            for (route_idx, route) in routes.iter().enumerate() {
                if route.get_stops(&route_stops).contains(&(stop_idx as StopIndex)) {
                    stop_routes.push(route_idx as RouteIndex);
                }
            }
            stop.num_routes = stop_routes.len() - stop.routes_idx;
        }

        let mut transfer_times = vec![self.default_transfer_time; stops.len()];
        for (stop, time) in self.transfer_times {
            transfer_times[stop as usize] = time;
        }

        let mut transfers = TransferIndex::new(stops.len(), self.transfers);
        if let Some(filter) = self.transfer_filter {
            transfers = transfers.with_filter(filter);
        }
        transfers.index().expect("A new transfer index is never indexed.");

        Network {
            routes,
            stops,
            stop_index: self.stop_index,
            stop_times,
            stop_routes,
            route_stops,
            transfer_times,
            transfers,
            slack: self.slack,
        }
    }
}
