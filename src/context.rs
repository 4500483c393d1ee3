//! Per-request search configuration and its decomposition into via-segments.

use std::sync::Arc;
use std::time::Duration;

use crate::access_egress::AccessEgress;
use crate::direct::RelaxedLimitedTransferRequest;
use crate::multicriteria::{
    DominanceFunction, GeneralizedCostCalculator, GroupPriorityCalculator, ParetoCriteria, RelaxFunction,
};
use crate::network::{Cost, RouteIndex, SlackProvider, StopIndex, Timestamp, TransitDataProvider};
use crate::pareto::ParetoSetEventListener;
use crate::path::RaptorPath;
use crate::raptor::{ArrivalView, Ride, TransitCalculator};
use crate::service::RaptorError;

/// Iteration departure times step on this grid.
pub const ITERATION_STEP: Timestamp = 60;

const DEFAULT_MAX_ROUNDS: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchDirection {
    /// Depart after the earliest departure time.
    #[default]
    Forward,
    /// Arrive before the latest arrival time, searching backwards in time.
    Reverse,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchProfile {
    /// Arrival time and number of rides only.
    Standard,
    /// Adds generalized cost and, when configured, transit priority groups.
    #[default]
    MultiCriteria,
}

#[derive(Clone, Debug)]
pub struct SearchParams {
    pub earliest_departure_time: Timestamp,
    pub latest_arrival_time: Option<Timestamp>,
    /// Width of the departure (or arrival, in reverse) window in seconds. Zero runs one iteration.
    pub search_window: Timestamp,
    /// Maximum number of rides in a journey.
    pub max_rounds: usize,
    pub direction: SearchDirection,
    pub profile: SearchProfile,
    pub relax_c1: Option<RelaxFunction>,
    pub cost: GeneralizedCostCalculator,
    /// Lets a walking transfer or egress follow a stop that was itself reached on foot.
    pub allow_walk_chaining: bool,
    pub max_iterations: Option<usize>,
    pub timeout: Option<Duration>,
}

impl SearchParams {
    pub fn new(earliest_departure_time: Timestamp, search_window: Timestamp) -> Self {
        Self {
            earliest_departure_time,
            latest_arrival_time: None,
            search_window,
            max_rounds: DEFAULT_MAX_ROUNDS,
            direction: SearchDirection::Forward,
            profile: SearchProfile::MultiCriteria,
            relax_c1: None,
            cost: GeneralizedCostCalculator::default(),
            allow_walk_chaining: false,
            max_iterations: None,
            timeout: None,
        }
    }

    pub fn with_latest_arrival_time(mut self, latest_arrival_time: Timestamp) -> Self {
        self.latest_arrival_time = Some(latest_arrival_time);
        self
    }

    pub fn reverse(mut self) -> Self {
        self.direction = SearchDirection::Reverse;
        self
    }

    pub fn standard(mut self) -> Self {
        self.profile = SearchProfile::Standard;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_relax_c1(mut self, relax_c1: RelaxFunction) -> Self {
        self.relax_c1 = Some(relax_c1);
        self
    }

    pub fn with_cost(mut self, cost: GeneralizedCostCalculator) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_walk_chaining(mut self, allow: bool) -> Self {
        self.allow_walk_chaining = allow;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_multi_criteria(&self) -> bool { self.profile == SearchProfile::MultiCriteria }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViaKind {
    /// The traveler alights at the location and may wait before continuing.
    Visit { minimum_wait_time: Timestamp },
    /// The traveler must pass the location but may stay on board.
    PassThrough,
}

/// How a via-location is entered and left. For a stop-only connection `from_stop == to_stop` and
/// the duration is zero; otherwise it is a walk between the two stops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViaConnection {
    pub from_stop: StopIndex,
    pub to_stop: StopIndex,
    pub duration: Timestamp,
    pub c1: Cost,
}

impl ViaConnection {
    pub fn stop(stop: StopIndex) -> Self {
        Self {
            from_stop: stop,
            to_stop: stop,
            duration: 0,
            c1: 0,
        }
    }

    pub fn transfer(from_stop: StopIndex, to_stop: StopIndex, duration: Timestamp, c1: Cost) -> Self {
        Self { from_stop, to_stop, duration, c1 }
    }

    pub fn is_transfer(&self) -> bool { self.from_stop != self.to_stop }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViaLocation {
    pub label: String,
    pub kind: ViaKind,
    pub connections: Vec<ViaConnection>,
}

impl ViaLocation {
    pub fn visit(label: &str, minimum_wait_time: Timestamp, stops: &[StopIndex]) -> Self {
        Self {
            label: label.to_owned(),
            kind: ViaKind::Visit { minimum_wait_time },
            connections: stops.iter().map(|&stop| ViaConnection::stop(stop)).collect(),
        }
    }

    pub fn pass_through(label: &str, stops: &[StopIndex]) -> Self {
        Self {
            label: label.to_owned(),
            kind: ViaKind::PassThrough,
            connections: stops.iter().map(|&stop| ViaConnection::stop(stop)).collect(),
        }
    }

    pub fn with_connection(mut self, connection: ViaConnection) -> Self {
        assert!(
            matches!(self.kind, ViaKind::Visit { .. }) || !connection.is_transfer(),
            "Pass-through location {} cannot have a transfer connection.",
            self.label
        );
        self.connections.push(connection);
        self
    }

    pub fn minimum_wait_time(&self) -> Timestamp {
        match self.kind {
            ViaKind::Visit { minimum_wait_time } => minimum_wait_time,
            ViaKind::PassThrough => 0,
        }
    }

    pub fn is_pass_through(&self) -> bool { self.kind == ViaKind::PassThrough }
}

#[derive(Clone, Default)]
pub struct RaptorRequest {
    pub params: SearchParams,
    pub access_paths: Vec<AccessEgress>,
    pub egress_paths: Vec<AccessEgress>,
    pub via_locations: Vec<ViaLocation>,
    pub group_priority: Option<Arc<dyn GroupPriorityCalculator>>,
    pub relaxed_limited_transfer: Option<RelaxedLimitedTransferRequest>,
    pub path_listener: Option<Arc<dyn ParetoSetEventListener<RaptorPath>>>,
    pub stop_arrival_listener: Option<Arc<dyn ParetoSetEventListener<ArrivalView>>>,
}

impl Default for SearchParams {
    fn default() -> Self { Self::new(0, 0) }
}

impl RaptorRequest {
    pub fn new(params: SearchParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn with_access(mut self, access: impl Into<AccessEgress>) -> Self {
        self.access_paths.push(access.into());
        self
    }

    pub fn with_egress(mut self, egress: impl Into<AccessEgress>) -> Self {
        self.egress_paths.push(egress.into());
        self
    }

    pub fn with_via(mut self, via: ViaLocation) -> Self {
        self.via_locations.push(via);
        self
    }

    pub fn with_group_priority(mut self, calculator: Arc<dyn GroupPriorityCalculator>) -> Self {
        self.group_priority = Some(calculator);
        self
    }

    pub fn with_relaxed_limited_transfer(mut self, request: RelaxedLimitedTransferRequest) -> Self {
        self.relaxed_limited_transfer = Some(request);
        self
    }

    pub fn with_path_listener(mut self, listener: Arc<dyn ParetoSetEventListener<RaptorPath>>) -> Self {
        self.path_listener = Some(listener);
        self
    }

    pub fn with_stop_arrival_listener(mut self, listener: Arc<dyn ParetoSetEventListener<ArrivalView>>) -> Self {
        self.stop_arrival_listener = Some(listener);
        self
    }

    pub fn has_on_board_access(&self) -> bool { self.access_paths.iter().any(AccessEgress::is_on_board) }

    /// Rejects requests no search can answer. Requests that merely find nothing are valid.
    pub fn validate(&self) -> Result<(), RaptorError> {
        let params = &self.params;
        if params.search_window < 0 {
            return Err(RaptorError::InvalidRequest(format!(
                "search window must not be negative, was {}",
                params.search_window
            )));
        }
        if let Some(lat) = params.latest_arrival_time {
            if lat < params.earliest_departure_time {
                return Err(RaptorError::InvalidRequest(format!(
                    "latest arrival time {lat} is before earliest departure time {}",
                    params.earliest_departure_time
                )));
            }
        }
        if params.direction == SearchDirection::Reverse {
            if params.latest_arrival_time.is_none() {
                return Err(RaptorError::InvalidRequest(
                    "reverse search requires a latest arrival time".to_owned(),
                ));
            }
            if self.has_on_board_access() {
                return Err(RaptorError::OnBoardAccessNotSupported);
            }
        }
        if self.egress_paths.iter().any(AccessEgress::is_on_board) {
            return Err(RaptorError::InvalidRequest("egress paths cannot be on board".to_owned()));
        }
        Ok(())
    }
}

/// One leg of a via-constrained journey: from the origin or a via-location to the next
/// via-location or the destination.
#[derive(Debug)]
pub struct SegmentContext<'a> {
    pub index: usize,
    pub access_paths: Vec<&'a AccessEgress>,
    pub egress_paths: Vec<&'a AccessEgress>,
    /// The via-location that ends this segment. `None` for the last segment.
    pub via: Option<&'a ViaLocation>,
}

impl SegmentContext<'_> {
    pub fn is_first(&self) -> bool { self.index == 0 }

    pub fn is_last(&self) -> bool { self.via.is_none() }
}

/// Immutable state shared by every worker of one request.
pub struct SearchContext<'a, D: TransitDataProvider> {
    pub data: &'a D,
    pub request: &'a RaptorRequest,
    pub calculator: TransitCalculator,
    pub slack: SlackProvider,
}

impl<'a, D: TransitDataProvider> SearchContext<'a, D> {
    pub fn new(request: &'a RaptorRequest, data: &'a D) -> Self {
        Self {
            data,
            request,
            calculator: TransitCalculator::new(request.params.direction),
            slack: data.slack(),
        }
    }

    pub fn params(&self) -> &'a SearchParams { &self.request.params }

    pub fn num_segments(&self) -> usize { self.request.via_locations.len() + 1 }

    /// Splits the request into one segment per via-location plus one. Access and egress paths go
    /// to the segment matching the number of via-locations they have already visited.
    pub fn segments(&self) -> Vec<SegmentContext<'a>> {
        let request = self.request;
        let num_segments = self.num_segments();
        let last = num_segments - 1;

        let mut segments: Vec<_> = (0..num_segments)
            .map(|index| SegmentContext {
                index,
                access_paths: Vec::new(),
                egress_paths: Vec::new(),
                via: request.via_locations.get(index),
            })
            .collect();

        for access in &request.access_paths {
            let visited = access.number_of_via_locations_visited();
            match segments.get_mut(visited) {
                Some(segment) => segment.access_paths.push(access),
                None => log::warn!("Dropping access to stop {} that visited {visited} via-locations.", access.stop()),
            }
        }
        for egress in &request.egress_paths {
            let visited = egress.number_of_via_locations_visited();
            match last.checked_sub(visited).and_then(|index| segments.get_mut(index)) {
                Some(segment) => segment.egress_paths.push(egress),
                None => log::warn!("Dropping egress from stop {} that visited {visited} via-locations.", egress.stop()),
            }
        }

        segments
    }

    /// Iteration times in the order they are searched: the latest departure first in a forward
    /// search, the earliest arrival first in a reverse search.
    pub fn iteration_times(&self) -> Vec<Timestamp> {
        let params = self.params();
        let num_iterations = ((params.search_window + ITERATION_STEP - 1) / ITERATION_STEP).max(1);
        match params.direction {
            SearchDirection::Forward => (0..num_iterations)
                .rev()
                .map(|i| params.earliest_departure_time + i * ITERATION_STEP)
                .collect(),
            SearchDirection::Reverse => {
                let lat = params.latest_arrival_time.unwrap_or(params.earliest_departure_time);
                (0..num_iterations).rev().map(|i| lat - i * ITERATION_STEP).collect()
            }
        }
    }

    /// True if a stop arrival at `time` is still within the request's time limits.
    pub fn within_time_limit(&self, time: Timestamp) -> bool {
        let params = self.params();
        match params.direction {
            SearchDirection::Forward => params.latest_arrival_time.is_none_or(|lat| time <= lat),
            SearchDirection::Reverse => time >= params.earliest_departure_time,
        }
    }

    pub fn merge_group(&self, current: u32, route: RouteIndex) -> u32 {
        match &self.request.group_priority {
            Some(calculator) => calculator.merge_group_ids(current, self.data.priority_group(route)),
            None => 0,
        }
    }

    fn c1_dominance(&self) -> DominanceFunction {
        if self.params().is_multi_criteria() {
            DominanceFunction::LessThan
        } else {
            DominanceFunction::Ignore
        }
    }

    fn c2_dominance(&self) -> DominanceFunction {
        match &self.request.group_priority {
            Some(calculator) if self.params().is_multi_criteria() => calculator.dominance_function(),
            _ => DominanceFunction::Ignore,
        }
    }

    fn time_dominance(&self) -> DominanceFunction {
        match self.params().direction {
            SearchDirection::Forward => DominanceFunction::LessThan,
            SearchDirection::Reverse => DominanceFunction::GreaterThan,
        }
    }

    pub fn arrival_criteria(&self) -> ParetoCriteria<ArrivalView> {
        let on_board = if self.params().allow_walk_chaining {
            DominanceFunction::Ignore
        } else {
            DominanceFunction::GreaterThan
        };
        ParetoCriteria::new()
            .with(|a: &ArrivalView| a.time as i64, self.time_dominance())
            .with(|a: &ArrivalView| a.rides as i64, DominanceFunction::LessThan)
            .with(|a: &ArrivalView| a.c1 as i64, self.c1_dominance())
            .with(|a: &ArrivalView| !a.walking as i64, on_board)
            .with(|a: &ArrivalView| a.c2 as i64, self.c2_dominance())
    }

    pub(crate) fn ride_criteria(&self) -> ParetoCriteria<Ride> {
        ParetoCriteria::new()
            .with(|r: &Ride| r.trip as i64, self.time_dominance())
            .with(|r: &Ride| r.relative_c1, self.c1_dominance())
            .with(|r: &Ride| r.rides as i64, DominanceFunction::LessThan)
            .with(|r: &Ride| r.c2 as i64, self.c2_dominance())
    }

    /// The comparator of the final path set. It is shared by every sub-search of the request so
    /// that their results can be merged.
    pub fn path_criteria(&self) -> ParetoCriteria<RaptorPath> { path_criteria(self.request) }

    /// Criteria for merging sub-search results. When the relaxed limited transfer search runs, its
    /// relaxed cost limit also applies here, so the slower single-ride paths it finds are kept.
    pub fn merge_criteria(&self) -> ParetoCriteria<RaptorPath> {
        match &self.request.relaxed_limited_transfer {
            Some(relaxed) if self.calculator.is_forward() => {
                relaxed_path_criteria(self.request, relaxed.relax_c1)
            }
            _ => self.path_criteria(),
        }
    }
}

pub fn path_criteria(request: &RaptorRequest) -> ParetoCriteria<RaptorPath> {
    let params = &request.params;
    let c1 = match (params.is_multi_criteria(), params.relax_c1) {
        (false, _) => DominanceFunction::Ignore,
        (true, Some(relax)) if !relax.is_normal() => DominanceFunction::Relaxed(relax),
        (true, _) => DominanceFunction::LessThan,
    };
    criteria_with_c1(request, c1)
}

/// Like [`path_criteria`], with the cost compared against `relax_c1` of the other path.
pub fn relaxed_path_criteria(request: &RaptorRequest, relax_c1: RelaxFunction) -> ParetoCriteria<RaptorPath> {
    criteria_with_c1(request, DominanceFunction::Relaxed(relax_c1))
}

fn criteria_with_c1(request: &RaptorRequest, c1: DominanceFunction) -> ParetoCriteria<RaptorPath> {
    let params = &request.params;
    let c2 = match &request.group_priority {
        Some(calculator) if params.is_multi_criteria() => calculator.dominance_function(),
        _ => DominanceFunction::Ignore,
    };
    ParetoCriteria::new()
        .with(|p: &RaptorPath| p.start_time as i64, DominanceFunction::GreaterThan)
        .with(|p: &RaptorPath| p.end_time as i64, DominanceFunction::LessThan)
        .with(|p: &RaptorPath| p.number_of_transfers as i64, DominanceFunction::LessThan)
        .with(|p: &RaptorPath| p.c1 as i64, c1)
        .with(|p: &RaptorPath| p.c2 as i64, c2)
}
