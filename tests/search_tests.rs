use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use raptor::access_egress::StreetAccessEgress;
use raptor::direct::RelaxedLimitedTransferRequest;
use raptor::multicriteria::{BitwiseGroupPriority, GeneralizedCostCalculator, RelaxFunction};
use raptor::network::Timestamp;
use raptor::pareto::ParetoSetEventListener;
use raptor::path::PathLeg;
use raptor::utils::parse_time;
use raptor::{
    AccessEgress, Network, NetworkBuilder, RaptorConfig, RaptorError, RaptorPath, RaptorRequest, RaptorService,
    SearchParams, ViaLocation,
};

fn t(time: &str) -> Timestamp { parse_time(time).unwrap() }

fn free_boarding() -> GeneralizedCostCalculator {
    GeneralizedCostCalculator {
        board_cost: 0,
        ..Default::default()
    }
}

fn route(request: &RaptorRequest, network: &Network) -> Vec<RaptorPath> {
    RaptorService::new(RaptorConfig::serial()).route(request, network).unwrap().paths
}

#[derive(Default)]
struct CountingListener {
    accepted: AtomicUsize,
}

impl ParetoSetEventListener<RaptorPath> for CountingListener {
    fn notify_element_accepted(&self, _new_element: &RaptorPath) { self.accepted.fetch_add(1, Ordering::Relaxed); }
}

#[test]
fn minimal_scenario() {
    let mut builder = NetworkBuilder::new(0);
    let line = builder.add_route("L1", &["S1", "S2"]);
    builder.add_trip(line, &[(t("08:05:00"), t("08:05:00")), (t("08:18:20"), t("08:18:20"))]);
    let network = builder.build();
    let (s1, s2) = (network.get_stop_idx("S1"), network.get_stop_idx("S2"));

    let listener = Arc::new(CountingListener::default());
    let request = RaptorRequest::new(SearchParams::new(t("08:00:00"), 0).with_cost(free_boarding()))
        .with_access(AccessEgress::walk(s1, 5 * 60, 500))
        .with_egress(AccessEgress::walk(s2, 3 * 60, 300))
        .with_path_listener(listener.clone());

    let response = RaptorService::default().route(&request, &network).unwrap();
    assert!(response.destination_reached);
    assert!(!response.budget_exhausted);
    assert_eq!(response.paths.len(), 1);

    let path = &response.paths[0];
    assert_eq!(path.number_of_rides(), 1);
    assert_eq!(path.number_of_transfers, 0);
    assert_eq!(path.c1, 1600);
    assert_eq!(path.start_time, t("08:00:00"));
    assert_eq!(path.end_time, t("08:21:20"));
    assert_eq!(listener.accepted.load(Ordering::Relaxed), 1);

    let diagnostics = response.diagnostics.unwrap();
    assert_eq!(diagnostics.best_transit_arrival_time(s2), Some(t("08:18:20")));
    assert_eq!(diagnostics.fewest_transfers(s2), Some(0));
}

#[test]
fn unreachable_destination_is_not_an_error() {
    let mut builder = NetworkBuilder::new(0);
    let line = builder.add_route("L1", &["A", "B"]);
    builder.add_trip(line, &[(t("07:00:00"), t("07:00:00")), (t("07:10:00"), t("07:10:00"))]);
    let network = builder.build();

    let request = RaptorRequest::new(SearchParams::new(t("08:00:00"), 600))
        .with_access(AccessEgress::walk(network.get_stop_idx("A"), 0, 0))
        .with_egress(AccessEgress::walk(network.get_stop_idx("B"), 0, 0));
    let response = RaptorService::default().route(&request, &network).unwrap();
    assert!(!response.destination_reached);
    assert!(response.paths.is_empty());
    assert_eq!(response.iterations, 10);
}

#[test]
fn walking_transfer_between_rides() {
    let mut builder = NetworkBuilder::new(0);
    let l1 = builder.add_route("L1", &["A", "B"]);
    builder.add_trip(l1, &[(t("08:00:00"), t("08:00:00")), (t("08:10:00"), t("08:10:00"))]);
    let l2 = builder.add_route("L2", &["C", "D"]);
    builder.add_trip(l2, &[(t("08:15:00"), t("08:15:00")), (t("08:25:00"), t("08:25:00"))]);
    builder.add_transfer("B", "C", 120, 120);
    let network = builder.build();

    let request = RaptorRequest::new(SearchParams::new(t("08:00:00"), 0))
        .with_access(AccessEgress::walk(network.get_stop_idx("A"), 0, 0))
        .with_egress(AccessEgress::walk(network.get_stop_idx("D"), 0, 0));
    let paths = route(&request, &network);
    assert_eq!(paths.len(), 1);

    let path = &paths[0];
    assert_eq!(path.number_of_transfers, 1);
    // Two boardings, two rides of ten minutes, the walk and three minutes of waiting.
    assert_eq!(path.c1, 60 + 600 + 120 + 60 + 180 + 600);
    assert!(matches!(
        path.legs.as_slice(),
        [
            PathLeg::Access { .. },
            PathLeg::Transit(_),
            PathLeg::Transfer { from_time: 29_400, to_time: 29_520, .. },
            PathLeg::Transit(_),
            PathLeg::Egress { .. }
        ]
    ));
}

fn via_network() -> Network { via_builder().build() }

fn via_builder() -> NetworkBuilder {
    let mut builder = NetworkBuilder::new(0);
    let l1 = builder.add_route("L1", &["A", "V"]);
    builder.add_trip(l1, &[(t("08:00:00"), t("08:00:00")), (t("08:10:00"), t("08:10:00"))]);
    let l2 = builder.add_route("L2", &["V", "B"]);
    builder.add_trip(l2, &[(t("08:12:00"), t("08:12:00")), (t("08:27:00"), t("08:27:00"))]);
    builder.add_trip(l2, &[(t("08:30:00"), t("08:30:00")), (t("08:45:00"), t("08:45:00"))]);
    let l3 = builder.add_route("L3", &["Z", "B"]);
    builder.add_trip(l3, &[(t("09:00:00"), t("09:00:00")), (t("09:10:00"), t("09:10:00"))]);
    builder
}

fn times(paths: &[RaptorPath]) -> Vec<(Timestamp, Timestamp, usize)> {
    let mut keys: Vec<_> = paths.iter().map(|p| (p.start_time, p.end_time, p.number_of_transfers)).collect();
    keys.sort();
    keys
}

#[test]
fn via_visit_waits_at_location() {
    let network = via_network();
    let (a, v, b) = (network.get_stop_idx("A"), network.get_stop_idx("V"), network.get_stop_idx("B"));
    let base = RaptorRequest::new(SearchParams::new(t("08:00:00"), 0))
        .with_access(AccessEgress::walk(a, 0, 0))
        .with_egress(AccessEgress::walk(b, 0, 0));

    let direct = route(&base, &network);
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].end_time, t("08:27:00"));

    let request = base.clone().with_via(ViaLocation::visit("V", 10 * 60, &[v]));
    let paths = route(&request, &network);
    assert_eq!(paths.len(), 1);

    let path = &paths[0];
    assert_eq!(path.end_time, t("08:45:00"));
    assert_eq!(path.number_of_transfers, 1);
    let rides: Vec<_> = path.transit_legs().collect();
    assert_eq!(rides.len(), 2);
    assert_eq!(rides[0].alight_stop, v);
    assert!(rides[1].board_time >= rides[0].alight_time + 10 * 60);
    // Only the wait beyond the minimum wait time is costed.
    assert_eq!(path.c1, 60 + 600 + 60 + 600 + 900);
}

#[test]
fn reverse_search_with_via_visit() {
    let mut builder = via_builder();
    let l4 = builder.add_route("L4", &["A", "B"]);
    builder.add_trip(l4, &[(t("08:20:00"), t("08:20:00")), (t("08:40:00"), t("08:40:00"))]);
    let network = builder.build();
    let (a, v, b) = (network.get_stop_idx("A"), network.get_stop_idx("V"), network.get_stop_idx("B"));

    let params = SearchParams::new(t("07:00:00"), 0).with_latest_arrival_time(t("09:00:00")).reverse();
    let base = RaptorRequest::new(params)
        .with_access(AccessEgress::walk(a, 0, 0))
        .with_egress(AccessEgress::walk(b, 0, 0));
    assert_eq!(times(&route(&base, &network)), vec![(t("08:20:00"), t("08:40:00"), 0)]);

    let via = ViaLocation::visit("V", 10 * 60, &[v]);
    let paths = route(&base.clone().with_via(via.clone()), &network);
    assert_eq!(times(&paths), vec![(t("08:00:00"), t("08:45:00"), 1)]);

    let path = &paths[0];
    let rides: Vec<_> = path.transit_legs().collect();
    assert_eq!(rides.len(), 2);
    assert_eq!((rides[0].board_stop, rides[0].alight_stop), (a, v));
    assert_eq!((rides[1].board_stop, rides[1].alight_stop), (v, b));
    assert_eq!(rides[1].board_time, t("08:30:00"));
    assert!(rides[1].board_time >= rides[0].alight_time + 10 * 60);

    // The forward search with the same via-location finds the same journey.
    let forward = RaptorRequest::new(SearchParams::new(t("08:00:00"), 0))
        .with_access(AccessEgress::walk(a, 0, 0))
        .with_egress(AccessEgress::walk(b, 0, 0))
        .with_via(via);
    let forward = route(&forward, &network);
    assert_eq!(times(&forward), times(&paths));
    assert_eq!(forward[0].c1, path.c1);
}

#[test]
fn access_that_visited_the_via_starts_after_it() {
    let mut builder = via_builder();
    let l5 = builder.add_route("L5", &["W", "B"]);
    builder.add_trip(l5, &[(t("08:20:00"), t("08:20:00")), (t("08:30:00"), t("08:30:00"))]);
    let network = builder.build();
    let (a, v, w, b) = (
        network.get_stop_idx("A"),
        network.get_stop_idx("V"),
        network.get_stop_idx("W"),
        network.get_stop_idx("B"),
    );
    let request = |visited: usize| {
        RaptorRequest::new(SearchParams::new(t("08:00:00"), 0))
            .with_access(AccessEgress::walk(a, 0, 0))
            .with_access(StreetAccessEgress::walk(w, 600, 600).with_via_locations_visited(visited))
            .with_egress(AccessEgress::walk(b, 0, 0))
            .with_via(ViaLocation::visit("V", 0, &[v]))
    };

    // Without the count the access to W belongs before the via-location and never reaches it.
    assert_eq!(times(&route(&request(0), &network)), vec![(t("08:00:00"), t("08:27:00"), 1)]);

    let paths = route(&request(1), &network);
    assert_eq!(
        times(&paths),
        vec![(t("08:00:00"), t("08:27:00"), 1), (t("08:10:00"), t("08:30:00"), 0)]
    );
    let via_w = paths.iter().find(|p| p.start_time == t("08:10:00")).unwrap();
    assert_eq!(via_w.access_leg().map(AccessEgress::stop), Some(w));
    assert_eq!(via_w.c1, 600 + 60 + 600);
}

#[test]
fn egress_that_visited_the_via_ends_before_it() {
    let mut builder = via_builder();
    let l6 = builder.add_route("L6", &["A", "U"]);
    builder.add_trip(l6, &[(t("08:00:00"), t("08:00:00")), (t("08:05:00"), t("08:05:00"))]);
    let network = builder.build();
    let (a, v, u, b) = (
        network.get_stop_idx("A"),
        network.get_stop_idx("V"),
        network.get_stop_idx("U"),
        network.get_stop_idx("B"),
    );
    let request = |visited: usize| {
        RaptorRequest::new(SearchParams::new(t("08:00:00"), 0))
            .with_access(AccessEgress::walk(a, 0, 0))
            .with_egress(AccessEgress::walk(b, 0, 0))
            .with_egress(StreetAccessEgress::walk(u, 300, 300).with_via_locations_visited(visited))
            .with_via(ViaLocation::visit("V", 0, &[v]))
    };

    // Counted as visited, the egress from U closes the segment before the via-location.
    let paths = route(&request(1), &network);
    assert_eq!(times(&paths), vec![(t("08:00:00"), t("08:10:00"), 0)]);
    assert_eq!(paths[0].egress_leg().map(AccessEgress::stop), Some(u));
    assert_eq!(paths[0].c1, 60 + 300 + 300);

    let through_via = vec![(t("08:00:00"), t("08:27:00"), 1)];
    assert_eq!(times(&route(&request(0), &network)), through_via);
    // More visits than via-locations: the egress is dropped.
    assert_eq!(times(&route(&request(2), &network)), through_via);
}

#[test]
fn unreachable_via_gives_empty_result() {
    let network = via_network();
    let request = RaptorRequest::new(SearchParams::new(t("08:00:00"), 0))
        .with_access(AccessEgress::walk(network.get_stop_idx("A"), 0, 0))
        .with_egress(AccessEgress::walk(network.get_stop_idx("B"), 0, 0))
        .with_via(ViaLocation::visit("Z", 0, &[network.get_stop_idx("Z")]));

    let response = RaptorService::default().route(&request, &network).unwrap();
    assert!(!response.destination_reached);
}

#[test]
fn pass_through_stays_on_board() {
    let mut builder = NetworkBuilder::new(0);
    let slow = builder.add_route("Slow", &["A", "P", "B"]);
    builder.add_trip(
        slow,
        &[(t("08:00:00"), t("08:00:00")), (t("08:10:00"), t("08:10:00")), (t("08:20:00"), t("08:20:00"))],
    );
    let fast = builder.add_route("Fast", &["A", "Q", "B"]);
    builder.add_trip(
        fast,
        &[(t("08:00:00"), t("08:00:00")), (t("08:05:00"), t("08:05:00")), (t("08:15:00"), t("08:15:00"))],
    );
    let network = builder.build();
    let (a, p, b) = (network.get_stop_idx("A"), network.get_stop_idx("P"), network.get_stop_idx("B"));

    let request = RaptorRequest::new(SearchParams::new(t("08:00:00"), 0))
        .with_access(AccessEgress::walk(a, 0, 0))
        .with_egress(AccessEgress::walk(b, 0, 0))
        .with_via(ViaLocation::pass_through("P", &[p]));
    let paths = route(&request, &network);
    assert_eq!(paths.len(), 1);

    let path = &paths[0];
    assert_eq!(path.number_of_transfers, 0);
    assert_eq!(path.end_time, t("08:20:00"));
    let rides: Vec<_> = path.transit_legs().collect();
    assert_eq!(rides.len(), 1);
    assert_eq!((rides[0].route, rides[0].board_stop, rides[0].alight_stop), (slow, a, b));
    assert_eq!(path.c1, 60 + 1200);
}

fn on_board_network() -> Network {
    let mut builder = NetworkBuilder::new(0);
    let line = builder.add_route("L1", &["A", "B", "C"]);
    builder.add_trip(
        line,
        &[(t("08:00:00"), t("08:00:00")), (t("08:10:00"), t("08:10:00")), (t("08:20:00"), t("08:20:00"))],
    );
    builder.add_trip(
        line,
        &[(t("08:15:00"), t("08:15:00")), (t("08:25:00"), t("08:25:00")), (t("08:35:00"), t("08:35:00"))],
    );
    builder.build()
}

#[test]
fn on_board_access_rides_the_given_trip() {
    let network = on_board_network();
    let (a, c) = (network.get_stop_idx("A"), network.get_stop_idx("C"));
    let request = RaptorRequest::new(SearchParams::new(t("08:00:00"), 0))
        .with_access(AccessEgress::on_board(0, 1, 0, a, 0))
        .with_egress(AccessEgress::walk(c, 60, 60));

    let response = RaptorService::default().route(&request, &network).unwrap();
    // The range search and the direct search find the same path once.
    assert_eq!(response.paths.len(), 1);

    let path = &response.paths[0];
    assert_eq!(path.start_time, t("08:15:00"));
    assert_eq!(path.end_time, t("08:36:00"));
    assert_eq!(path.iteration_departure_time, t("08:15:00"));
    assert_eq!(path.number_of_transfers, 0);
    assert_eq!(path.c1, 1200 + 60);
    assert!(path.access_leg().is_some_and(AccessEgress::is_on_board));
}

#[test]
fn reverse_search_with_on_board_access_is_rejected() {
    let network = on_board_network();
    let request = RaptorRequest::new(SearchParams::new(t("08:00:00"), 0).with_latest_arrival_time(t("09:00:00")).reverse())
        .with_access(AccessEgress::on_board(0, 1, 0, network.get_stop_idx("A"), 0))
        .with_egress(AccessEgress::walk(network.get_stop_idx("C"), 60, 60));
    let result = RaptorService::default().route(&request, &network);
    assert!(matches!(result, Err(RaptorError::OnBoardAccessNotSupported)));
}

#[test]
fn reverse_search_arrives_by_latest_arrival_time() {
    let mut builder = NetworkBuilder::new(0);
    let line = builder.add_route("L1", &["A", "B"]);
    builder.add_trip(line, &[(t("08:00:00"), t("08:00:00")), (t("08:20:00"), t("08:20:00"))]);
    builder.add_trip(line, &[(t("08:30:00"), t("08:30:00")), (t("08:50:00"), t("08:50:00"))]);
    let network = builder.build();

    let request = RaptorRequest::new(
        SearchParams::new(t("07:00:00"), 0).with_latest_arrival_time(t("09:00:00")).reverse(),
    )
    .with_access(AccessEgress::walk(network.get_stop_idx("A"), 120, 120))
    .with_egress(AccessEgress::walk(network.get_stop_idx("B"), 60, 60));
    let paths = route(&request, &network);
    assert_eq!(paths.len(), 1);

    let path = &paths[0];
    assert_eq!(path.start_time, t("08:28:00"));
    assert_eq!(path.end_time, t("08:51:00"));
    assert_eq!(path.iteration_departure_time, t("08:28:00"));
    assert_eq!(path.transit_legs().next().map(|leg| leg.board_time), Some(t("08:30:00")));
    assert_eq!(path.c1, 120 + 60 + 1200 + 60);
}

fn frequent_network() -> Network {
    let mut builder = NetworkBuilder::new(0);
    let line = builder.add_route("L1", &["A", "B"]);
    let mut start = t("08:00:00");
    while start <= t("10:00:00") {
        builder.add_trip(line, &[(start, start), (start + 600, start + 600)]);
        start += 600;
    }
    builder.build()
}

#[test]
fn exhausted_budget_returns_partial_result() {
    let network = frequent_network();
    let params = SearchParams::new(t("08:00:00"), 3600).with_max_iterations(5);
    let request = RaptorRequest::new(params)
        .with_access(AccessEgress::walk(network.get_stop_idx("A"), 0, 0))
        .with_egress(AccessEgress::walk(network.get_stop_idx("B"), 0, 0));

    let response = RaptorService::new(RaptorConfig::serial()).route(&request, &network).unwrap();
    assert!(response.budget_exhausted);
    assert_eq!(response.iterations, 5);
    // Iterations 08:59 down to 08:55 all catch the 09:00 departure.
    assert_eq!(response.paths.len(), 1);
    assert_eq!(response.paths[0].start_time, t("09:00:00"));

    let request = RaptorRequest {
        params: request.params.clone().with_timeout(Duration::ZERO),
        ..request
    };
    let response = RaptorService::default().route(&request, &network).unwrap();
    assert!(response.budget_exhausted);
    assert!(response.paths.is_empty());
}

#[test]
fn batches_give_the_same_paths() {
    let network = frequent_network();
    let request = RaptorRequest::new(SearchParams::new(t("08:00:00"), 1800))
        .with_access(AccessEgress::walk(network.get_stop_idx("A"), 0, 0))
        .with_egress(AccessEgress::walk(network.get_stop_idx("B"), 0, 0));

    let mut whole: Vec<_> = route(&request, &network).iter().map(|p| (p.start_time, p.end_time, p.c1)).collect();
    let batched_service = RaptorService::new(RaptorConfig::default().with_iteration_batch_size(7));
    let mut batched: Vec<_> = batched_service
        .route(&request, &network)
        .unwrap()
        .paths
        .iter()
        .map(|p| (p.start_time, p.end_time, p.c1))
        .collect();
    whole.sort();
    batched.sort();
    assert_eq!(whole.len(), 4);
    assert_eq!(whole, batched);
}

#[test]
fn group_priority_keeps_paths_of_different_groups() {
    let mut builder = NetworkBuilder::new(0);
    let rail = builder.add_route("Rail", &["A", "B"]);
    builder.add_trip(rail, &[(t("08:00:00"), t("08:00:00")), (t("08:10:00"), t("08:10:00"))]);
    builder.set_priority_group(rail, 1);
    let bus = builder.add_route("Bus", &["A", "B"]);
    builder.add_trip(bus, &[(t("08:00:00"), t("08:00:00")), (t("08:10:00"), t("08:10:00"))]);
    builder.set_priority_group(bus, 2);
    let network = builder.build();

    let request = RaptorRequest::new(SearchParams::new(t("08:00:00"), 0))
        .with_access(AccessEgress::walk(network.get_stop_idx("A"), 0, 0))
        .with_egress(AccessEgress::walk(network.get_stop_idx("B"), 0, 0));
    assert_eq!(route(&request, &network).len(), 1);

    let request = request.with_group_priority(Arc::new(BitwiseGroupPriority));
    let paths = route(&request, &network);
    assert_eq!(paths.len(), 2);
    let mut groups: Vec<_> = paths.iter().map(|p| p.c2).collect();
    groups.sort();
    assert_eq!(groups, vec![1, 2]);
}

#[test]
fn relaxed_limited_transfer_keeps_slower_single_ride() {
    // R1 is faster and cheaper. R2 leaves earlier and is only kept under the relaxed cost limit.
    let mut builder = NetworkBuilder::new(0);
    let r1 = builder.add_route("R1", &["B", "D"]);
    builder.add_trip(r1, &[(120, 120), (240, 240)]);
    let r2 = builder.add_route("R2", &["B", "C", "D"]);
    builder.add_trip(r2, &[(60, 60), (180, 180), (300, 300)]);
    let network = builder.build();

    let request = RaptorRequest::new(SearchParams::new(0, 600))
        .with_access(AccessEgress::walk(network.get_stop_idx("B"), 30, 30))
        .with_egress(AccessEgress::walk(network.get_stop_idx("D"), 20, 20));
    let summary = |paths: Vec<RaptorPath>| {
        let mut keys: Vec<_> = paths
            .iter()
            .map(|p| (p.start_time, p.end_time, p.c1, p.transit_legs().next().map(|leg| leg.route)))
            .collect();
        keys.sort();
        keys
    };

    assert_eq!(summary(route(&request, &network)), vec![(90, 260, 230, Some(r1))]);

    let strict = request.clone().with_relaxed_limited_transfer(
        RelaxedLimitedTransferRequest::default().with_relax_c1(RelaxFunction::new(1.0, 0)),
    );
    assert_eq!(summary(route(&strict, &network)), vec![(90, 260, 230, Some(r1))]);

    let relaxed = request.with_relaxed_limited_transfer(
        RelaxedLimitedTransferRequest::default().with_relax_c1(RelaxFunction::new(1.5, 60)),
    );
    assert_eq!(
        summary(route(&relaxed, &network)),
        vec![(30, 320, 350, Some(r2)), (90, 260, 230, Some(r1))]
    );
}

#[test]
fn invalid_requests_are_rejected() {
    let network = frequent_network();
    let request = RaptorRequest::new(SearchParams::new(t("08:00:00"), -60));
    assert!(matches!(
        RaptorService::default().route(&request, &network),
        Err(RaptorError::InvalidRequest(_))
    ));
}
