use raptor::network::{StopIndex, Timestamp};
use raptor::{utils, AccessEgress, Network, NetworkBuilder, RaptorRequest, SearchParams};

// Common example data for the demos and benchmarks: a synthetic city laid out as a grid, with one
// line per row and per column running in both directions.

pub const GRID_SIZE: usize = 12;

const FIRST_DEPARTURE: Timestamp = 6 * 3600;
const LAST_DEPARTURE: Timestamp = 11 * 3600;
const HEADWAY: Timestamp = 10 * 60;
const HOP_TIME: Timestamp = 2 * 60;

pub const ROW_GROUP: u32 = 1;
pub const COLUMN_GROUP: u32 = 2;

pub fn stop_name(row: usize, col: usize) -> String { format!("S{row}_{col}") }

pub fn get_example_transfer_time() -> Timestamp {
    3 * 60 // 3 minutes transfer time.
}

fn add_line(builder: &mut NetworkBuilder, rng: &mut fastrand::Rng, line: &str, stops: &[String], group: u32) {
    let names: Vec<&str> = stops.iter().map(String::as_str).collect();
    let route = builder.add_route(line, &names);
    builder.set_priority_group(route, group);

    // Each line gets its own offset so that connections are not all perfectly timed.
    let offset = rng.i32(0..HEADWAY);
    let mut start = FIRST_DEPARTURE + offset;
    while start <= LAST_DEPARTURE {
        let mut times = Vec::with_capacity(names.len());
        let mut time = start;
        for _ in 0..names.len() {
            let dwell = rng.i32(0..=30);
            times.push((time, time + dwell));
            time += dwell + HOP_TIME;
        }
        builder.add_trip(route, &times);
        start += HEADWAY;
    }
}

/// Builds a `size` x `size` grid network. The same seed always gives the same timetable.
pub fn build_grid_network(size: usize, seed: u64) -> Network {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut builder = NetworkBuilder::new(get_example_transfer_time());

    for row in 0..size {
        let mut stops: Vec<String> = (0..size).map(|col| stop_name(row, col)).collect();
        add_line(&mut builder, &mut rng, &format!("R{row}E"), &stops, ROW_GROUP);
        stops.reverse();
        add_line(&mut builder, &mut rng, &format!("R{row}W"), &stops, ROW_GROUP);
    }
    for col in 0..size {
        let mut stops: Vec<String> = (0..size).map(|row| stop_name(row, col)).collect();
        add_line(&mut builder, &mut rng, &format!("C{col}S"), &stops, COLUMN_GROUP);
        stops.reverse();
        add_line(&mut builder, &mut rng, &format!("C{col}N"), &stops, COLUMN_GROUP);
    }

    // Diagonal walks between neighbouring blocks.
    for row in 0..size - 1 {
        for col in 0..size - 1 {
            let (a, b) = (stop_name(row, col), stop_name(row + 1, col + 1));
            builder.add_transfer(&a, &b, 5 * 60, 5 * 60);
            builder.add_transfer(&b, &a, 5 * 60, 5 * 60);
        }
    }

    builder.build()
}

pub fn get_example_start_time() -> Timestamp { utils::parse_time("08:30:00").unwrap() }

pub fn get_example_start_stop_idx(network: &Network) -> StopIndex {
    network.get_stop_idx_from_name(&stop_name(0, 0)).unwrap()
}

pub fn get_example_end_stop_idx(network: &Network) -> StopIndex {
    network.get_stop_idx_from_name(&stop_name(GRID_SIZE - 1, GRID_SIZE - 2)).unwrap()
}

pub fn get_example_scenario() -> (Network, StopIndex, Timestamp, StopIndex) {
    let network = build_grid_network(GRID_SIZE, 7);
    let start = get_example_start_stop_idx(&network);
    let start_time = get_example_start_time();
    let end = get_example_end_stop_idx(&network);
    (network, start, start_time, end)
}

/// A request walking 5 minutes to `start` and 3 minutes from `end`, over a one hour window.
pub fn get_example_request(start: StopIndex, start_time: Timestamp, end: StopIndex) -> RaptorRequest {
    RaptorRequest::new(SearchParams::new(start_time, 3600))
        .with_access(AccessEgress::walk(start, 5 * 60, 5 * 60))
        .with_egress(AccessEgress::walk(end, 3 * 60, 3 * 60))
}
