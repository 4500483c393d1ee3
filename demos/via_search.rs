use raptor::{RaptorService, TransitDataProvider, ViaLocation};

use dev_utils::{get_example_request, get_example_scenario, stop_name};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (network, start, start_time, end) = get_example_scenario();

    // Visit the centre of the grid for at least ten minutes on the way.
    let centre = network.get_stop_idx(&stop_name(6, 6));
    let request = get_example_request(start, start_time, end).with_via(ViaLocation::visit("Centre", 10 * 60, &[centre]));
    let response = RaptorService::default().route(&request, &network)?;

    println!("{} journeys via {}:", response.paths.len(), network.stop_name(centre));
    for path in &response.paths {
        println!("{}", path.display(&network));
    }

    Ok(())
}
