use std::sync::Arc;

use raptor::multicriteria::BitwiseGroupPriority;
use raptor::{RaptorConfig, RaptorService};

use dev_utils::{get_example_request, get_example_scenario};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (network, start, start_time, end) = get_example_scenario();
    network.print_stats();

    let request = get_example_request(start, start_time, end).with_group_priority(Arc::new(BitwiseGroupPriority));
    let service = RaptorService::new(RaptorConfig::default().with_timers(None));
    let response = service.route(&request, &network)?;

    if !response.destination_reached {
        println!("No journey found.");
    }
    for path in &response.paths {
        println!("{}", path.display(&network));
    }

    Ok(())
}
