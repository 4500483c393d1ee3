use log::{debug, info};
use rayon::prelude::*;

use crate::aggregator::{RaptorRouterResult, RouterResultPathAggregator};
use crate::config::RaptorConfig;
use crate::context::{RaptorRequest, SearchContext};
use crate::direct::{OnBoardDirectSearch, RelaxedLimitedTransferRequest, RelaxedLimitedTransferSearch};
use crate::network::{Timestamp, TransitDataProvider};
use crate::path::RaptorPath;
use crate::raptor::{RangeRaptorSearch, SearchBudget, SingleCriteriaStopArrivals};
use crate::timers::LogTimerHooks;
use crate::transfer::TransferIndexError;

#[derive(thiserror::Error, Debug)]
pub enum RaptorError {
    #[error("Invalid request: {0}.")]
    InvalidRequest(String),
    #[error("On-board access is not supported in a reverse search.")]
    OnBoardAccessNotSupported,
    #[error(transparent)]
    TransferIndex(#[from] TransferIndexError),
}

#[derive(Clone, Debug)]
pub struct RaptorResponse {
    pub paths: Vec<RaptorPath>,
    pub destination_reached: bool,
    /// The search stopped early. The paths are the best found until then.
    pub budget_exhausted: bool,
    pub iterations: usize,
    pub diagnostics: Option<SingleCriteriaStopArrivals>,
}

enum SubSearch<'b> {
    Range(&'b [Timestamp]),
    OnBoard,
    RelaxedLimitedTransfer(RelaxedLimitedTransferRequest),
}

/// Entry point of the router. One service can answer any number of concurrent requests.
#[derive(Clone, Debug, Default)]
pub struct RaptorService {
    config: RaptorConfig,
}

impl RaptorService {
    pub fn new(config: RaptorConfig) -> Self { Self { config } }

    pub fn config(&self) -> &RaptorConfig { &self.config }

    pub fn route<D: TransitDataProvider>(
        &self,
        request: &RaptorRequest,
        data: &D,
    ) -> Result<RaptorResponse, RaptorError> {
        request.validate()?;
        data.check_transfers_indexed()?;

        let ctx = SearchContext::new(request, data);
        let params = ctx.params();
        let iteration_times = ctx.iteration_times();
        let budget = SearchBudget::new(params.max_iterations, params.timeout);

        let batch_size = self.config.iteration_batch_size.unwrap_or(iteration_times.len()).max(1);
        let mut searches: Vec<SubSearch> = iteration_times.chunks(batch_size).map(SubSearch::Range).collect();
        if request.has_on_board_access() {
            searches.push(SubSearch::OnBoard);
        }
        if let Some(relaxed) = &request.relaxed_limited_transfer {
            if ctx.calculator.is_forward() {
                searches.push(SubSearch::RelaxedLimitedTransfer(relaxed.clone()));
            } else {
                debug!("Relaxed limited transfer search skipped for reverse search.");
            }
        }
        debug!(
            "Routing {} iterations in {} sub-searches over {} segments.",
            iteration_times.len(),
            searches.len(),
            ctx.num_segments()
        );

        let enable_timers = self.config.enable_timers;
        let run = |search: &SubSearch| -> RaptorRouterResult {
            match search {
                SubSearch::Range(times) => RangeRaptorSearch::new(&ctx, budget.clone(), enable_timers).run(times),
                SubSearch::OnBoard => OnBoardDirectSearch::new(&ctx).route(enable_timers),
                SubSearch::RelaxedLimitedTransfer(relaxed) => {
                    RelaxedLimitedTransferSearch::new(&ctx, relaxed.clone()).route(enable_timers)
                }
            }
        };
        let results: Vec<RaptorRouterResult> = if self.config.parallel_sub_searches {
            searches.par_iter().map(run).collect()
        } else {
            searches.iter().map(run).collect()
        };

        let aggregator = RouterResultPathAggregator::new(ctx.merge_criteria(), request.path_listener.clone());
        let merged = aggregator.merge(results);

        match &self.config.timer_hooks {
            Some(hooks) => merged.timers.report(hooks.as_ref()),
            None => merged.timers.report(&LogTimerHooks),
        }

        let response = RaptorResponse {
            destination_reached: !merged.paths.is_empty(),
            budget_exhausted: merged.is_budget_exhausted(),
            iterations: merged.iterations,
            diagnostics: merged.diagnostics,
            paths: merged.paths,
        };
        info!(
            "Found {} paths in {} iterations{}.",
            response.paths.len(),
            response.iterations,
            if response.budget_exhausted { " (budget exhausted)" } else { "" }
        );
        Ok(response)
    }
}
