use std::sync::Arc;

use crate::multicriteria::ParetoCriteria;
use crate::pareto::{ParetoSet, ParetoSetEventListener};
use crate::path::RaptorPath;
use crate::raptor::{SingleCriteriaStopArrivals, WorkerState};
use crate::timers::SearchTimers;

/// The outcome of one sub-search: a range search over a batch of iterations or a shortcut search.
#[derive(Clone, Debug)]
pub struct RaptorRouterResult {
    pub paths: Vec<RaptorPath>,
    pub iterations: usize,
    pub state: WorkerState,
    /// Best single-criterion arrivals per stop. Shortcut searches have none.
    pub diagnostics: Option<SingleCriteriaStopArrivals>,
    pub timers: SearchTimers,
}

impl RaptorRouterResult {
    pub fn is_budget_exhausted(&self) -> bool { self.state == WorkerState::BudgetExhausted }
}

/// Merges sub-search results into one Pareto set of paths.
pub struct RouterResultPathAggregator {
    comparator: ParetoCriteria<RaptorPath>,
    listener: Option<Arc<dyn ParetoSetEventListener<RaptorPath>>>,
}

impl RouterResultPathAggregator {
    pub fn new(
        comparator: ParetoCriteria<RaptorPath>,
        listener: Option<Arc<dyn ParetoSetEventListener<RaptorPath>>>,
    ) -> Self {
        Self { comparator, listener }
    }

    /// Diagnostics are taken from the first result that has them, not merged over all results.
    pub fn merge(&self, results: Vec<RaptorRouterResult>) -> RaptorRouterResult {
        let mut paths = ParetoSet::with_listener(self.comparator.clone(), self.listener.clone());
        let mut timers = SearchTimers::default();
        let mut diagnostics = None;
        let mut iterations = 0;
        let mut state = WorkerState::Converged;

        for result in results {
            for path in result.paths {
                // A relaxed comparator lets equal paths dominate each other.
                if !paths.iter().any(|p| same_criteria(p, &path)) {
                    paths.add(path);
                }
            }
            timers.merge(&result.timers);
            iterations += result.iterations;
            if result.state == WorkerState::BudgetExhausted {
                state = WorkerState::BudgetExhausted;
            }
            if diagnostics.is_none() {
                diagnostics = result.diagnostics;
            }
        }

        RaptorRouterResult {
            paths: paths.into_vec(),
            iterations,
            state,
            diagnostics,
            timers,
        }
    }
}

fn same_criteria(a: &RaptorPath, b: &RaptorPath) -> bool {
    a.start_time == b.start_time
        && a.end_time == b.end_time
        && a.number_of_transfers == b.number_of_transfers
        && a.c1 == b.c1
        && a.c2 == b.c2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{path_criteria, relaxed_path_criteria, RaptorRequest, SearchParams};
    use crate::multicriteria::RelaxFunction;

    fn path(start: i32, end: i32, transfers: usize, c1: i32) -> RaptorPath {
        RaptorPath {
            iteration_departure_time: start,
            start_time: start,
            end_time: end,
            number_of_transfers: transfers,
            c1,
            c2: 0,
            legs: Vec::new(),
        }
    }

    fn result(paths: Vec<RaptorPath>, state: WorkerState) -> RaptorRouterResult {
        RaptorRouterResult {
            paths,
            iterations: 2,
            state,
            diagnostics: None,
            timers: SearchTimers::default(),
        }
    }

    fn sorted(mut paths: Vec<RaptorPath>) -> Vec<(i32, i32, usize, i32)> {
        let mut keys: Vec<_> =
            paths.drain(..).map(|p| (p.start_time, p.end_time, p.number_of_transfers, p.c1)).collect();
        keys.sort();
        keys
    }

    #[test]
    fn merge_is_order_independent() {
        let request = RaptorRequest::new(SearchParams::new(0, 600));
        let aggregator = RouterResultPathAggregator::new(path_criteria(&request), None);

        let mut candidates = vec![
            path(0, 1000, 0, 900),
            path(0, 900, 1, 1000),
            path(60, 1000, 0, 800),
            path(0, 1100, 0, 1200),
            path(120, 1300, 2, 500),
            path(60, 1000, 1, 900),
        ];
        let expected = sorted(aggregator.merge(vec![result(candidates.clone(), WorkerState::Converged)]).paths);
        assert_eq!(expected.len(), 3);

        let mut rng = fastrand::Rng::with_seed(11);
        for _ in 0..20 {
            rng.shuffle(&mut candidates);
            let split = rng.usize(..=candidates.len());
            let (a, b) = candidates.split_at(split);
            let merged = aggregator.merge(vec![
                result(a.to_vec(), WorkerState::Converged),
                result(b.to_vec(), WorkerState::BudgetExhausted),
            ]);
            assert_eq!(sorted(merged.paths.clone()), expected);
            assert_eq!(merged.iterations, 4);
            assert!(merged.is_budget_exhausted());
        }
    }

    #[test]
    fn relaxed_merge_keeps_costlier_paths_once() {
        let request = RaptorRequest::new(SearchParams::new(0, 600));
        let aggregator =
            RouterResultPathAggregator::new(relaxed_path_criteria(&request, RelaxFunction::new(1.5, 60)), None);

        let cheap = path(90, 260, 0, 230);
        let early = path(30, 320, 0, 350);
        let merged = aggregator.merge(vec![
            result(vec![cheap.clone()], WorkerState::Converged),
            result(vec![cheap.clone(), early.clone()], WorkerState::Converged),
        ]);
        assert_eq!(sorted(merged.paths), vec![(30, 320, 0, 350), (90, 260, 0, 230)]);

        let strict = RouterResultPathAggregator::new(path_criteria(&request), None);
        let merged = strict.merge(vec![result(vec![cheap, early], WorkerState::Converged)]);
        assert_eq!(sorted(merged.paths), vec![(90, 260, 0, 230)]);
    }
}
