use std::fmt;
use std::sync::Arc;

use crate::timers::TimerHooks;

/// Router-wide settings, fixed when the [`crate::RaptorService`] is created.
#[derive(Clone)]
pub struct RaptorConfig {
    /// Run the sub-searches of a request on the rayon thread pool.
    pub parallel_sub_searches: bool,
    /// Split the iterations of a request into independent batches of this size.
    pub iteration_batch_size: Option<usize>,
    pub enable_timers: bool,
    /// Where timings go at the end of a request. Defaults to the log.
    pub timer_hooks: Option<Arc<dyn TimerHooks>>,
}

impl Default for RaptorConfig {
    fn default() -> Self {
        Self {
            parallel_sub_searches: true,
            iteration_batch_size: None,
            enable_timers: false,
            timer_hooks: None,
        }
    }
}

impl RaptorConfig {
    pub fn serial() -> Self {
        Self {
            parallel_sub_searches: false,
            ..Default::default()
        }
    }

    pub fn with_iteration_batch_size(mut self, batch_size: usize) -> Self {
        assert!(batch_size > 0, "Iteration batch size must be positive.");
        self.iteration_batch_size = Some(batch_size);
        self
    }

    pub fn with_timers(mut self, hooks: Option<Arc<dyn TimerHooks>>) -> Self {
        self.enable_timers = true;
        self.timer_hooks = hooks;
        self
    }
}

impl fmt::Debug for RaptorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaptorConfig")
            .field("parallel_sub_searches", &self.parallel_sub_searches)
            .field("iteration_batch_size", &self.iteration_batch_size)
            .field("enable_timers", &self.enable_timers)
            .field("timer_hooks", &self.timer_hooks.is_some())
            .finish()
    }
}
