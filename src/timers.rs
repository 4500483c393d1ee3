use std::time::{Duration, Instant};

use log::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerPhase {
    /// One full iteration of a worker.
    Route,
    Transit,
    Transfers,
    Shortcut,
}

impl TimerPhase {
    pub const ALL: [TimerPhase; 4] = [Self::Route, Self::Transit, Self::Transfers, Self::Shortcut];

    pub fn name(self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::Transit => "transit",
            Self::Transfers => "transfers",
            Self::Shortcut => "shortcut",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseTimer {
    pub total: Duration,
    pub count: u64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to record timer {name}: {reason}")]
pub struct TimerError {
    pub name: String,
    pub reason: String,
}

/// Receives phase timings at the end of a request, e.g. to export them as metrics.
pub trait TimerHooks: Send + Sync {
    fn record(&self, name: &str, total: Duration, count: u64) -> Result<(), TimerError>;
}

/// Reports timings to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTimerHooks;

impl TimerHooks for LogTimerHooks {
    fn record(&self, name: &str, total: Duration, count: u64) -> Result<(), TimerError> {
        debug!("Timer {name}: {total:?} over {count} runs.");
        Ok(())
    }
}

/// Named phase timers. All operations are no-ops when disabled.
#[derive(Clone, Debug, Default)]
pub struct SearchTimers {
    enabled: bool,
    phases: [PhaseTimer; 4],
}

impl SearchTimers {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            phases: Default::default(),
        }
    }

    pub fn start(&self) -> Option<Instant> { self.enabled.then(Instant::now) }

    pub fn stop(&mut self, phase: TimerPhase, start: Option<Instant>) {
        if let Some(start) = start {
            let timer = &mut self.phases[phase as usize];
            timer.total += start.elapsed();
            timer.count += 1;
        }
    }

    pub fn get(&self, phase: TimerPhase) -> PhaseTimer { self.phases[phase as usize] }

    pub fn merge(&mut self, other: &SearchTimers) {
        self.enabled |= other.enabled;
        for (timer, other) in self.phases.iter_mut().zip(&other.phases) {
            timer.total += other.total;
            timer.count += other.count;
        }
    }

    /// Hands every phase with at least one run to `hooks`. A failing hook is logged and skipped.
    pub fn report(&self, hooks: &dyn TimerHooks) {
        if !self.enabled {
            return;
        }
        for phase in TimerPhase::ALL {
            let timer = self.get(phase);
            if timer.count == 0 {
                continue;
            }
            if let Err(e) = hooks.record(phase.name(), timer.total, timer.count) {
                warn!("{e}");
            }
        }
    }
}
