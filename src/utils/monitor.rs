use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTiming {
    pub phase: String,
    pub elapsed: Duration,
    pub items: usize,
}

/// Per-run timing collector, owned by the engine driving the run.
pub struct RunMetrics {
    enabled: bool,
    started: Instant,
    phases: Mutex<Vec<PhaseTiming>>,
}

impl RunMetrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            started: Instant::now(),
            phases: Mutex::new(Vec::new()),
        }
    }

    /// Timings are always collected; `enabled` only controls logging.
    pub fn record(&self, phase: &str, elapsed: Duration, items: usize) {
        if self.enabled {
            tracing::info!("📊 {} - {} records in {:?}", phase, items, elapsed);
        }
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PhaseTiming {
                phase: phase.to_string(),
                elapsed,
                items,
            });
    }

    pub fn phases(&self) -> Vec<PhaseTiming> {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn log_final_stats(&self) {
        if self.enabled {
            tracing::info!("📊 Final Stats - Total Time: {:?}", self.elapsed());
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new(false)
    }
}
