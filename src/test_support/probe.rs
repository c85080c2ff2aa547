//! Health probe that follows a fixed script instead of contacting a server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::supervisor::{HealthProbe, ProbeStatus, ProbeTarget};

/// Uptime reported by [`ScriptedProbe`] once it turns healthy.
pub const SCRIPTED_UPTIME_SECS: f64 = 1.0;

/// Reports "not ready" until a given attempt, then healthy.
#[derive(Debug)]
pub struct ScriptedProbe {
    healthy_from: Option<usize>,
    calls: AtomicUsize,
    largest_budget: Mutex<Option<Duration>>,
}

impl ScriptedProbe {
    /// Healthy from the `attempt`-th check onwards (1-based).
    #[must_use]
    pub const fn healthy_after(attempt: usize) -> Self {
        Self {
            healthy_from: Some(attempt),
            calls: AtomicUsize::new(0),
            largest_budget: Mutex::new(None),
        }
    }

    /// Healthy on the first check.
    #[must_use]
    pub const fn always_healthy() -> Self {
        Self::healthy_after(1)
    }

    /// Never healthy.
    #[must_use]
    pub const fn never_healthy() -> Self {
        Self {
            healthy_from: None,
            calls: AtomicUsize::new(0),
            largest_budget: Mutex::new(None),
        }
    }

    /// Number of checks performed so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Largest time budget any check was granted.
    #[must_use]
    pub fn largest_budget(&self) -> Option<Duration> {
        *self
            .largest_budget
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl HealthProbe for ScriptedProbe {
    fn check(&self, target: &ProbeTarget, budget: Duration) -> ProbeStatus {
        let mut largest = self
            .largest_budget
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *largest = Some(largest.map_or(budget, |seen| seen.max(budget)));
        drop(largest);
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        match self.healthy_from {
            Some(threshold) if attempt >= threshold => ProbeStatus::Healthy {
                uptime_secs: SCRIPTED_UPTIME_SECS,
            },
            _ => ProbeStatus::NotReady(format!(
                "scripted attempt {attempt} against port {}",
                target.port
            )),
        }
    }
}
