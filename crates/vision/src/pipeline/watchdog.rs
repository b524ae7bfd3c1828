//! Watchdog reporting stalled pipeline stages.
//!
//! The capture and inference threads beat on every completed cycle. When a
//! stage stops beating the watchdog logs it once and exposes the stage through
//! `/status`; it never restarts anything. Recovery is logged as well.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::{info, warn};

use crate::pipeline::telemetry;

/// Sleep interval between watchdog health checks.
pub(crate) const WATCHDOG_POLL_INTERVAL_MS: u64 = 500;
/// Time without a heartbeat before a component is considered stalled.
pub(crate) const WATCHDOG_STALE_THRESHOLD_MS: u64 = 2_000;
/// Grace period at startup allowing components to warm up before monitoring.
pub(crate) const WATCHDOG_STARTUP_GRACE_MS: u64 = 5_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Logical components monitored by the watchdog.
pub enum HealthComponent {
    Capture,
    Inference,
}

impl HealthComponent {
    /// Human readable label used in log messages and `/status`.
    pub fn label(self) -> &'static str {
        match self {
            HealthComponent::Capture => "capture",
            HealthComponent::Inference => "inference",
        }
    }
}

pub struct PipelineHealth {
    capture: AtomicU64,
    inference: AtomicU64,
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineHealth {
    /// Initialise the health tracker with grace periods for each component.
    pub fn new() -> Self {
        Self::starting_at(current_millis())
    }

    pub(crate) fn starting_at(now: u64) -> Self {
        let grace_deadline = now.saturating_add(WATCHDOG_STARTUP_GRACE_MS);
        Self {
            capture: AtomicU64::new(grace_deadline),
            inference: AtomicU64::new(grace_deadline),
        }
    }

    /// Register a heartbeat for the supplied component.
    pub fn beat(&self, component: HealthComponent) {
        self.beat_at(component, current_millis());
    }

    pub(crate) fn beat_at(&self, component: HealthComponent, now: u64) {
        match component {
            HealthComponent::Capture => self.capture.store(now, Ordering::Relaxed),
            HealthComponent::Inference => self.inference.store(now, Ordering::Relaxed),
        }
    }

    /// Returns the first component that has not produced a heartbeat recently.
    pub fn stale_component(&self, now: u64) -> Option<HealthComponent> {
        if now.saturating_sub(self.capture.load(Ordering::Relaxed)) > WATCHDOG_STALE_THRESHOLD_MS {
            return Some(HealthComponent::Capture);
        }
        if now.saturating_sub(self.inference.load(Ordering::Relaxed)) > WATCHDOG_STALE_THRESHOLD_MS
        {
            return Some(HealthComponent::Inference);
        }
        None
    }
}

/// Most recent watchdog verdict, read by the status endpoint.
#[derive(Default)]
pub struct WatchdogState {
    stalled: Mutex<Option<HealthComponent>>,
}

impl WatchdogState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the verdict, returning whether it changed.
    pub(crate) fn update(&self, verdict: Option<HealthComponent>) -> bool {
        let mut guard = self.stalled.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = *guard != verdict;
        *guard = verdict;
        changed
    }

    pub fn stalled(&self) -> Option<HealthComponent> {
        *self.stalled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Spawn the watchdog thread that polls component health until `running` clears.
pub(crate) fn spawn_watchdog(
    health: Arc<PipelineHealth>,
    running: Arc<AtomicBool>,
    state: Arc<WatchdogState>,
) -> std::io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("vision-watchdog", move || {
        while running.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(WATCHDOG_POLL_INTERVAL_MS));
            let verdict = health.stale_component(current_millis());
            if !state.update(verdict) {
                continue;
            }
            match verdict {
                Some(component) => {
                    warn!("Watchdog detected stalled {} stage", component.label());
                    metrics::counter!("vision_watchdog_stalls_total", "stage" => component.label())
                        .increment(1);
                }
                None => info!("Watchdog: all pipeline stages healthy again"),
            }
        }
    })
}

pub(crate) fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
