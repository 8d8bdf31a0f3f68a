//! Watchdog responsible for detecting stalled pipeline stages and triggering
//! restarts.
//!
//! Tracks heartbeats from the inference worker, the stats publisher, and the
//! alert sampler. When any of them stops beating the session shuts down and
//! the supervisor restarts it. Inference gets a wider stale threshold because
//! a single slow oracle call is expected, not a stall.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::error;

use crate::monitor::telemetry;

/// Sleep interval between watchdog health checks.
pub(crate) const WATCHDOG_POLL_INTERVAL_MS: u64 = 500;
/// Grace period at startup allowing components to warm up before monitoring.
pub(crate) const WATCHDOG_STARTUP_GRACE_MS: u64 = 5_000;

const INFERENCE_STALE_THRESHOLD_MS: u64 = 5_000;
const PUBLISHER_STALE_THRESHOLD_MS: u64 = 1_500;
const SAMPLER_STALE_THRESHOLD_MS: u64 = 35_000;

#[derive(Copy, Clone, Debug)]
/// Logical components monitored by the watchdog.
pub(crate) enum HealthComponent {
    Inference,
    StatsPublisher,
    AlertSampler,
}

impl HealthComponent {
    /// Human readable label used in log messages.
    pub(crate) fn label(self) -> &'static str {
        match self {
            HealthComponent::Inference => "inference",
            HealthComponent::StatsPublisher => "stats publisher",
            HealthComponent::AlertSampler => "alert sampler",
        }
    }

    fn stale_threshold_ms(self) -> u64 {
        match self {
            HealthComponent::Inference => INFERENCE_STALE_THRESHOLD_MS,
            HealthComponent::StatsPublisher => PUBLISHER_STALE_THRESHOLD_MS,
            HealthComponent::AlertSampler => SAMPLER_STALE_THRESHOLD_MS,
        }
    }
}

pub(crate) struct PipelineHealth {
    inference: AtomicU64,
    publisher: AtomicU64,
    sampler: AtomicU64,
}

impl PipelineHealth {
    /// Initialise the health tracker with grace periods for each component.
    pub(crate) fn new() -> Self {
        let now = current_millis();
        let grace_deadline = now.saturating_add(WATCHDOG_STARTUP_GRACE_MS);
        Self {
            inference: AtomicU64::new(grace_deadline),
            publisher: AtomicU64::new(grace_deadline),
            sampler: AtomicU64::new(grace_deadline),
        }
    }

    /// Register a heartbeat for the supplied component.
    pub(crate) fn beat(&self, component: HealthComponent) {
        let now = current_millis();
        match component {
            HealthComponent::Inference => self.inference.store(now, Ordering::Relaxed),
            HealthComponent::StatsPublisher => self.publisher.store(now, Ordering::Relaxed),
            HealthComponent::AlertSampler => self.sampler.store(now, Ordering::Relaxed),
        }
    }

    /// Returns the first component that has not produced a heartbeat recently.
    pub(crate) fn stale_component(&self, now: u64) -> Option<HealthComponent> {
        let checks = [
            (HealthComponent::Inference, &self.inference),
            (HealthComponent::StatsPublisher, &self.publisher),
            (HealthComponent::AlertSampler, &self.sampler),
        ];
        for (component, last_beat) in checks {
            let age = now.saturating_sub(last_beat.load(Ordering::Relaxed));
            if age > component.stale_threshold_ms() {
                return Some(component);
            }
        }
        None
    }
}

/// Shared state exposing watchdog triggers to the pipeline supervisor.
pub(crate) struct WatchdogState {
    triggered: AtomicBool,
    reason: Mutex<Option<HealthComponent>>,
}

impl WatchdogState {
    /// Create an unarmed watchdog state.
    pub(crate) fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    /// Record a trigger reason and mark the watchdog as fired.
    pub(crate) fn arm(&self, component: HealthComponent) {
        let mut guard = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(component);
        drop(guard);
        self.triggered.store(true, Ordering::SeqCst);
    }

    /// Returns whether the watchdog fired.
    pub(crate) fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Describe the component that caused the trigger, if known.
    pub(crate) fn reason(&self) -> Option<HealthComponent> {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Spawn the watchdog thread that polls component health and requests restarts.
pub(crate) fn spawn_watchdog(
    health: Arc<PipelineHealth>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    state: Arc<WatchdogState>,
) -> std::io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("monitor-watchdog", move || {
        while running.load(Ordering::Relaxed) && !shutdown.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(WATCHDOG_POLL_INTERVAL_MS));
            let now = current_millis();
            if let Some(component) = health.stale_component(now) {
                error!(
                    "Watchdog detected stalled {} stage; requesting pipeline restart",
                    component.label()
                );
                state.arm(component);
                running.store(false, Ordering::SeqCst);
                break;
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
