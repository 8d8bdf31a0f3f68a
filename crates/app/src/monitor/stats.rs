//! Single-slot metrics store shared between the inference writer and its
//! readers, plus the fixed-cadence publisher feeding the stats channel.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use crate::monitor::{
    broadcast::Broadcaster,
    data::Metrics,
    telemetry,
    watchdog::{HealthComponent, PipelineHealth},
};

/// Latest `Metrics` value with replace/snapshot semantics.
///
/// The inference worker is the only writer; any number of readers take
/// complete snapshots. Readers never observe a partially-updated value
/// because the slot is swapped whole under the lock, and a poisoned lock is
/// recovered rather than wedging the pipeline.
#[derive(Clone)]
pub(crate) struct StatsStore {
    inner: Arc<Mutex<Metrics>>,
}

impl StatsStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Metrics::zero())),
        }
    }

    pub(crate) fn replace(&self, metrics: Metrics) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = metrics;
    }

    pub(crate) fn snapshot(&self) -> Metrics {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Spawn the stats publisher thread.
///
/// Runs on its own fixed interval, independent of inference cadence: a slow
/// inference cycle does not starve metrics delivery and a fast one does not
/// flood it.
pub(crate) fn spawn_stats_publisher(
    stats: StatsStore,
    feed: Broadcaster<Metrics>,
    interval: Duration,
    health: Arc<PipelineHealth>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("monitor-stats", move || {
        let mut next_tick = Instant::now();
        while running.load(Ordering::Relaxed) && !shutdown.load(Ordering::Relaxed) {
            health.beat(HealthComponent::StatsPublisher);
            feed.publish(stats.snapshot());
            next_tick += interval;
            if let Some(wait) = next_tick.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            } else {
                next_tick = Instant::now();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(count: u64, density: f64, high: bool) -> Metrics {
        Metrics {
            larvae_count: count,
            density_per_cm2: density,
            density_per_m2: density * 10_000.0,
            is_high_density: high,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn starts_at_zero() {
        let store = StatsStore::new();
        let metrics = store.snapshot();
        assert_eq!(metrics.larvae_count, 0);
        assert!(!metrics.is_high_density);
    }

    #[test]
    fn snapshot_reflects_latest_replace() {
        let store = StatsStore::new();
        store.replace(reading(7, 0.02, false));
        assert_eq!(store.snapshot().larvae_count, 7);
        store.replace(reading(621, 1.5, true));
        let metrics = store.snapshot();
        assert_eq!(metrics.larvae_count, 621);
        assert!(metrics.is_high_density);
    }

    #[test]
    fn readers_only_see_complete_values() {
        // One writer alternates between two self-consistent readings while
        // readers assert they never observe a mixed one.
        let store = StatsStore::new();
        let writer_store = store.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let writer_stop = stop.clone();

        let writer = thread::spawn(move || {
            for i in 0..2_000u64 {
                if i % 2 == 0 {
                    writer_store.replace(reading(621, 1.5, true));
                } else {
                    writer_store.replace(reading(2, 0.0048, false));
                }
            }
            writer_stop.store(true, Ordering::SeqCst);
        });

        let mut observed = 0u64;
        while !stop.load(Ordering::SeqCst) {
            let metrics = store.snapshot();
            let consistent = (metrics.larvae_count == 621
                && metrics.is_high_density
                && metrics.density_per_cm2 == 1.5)
                || (metrics.larvae_count == 2
                    && !metrics.is_high_density
                    && metrics.density_per_cm2 == 0.0048)
                || metrics.larvae_count == 0;
            assert!(consistent, "observed a torn metrics value");
            observed += 1;
        }
        assert!(observed > 0);
        writer.join().expect("writer thread");
    }
}
