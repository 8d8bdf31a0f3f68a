//! Density alerting: the fixed-interval sampler, the cooldown debounce, and
//! the notification sink that fans an alert out to live consumers and the
//! persistent logs.
//!
//! The sampler reads the stats store on its own clock, decoupled from
//! inference cadence. A dispatched alert starts a cooldown window; high
//! readings inside the window are suppressed, and a reading at or past the
//! window boundary alerts again if density is still high.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;
use tracing::{error, info};
use video_ingest::SharedSource;

use crate::monitor::{
    annotate,
    broadcast::Broadcaster,
    data::{AlertRecord, Metrics},
    stats::StatsStore,
    store::{NotificationLog, SnapshotLog},
    telemetry,
    watchdog::{HealthComponent, PipelineHealth},
};

/// Cooldown debounce for repeated alerts.
pub(crate) struct CooldownState {
    last_alert_at: Option<Instant>,
    cooldown: Duration,
}

impl CooldownState {
    pub(crate) fn new(cooldown: Duration) -> Self {
        Self {
            last_alert_at: None,
            cooldown,
        }
    }

    /// Whether a new alert may fire at `now`. The boundary itself is ready:
    /// exactly one cooldown after the last alert counts as elapsed.
    fn ready(&self, now: Instant) -> bool {
        match self.last_alert_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
        }
    }

    fn mark_dispatched(&mut self, now: Instant) {
        self.last_alert_at = Some(now);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AlertDecision {
    /// High density and out of cooldown: alert now.
    Dispatch,
    /// High density but still cooling down.
    Suppressed,
    /// Density below threshold; nothing to do.
    Healthy,
}

/// Evaluate one sampled reading against the cooldown state. Marks the state
/// as dispatched when the decision is `Dispatch`.
pub(crate) fn evaluate(state: &mut CooldownState, metrics: &Metrics, now: Instant) -> AlertDecision {
    if !metrics.is_high_density {
        return AlertDecision::Healthy;
    }
    if !state.ready(now) {
        return AlertDecision::Suppressed;
    }
    state.mark_dispatched(now);
    AlertDecision::Dispatch
}

pub(crate) fn make_alert_record(metrics: &Metrics) -> AlertRecord {
    AlertRecord {
        title: "High larva density".to_string(),
        message: format!(
            "Larva density is high: {:.2} larvae/cm2",
            metrics.density_per_cm2
        ),
        larvae_count: metrics.larvae_count,
        density_per_cm2: metrics.density_per_cm2,
        timestamp: Utc::now(),
    }
}

/// Delivers one alert to every destination.
///
/// Live publication happens first and is never rolled back: persistence is
/// best-effort and its failures are logged, not propagated. The snapshot
/// borrows the shared capture device, so it naturally serialises against the
/// inference worker's reads.
pub(crate) struct NotificationSink {
    alerts: Broadcaster<AlertRecord>,
    notifications: Arc<dyn NotificationLog>,
    snapshots: Arc<dyn SnapshotLog>,
    source: SharedSource,
    jpeg_quality: i32,
}

impl NotificationSink {
    pub(crate) fn new(
        alerts: Broadcaster<AlertRecord>,
        notifications: Arc<dyn NotificationLog>,
        snapshots: Arc<dyn SnapshotLog>,
        source: SharedSource,
        jpeg_quality: i32,
    ) -> Self {
        Self {
            alerts,
            notifications,
            snapshots,
            source,
            jpeg_quality,
        }
    }

    pub(crate) fn dispatch(&self, record: AlertRecord) {
        info!(
            "Density alert: {} larvae, {:.2}/cm2",
            record.larvae_count, record.density_per_cm2
        );
        metrics::counter!("larva_alerts_dispatched_total").increment(1);
        self.alerts.publish(record.clone());

        if let Err(err) = self.notifications.save(&record) {
            error!("Failed to persist notification: {err}");
        }
        self.capture_snapshot();
    }

    /// Grab a fresh frame for the alert snapshot. Every failure here is
    /// logged and swallowed; the alert has already gone out.
    fn capture_snapshot(&self) {
        let frame = {
            let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
            source.read()
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                error!("Snapshot capture failed: {err}");
                return;
            }
        };
        let jpeg = match annotate::encode_snapshot(&frame, self.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                error!("Snapshot encoding failed: {err}");
                return;
            }
        };
        match self.snapshots.save(&jpeg) {
            Ok(url) => info!("Alert snapshot stored at {url}"),
            Err(err) => error!("Failed to persist snapshot: {err}"),
        }
    }
}

/// Spawn the alert sampler thread.
///
/// Samples immediately on startup, then every `interval`. Sleeps in short
/// slices so shutdown is prompt even with a long interval.
pub(crate) fn spawn_alert_monitor(
    stats: StatsStore,
    sink: NotificationSink,
    cooldown: Duration,
    interval: Duration,
    health: Arc<PipelineHealth>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("monitor-alerts", move || {
        let mut state = CooldownState::new(cooldown);
        let mut next_sample = Instant::now();
        while running.load(Ordering::Relaxed) && !shutdown.load(Ordering::Relaxed) {
            health.beat(HealthComponent::AlertSampler);
            let now = Instant::now();
            if now >= next_sample {
                let reading = stats.snapshot();
                if evaluate(&mut state, &reading, now) == AlertDecision::Dispatch {
                    sink.dispatch(make_alert_record(&reading));
                }
                next_sample = now + interval;
            }
            thread::sleep(Duration::from_millis(200).min(interval));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::store::{MemoryNotificationLog, MemorySnapshotLog};
    use video_ingest::SyntheticSource;

    fn reading(high: bool) -> Metrics {
        Metrics {
            larvae_count: if high { 621 } else { 2 },
            density_per_cm2: if high { 1.5 } else { 0.0048 },
            density_per_m2: if high { 15_036.0 } else { 48.4 },
            is_high_density: high,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn healthy_readings_never_alert() {
        let mut state = CooldownState::new(Duration::from_secs(300));
        let now = Instant::now();
        assert_eq!(evaluate(&mut state, &reading(false), now), AlertDecision::Healthy);
        assert!(state.last_alert_at.is_none());
    }

    #[test]
    fn first_high_reading_dispatches_then_cooldown_suppresses() {
        let mut state = CooldownState::new(Duration::from_secs(300));
        let start = Instant::now();
        assert_eq!(evaluate(&mut state, &reading(true), start), AlertDecision::Dispatch);
        assert_eq!(
            evaluate(&mut state, &reading(true), start + Duration::from_secs(30)),
            AlertDecision::Suppressed
        );
        assert_eq!(
            evaluate(&mut state, &reading(true), start + Duration::from_secs(299)),
            AlertDecision::Suppressed
        );
    }

    #[test]
    fn boundary_of_cooldown_is_ready_again() {
        let cooldown = Duration::from_secs(300);
        let mut state = CooldownState::new(cooldown);
        let start = Instant::now();
        assert_eq!(evaluate(&mut state, &reading(true), start), AlertDecision::Dispatch);
        // Exactly one cooldown later the window has elapsed.
        assert_eq!(
            evaluate(&mut state, &reading(true), start + cooldown),
            AlertDecision::Dispatch
        );
    }

    #[test]
    fn healthy_readings_do_not_reset_the_window() {
        let cooldown = Duration::from_secs(300);
        let mut state = CooldownState::new(cooldown);
        let start = Instant::now();
        assert_eq!(evaluate(&mut state, &reading(true), start), AlertDecision::Dispatch);
        // Density dips below the threshold mid-window and comes back.
        assert_eq!(
            evaluate(&mut state, &reading(false), start + Duration::from_secs(100)),
            AlertDecision::Healthy
        );
        assert_eq!(
            evaluate(&mut state, &reading(true), start + Duration::from_secs(200)),
            AlertDecision::Suppressed
        );
        assert_eq!(
            evaluate(&mut state, &reading(true), start + cooldown),
            AlertDecision::Dispatch
        );
    }

    #[test]
    fn sampled_sequence_never_alerts_twice_within_cooldown() {
        let cooldown = Duration::from_secs(300);
        let interval = Duration::from_secs(30);
        let mut state = CooldownState::new(cooldown);
        let start = Instant::now();

        let mut dispatches = Vec::new();
        for tick in 0..40u64 {
            let now = start + interval * tick as u32;
            if evaluate(&mut state, &reading(true), now) == AlertDecision::Dispatch {
                dispatches.push(now);
            }
        }

        assert!(!dispatches.is_empty());
        for pair in dispatches.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= cooldown);
        }
        // With 30s sampling over a 300s cooldown, an alert fires every 10th tick.
        assert_eq!(dispatches.len(), 4);
    }

    #[test]
    fn dispatch_publishes_live_and_persists_with_snapshot() {
        let alerts: Broadcaster<AlertRecord> = Broadcaster::new("alerts");
        let mut sub = alerts.subscribe().expect("subscribe");
        let notifications = Arc::new(MemoryNotificationLog::default());
        let snapshots = Arc::new(MemorySnapshotLog::default());
        let source = video_ingest::shared(Box::new(SyntheticSource::endless((64, 48))));
        let sink = NotificationSink::new(
            alerts,
            notifications.clone(),
            snapshots.clone(),
            source,
            60,
        );

        sink.dispatch(make_alert_record(&reading(true)));

        let live = sub.try_take().expect("live alert");
        assert_eq!(live.title, "High larva density");
        assert_eq!(live.larvae_count, 621);
        assert!(live.message.contains("1.50"));

        let stored = notifications.list().expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].larvae_count, 621);

        let shots = snapshots.list().expect("list");
        assert_eq!(shots.len(), 1);
        assert!(shots[0].size_bytes > 0);
    }

    #[test]
    fn alert_history_outlives_the_sink_that_wrote_it() {
        // The logs are shared across pipeline sessions; tearing one session's
        // sink down and wiring a new one must not wipe what was persisted.
        let notifications: Arc<dyn NotificationLog> = Arc::new(MemoryNotificationLog::default());
        let snapshots: Arc<dyn SnapshotLog> = Arc::new(MemorySnapshotLog::default());

        let first = NotificationSink::new(
            Broadcaster::new("alerts"),
            notifications.clone(),
            snapshots.clone(),
            video_ingest::shared(Box::new(SyntheticSource::endless((64, 48)))),
            60,
        );
        first.dispatch(make_alert_record(&reading(true)));
        drop(first);

        let second = NotificationSink::new(
            Broadcaster::new("alerts"),
            notifications.clone(),
            snapshots.clone(),
            video_ingest::shared(Box::new(SyntheticSource::endless((64, 48)))),
            60,
        );
        second.dispatch(make_alert_record(&reading(true)));

        assert_eq!(notifications.list().expect("list").len(), 2);
        assert_eq!(snapshots.list().expect("list").len(), 2);
    }

    #[test]
    fn snapshot_failure_does_not_undo_live_delivery() {
        struct ClosedSource;
        impl video_ingest::FrameSource for ClosedSource {
            fn read(&mut self) -> Result<video_ingest::Frame, video_ingest::CaptureError> {
                Err(video_ingest::CaptureError::EndOfStream)
            }
            fn dimensions(&self) -> (i32, i32) {
                (0, 0)
            }
        }

        let alerts: Broadcaster<AlertRecord> = Broadcaster::new("alerts");
        let mut sub = alerts.subscribe().expect("subscribe");
        let notifications = Arc::new(MemoryNotificationLog::default());
        let snapshots = Arc::new(MemorySnapshotLog::default());
        let sink = NotificationSink::new(
            alerts,
            notifications.clone(),
            snapshots.clone(),
            video_ingest::shared(Box::new(ClosedSource)),
            60,
        );

        sink.dispatch(make_alert_record(&reading(true)));

        assert!(sub.try_take().is_some());
        assert_eq!(notifications.list().expect("list").len(), 1);
        assert!(snapshots.list().expect("list").is_empty());
    }
}
