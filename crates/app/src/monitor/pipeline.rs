//! Session orchestration for the monitoring pipeline.
//!
//! Wires the capture source, the inference worker, the stats publisher, the
//! alert sampler, the watchdog, and the HTTP server together, and restarts
//! the session when the watchdog or a capture fault asks for it.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Once,
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use detect_core::{DetectionOracle, Mask, ScriptedOracle, StaticOracle};
use tracing::{error, info, warn};

use crate::monitor::{
    alerts::{spawn_alert_monitor, NotificationSink},
    broadcast::Broadcaster,
    config::{MonitorConfig, OracleKind},
    data::{AlertRecord, FramePacket, Metrics, SharedFrame},
    density::DensityEstimator,
    inference::{spawn_inference_worker, InferenceWorker, WorkerExit},
    server::{spawn_server, ServerState},
    stats::{spawn_stats_publisher, StatsStore},
    store::{MemoryNotificationLog, MemorySnapshotLog, NotificationLog, SnapshotLog},
    telemetry,
    watchdog::{spawn_watchdog, PipelineHealth, WatchdogState},
};

/// Run the monitor, automatically restarting on recoverable faults.
pub fn run(config: MonitorConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    telemetry::init_tracing(config.verbose);

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler({
            let handler_shutdown = handler_shutdown.clone();
            move || {
                handler_shutdown.store(true, Ordering::SeqCst);
            }
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    // The logs stand in for an external store: they outlive watchdog and
    // capture-fault restarts, so alert history survives a session bounce.
    let notifications: Arc<dyn NotificationLog> = Arc::new(MemoryNotificationLog::default());
    let snapshots: Arc<dyn SnapshotLog> = Arc::new(MemorySnapshotLog::default());

    let mut attempt: u32 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match run_session(
            config.clone(),
            shutdown.clone(),
            notifications.clone(),
            snapshots.clone(),
        ) {
            Ok(SessionOutcome::Finished) => break,
            Ok(SessionOutcome::Restart(reason)) => {
                attempt = attempt.saturating_add(1);
                warn!("Pipeline requested restart (reason: {reason}), attempt #{attempt}");
                metrics::counter!("larva_session_restarts_total").increment(1);
                thread::sleep(Duration::from_secs(1));
            }
            Err(err) => {
                error!("Monitor pipeline error: {err:?}");
                return Err(err);
            }
        }
    }

    Ok(())
}

/// Result of a single session attempt.
enum SessionOutcome {
    Finished,
    Restart(&'static str),
}

/// Execute one session, returning whether to exit or restart.
fn run_session(
    config: MonitorConfig,
    shutdown: Arc<AtomicBool>,
    notifications: Arc<dyn NotificationLog>,
    snapshots: Arc<dyn SnapshotLog>,
) -> Result<SessionOutcome> {
    if shutdown.load(Ordering::SeqCst) {
        return Ok(SessionOutcome::Finished);
    }

    let _ = telemetry::init_metrics_recorder();

    let source = video_ingest::open_source(&config.source, (config.width, config.height))
        .with_context(|| format!("Failed to open capture source {:?}", config.source))?;
    let source = video_ingest::shared(source);

    let stats = StatsStore::new();
    let latest: SharedFrame = Arc::new(Mutex::new(None));
    let frames: Broadcaster<Arc<FramePacket>> = Broadcaster::new("camera");
    let stats_feed: Broadcaster<Metrics> = Broadcaster::new("stats");
    let alerts_feed: Broadcaster<AlertRecord> = Broadcaster::new("alerts");

    let health = Arc::new(PipelineHealth::new());
    let running = Arc::new(AtomicBool::new(true));
    let watchdog_state = Arc::new(WatchdogState::new());

    let watchdog = spawn_watchdog(
        health.clone(),
        running.clone(),
        shutdown.clone(),
        watchdog_state.clone(),
    )
    .context("Failed to spawn watchdog thread")?;

    let worker = InferenceWorker::new(
        source.clone(),
        build_oracle(config.oracle),
        DensityEstimator::from_config(&config),
        stats.clone(),
        frames.clone(),
        latest.clone(),
        config.jpeg_quality,
    );
    let inference = spawn_inference_worker(
        worker,
        config.frame_interval,
        health.clone(),
        running.clone(),
        shutdown.clone(),
    )
    .context("Failed to spawn inference worker thread")?;

    let stats_publisher = spawn_stats_publisher(
        stats.clone(),
        stats_feed.clone(),
        config.stats_interval,
        health.clone(),
        running.clone(),
        shutdown.clone(),
    )
    .context("Failed to spawn stats publisher thread")?;

    let sink = NotificationSink::new(
        alerts_feed.clone(),
        notifications.clone(),
        snapshots.clone(),
        source.clone(),
        config.jpeg_quality,
    );
    let alert_monitor = spawn_alert_monitor(
        stats.clone(),
        sink,
        config.cooldown,
        config.alert_interval,
        health.clone(),
        running.clone(),
        shutdown.clone(),
    )
    .context("Failed to spawn alert monitor thread")?;

    let server = spawn_server(ServerState {
        latest: latest.clone(),
        stats,
        frames: frames.clone(),
        stats_feed: stats_feed.clone(),
        alerts_feed: alerts_feed.clone(),
        notifications,
        snapshots,
        port: config.port,
    })?;
    info!(
        "Monitor available at http://127.0.0.1:{}/ (stream at /ws/camera)",
        config.port
    );

    // Supervise: the inference worker, the watchdog, or Ctrl+C ends the
    // session by clearing `running`.
    while running.load(Ordering::Relaxed) && !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(200));
    }
    running.store(false, Ordering::SeqCst);

    let worker_exit = match inference.join() {
        Ok(exit) => exit,
        Err(_) => {
            error!("Inference worker thread panicked");
            WorkerExit::Fault
        }
    };
    frames.close();
    stats_feed.close();
    alerts_feed.close();
    let _ = stats_publisher.join();
    let _ = alert_monitor.join();
    let _ = watchdog.join();
    server.stop();

    if watchdog_state.is_triggered() {
        let reason = watchdog_state
            .reason()
            .map(|component| component.label())
            .unwrap_or("watchdog");
        return Ok(SessionOutcome::Restart(reason));
    }

    match worker_exit {
        WorkerExit::Fault if !shutdown.load(Ordering::SeqCst) => {
            Ok(SessionOutcome::Restart("capture fault"))
        }
        WorkerExit::EndOfStream => {
            info!("Capture source ended; shutting down");
            Ok(SessionOutcome::Finished)
        }
        _ => Ok(SessionOutcome::Finished),
    }
}

/// Pick the detection oracle for this session.
fn build_oracle(kind: OracleKind) -> Box<dyn DetectionOracle> {
    match kind {
        OracleKind::Stub => Box::new(StaticOracle::empty()),
        OracleKind::Demo => {
            // Two calm minutes, then a dense burst, at ~30 cycles/second.
            let calm = vec![Mask::with_area(400.0), Mask::with_area(520.0)];
            let dense = vec![Mask::with_area(400.0); 600];
            let mut script: Vec<Vec<Mask>> = Vec::new();
            for _ in 0..3_600 {
                script.push(calm.clone());
            }
            for _ in 0..900 {
                script.push(dense.clone());
            }
            Box::new(ScriptedOracle::cycling(script))
        }
    }
}
