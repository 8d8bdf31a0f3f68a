//! The single inference lane: capture, detect, estimate, annotate, publish.
//!
//! Exactly one worker thread owns the oracle, so at most one detection call is
//! in flight at any time. The capture device is behind a shared mutex because
//! the notification sink borrows it briefly for alert snapshots; the worker
//! holds the lock only for the read itself.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use detect_core::DetectionOracle;
use tracing::{debug, error, info, warn};
use video_ingest::{CaptureError, Frame, SharedSource};

use crate::monitor::{
    annotate,
    broadcast::Broadcaster,
    data::{FramePacket, SharedFrame},
    density::DensityEstimator,
    stats::StatsStore,
    telemetry,
    watchdog::{HealthComponent, PipelineHealth},
};

/// How one inference cycle ended.
pub(crate) enum CycleOutcome {
    /// A frame was captured, measured, and published.
    Produced,
    /// The cycle was skipped (oracle or encoder fault); the loop continues.
    Skipped,
    /// The source has no more frames; the loop ends cleanly.
    EndOfStream,
    /// The capture device failed; the session should restart.
    Fault,
}

/// Why the worker thread exited.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    Shutdown,
    EndOfStream,
    Fault,
}

pub(crate) struct InferenceWorker {
    source: SharedSource,
    oracle: Box<dyn DetectionOracle>,
    estimator: DensityEstimator,
    stats: StatsStore,
    frames: Broadcaster<Arc<FramePacket>>,
    latest: SharedFrame,
    jpeg_quality: i32,
    frame_number: u64,
    smoothed_fps: f32,
    last_instant: Option<Instant>,
}

impl InferenceWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        source: SharedSource,
        oracle: Box<dyn DetectionOracle>,
        estimator: DensityEstimator,
        stats: StatsStore,
        frames: Broadcaster<Arc<FramePacket>>,
        latest: SharedFrame,
        jpeg_quality: i32,
    ) -> Self {
        Self {
            source,
            oracle,
            estimator,
            stats,
            frames,
            latest,
            jpeg_quality,
            frame_number: 0,
            smoothed_fps: 0.0,
            last_instant: None,
        }
    }

    fn read_frame(&self) -> Result<Frame, CaptureError> {
        let mut source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        source.read()
    }

    /// Run one capture-detect-estimate-publish cycle.
    pub(crate) fn cycle(&mut self) -> CycleOutcome {
        let cycle_start = Instant::now();
        let frame = match self.read_frame() {
            Ok(frame) => frame,
            Err(CaptureError::EndOfStream) => return CycleOutcome::EndOfStream,
            Err(err) => {
                error!("Capture failed: {err}");
                return CycleOutcome::Fault;
            }
        };

        self.frame_number += 1;
        let now = Instant::now();
        if let Some(last) = self.last_instant {
            let elapsed = now.duration_since(last).as_secs_f32();
            if elapsed > 0.0 {
                let instant_fps = 1.0 / elapsed;
                self.smoothed_fps = if self.smoothed_fps == 0.0 {
                    instant_fps
                } else {
                    self.smoothed_fps * 0.9 + instant_fps * 0.1
                };
                metrics::histogram!("larva_capture_frame_interval_seconds")
                    .record(f64::from(elapsed));
            }
        }
        self.last_instant = Some(now);
        metrics::gauge!("larva_pipeline_fps").set(f64::from(self.smoothed_fps));

        let detect_start = Instant::now();
        let detections = match self.oracle.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                warn!("Detection failed on frame {}: {err}", self.frame_number);
                metrics::counter!("larva_skipped_cycles_total", "stage" => "oracle").increment(1);
                return CycleOutcome::Skipped;
            }
        };
        metrics::histogram!("larva_stage_latency_seconds", "stage" => "detect")
            .record(detect_start.elapsed().as_secs_f64());

        let reading = self.estimator.estimate(&detections);
        self.stats.replace(reading.clone());
        if self.frame_number % 30 == 0 {
            debug!(
                "frame {}: {} larvae, {:.3}/cm2, fps {:.1}",
                self.frame_number, reading.larvae_count, reading.density_per_cm2, self.smoothed_fps
            );
        }

        let encode_start = Instant::now();
        let packet = match annotate::annotate_frame(
            &frame,
            &detections,
            &reading,
            self.frame_number,
            self.smoothed_fps,
            self.jpeg_quality,
        ) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("Frame annotation failed: {err}");
                metrics::counter!("larva_skipped_cycles_total", "stage" => "encode").increment(1);
                return CycleOutcome::Skipped;
            }
        };
        metrics::histogram!("larva_stage_latency_seconds", "stage" => "encode")
            .record(encode_start.elapsed().as_secs_f64());

        let packet = Arc::new(packet);
        {
            let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
            *latest = Some(packet.clone());
        }
        self.frames.publish(packet);
        metrics::histogram!("larva_stage_latency_seconds", "stage" => "cycle")
            .record(cycle_start.elapsed().as_secs_f64());
        CycleOutcome::Produced
    }
}

/// Spawn the inference worker thread.
///
/// Paces cycles to `frame_interval` by sleeping only the remainder of the
/// interval after the work is done. The frame broadcaster closes when the
/// loop exits, whatever the exit reason, so every stream consumer sees a
/// clean end-of-stream.
pub(crate) fn spawn_inference_worker(
    mut worker: InferenceWorker,
    frame_interval: Duration,
    health: Arc<PipelineHealth>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<WorkerExit>> {
    telemetry::spawn_thread("monitor-inference", move || {
        let mut exit = WorkerExit::Shutdown;
        while running.load(Ordering::Relaxed) && !shutdown.load(Ordering::Relaxed) {
            health.beat(HealthComponent::Inference);
            let started = Instant::now();
            match worker.cycle() {
                CycleOutcome::Produced | CycleOutcome::Skipped => {}
                CycleOutcome::EndOfStream => {
                    info!("Capture source reached end of stream");
                    exit = WorkerExit::EndOfStream;
                    break;
                }
                CycleOutcome::Fault => {
                    exit = WorkerExit::Fault;
                    break;
                }
            }
            if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
                thread::sleep(remaining);
            }
        }
        worker.frames.close();
        running.store(false, Ordering::SeqCst);
        exit
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use detect_core::{Mask, ScriptedOracle, StaticOracle};
    use std::sync::Mutex;
    use video_ingest::SyntheticSource;

    fn worker_for(
        source: Box<dyn video_ingest::FrameSource>,
        oracle: Box<dyn DetectionOracle>,
    ) -> (InferenceWorker, StatsStore, Broadcaster<Arc<FramePacket>>, SharedFrame) {
        let shared = video_ingest::shared(source);
        let stats = StatsStore::new();
        let frames: Broadcaster<Arc<FramePacket>> = Broadcaster::new("camera");
        let latest: SharedFrame = Arc::new(Mutex::new(None));
        let worker = InferenceWorker::new(
            shared,
            oracle,
            DensityEstimator::new(413.0, 386.0, 50.0, 1.25),
            stats.clone(),
            frames.clone(),
            latest.clone(),
            60,
        );
        (worker, stats, frames, latest)
    }

    #[test]
    fn finite_clip_produces_then_ends() {
        let source = Box::new(SyntheticSource::clip(3, (64, 48), false));
        let oracle = Box::new(ScriptedOracle::cycling(vec![
            vec![Mask::with_area(400.0)],
            vec![Mask::with_area(400.0), Mask::with_area(500.0)],
            Vec::new(),
        ]));
        let (mut worker, stats, frames, latest) = worker_for(source, oracle);
        let mut sub = frames.subscribe().expect("subscribe");

        for _ in 0..3 {
            assert!(matches!(worker.cycle(), CycleOutcome::Produced));
        }
        assert!(matches!(worker.cycle(), CycleOutcome::EndOfStream));

        // Three packets in production order, numbered from 1.
        for expected in 1..=3u64 {
            let packet = sub.try_take().expect("packet");
            assert_eq!(packet.frame_number, expected);
            assert_eq!(&packet.jpeg[..2], &[0xff, 0xd8]);
        }
        assert!(sub.try_take().is_none());

        // Last cycle saw an empty detection set.
        assert_eq!(stats.snapshot().larvae_count, 0);
        let held = latest.lock().expect("latest").clone().expect("frame");
        assert_eq!(held.frame_number, 3);
    }

    #[test]
    fn fan_out_shares_one_encoded_frame_buffer() {
        let source = Box::new(SyntheticSource::endless((64, 48)));
        let (mut worker, _stats, frames, _latest) = worker_for(source, Box::new(StaticOracle::empty()));
        let mut first = frames.subscribe().expect("subscribe");
        let mut second = frames.subscribe().expect("subscribe");

        assert!(matches!(worker.cycle(), CycleOutcome::Produced));

        let a = first.try_take().expect("packet");
        let b = second.try_take().expect("packet");
        // Same packet, and a per-consumer payload clone points at the same
        // JPEG bytes rather than copying them.
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.jpeg.clone().as_ptr(), a.jpeg.as_ptr());
    }

    #[test]
    fn oracle_failure_skips_the_cycle_but_keeps_the_loop() {
        struct FailingOracle;
        impl DetectionOracle for FailingOracle {
            fn detect(
                &mut self,
                _frame: &video_ingest::Frame,
            ) -> Result<detect_core::DetectionSet, detect_core::OracleError> {
                Err(detect_core::OracleError::Inference(anyhow::anyhow!(
                    "model backend offline"
                )))
            }
        }

        let source = Box::new(SyntheticSource::endless((64, 48)));
        let (mut worker, stats, frames, latest) = worker_for(source, Box::new(FailingOracle));
        let mut sub = frames.subscribe().expect("subscribe");

        assert!(matches!(worker.cycle(), CycleOutcome::Skipped));
        assert!(sub.try_take().is_none());
        assert_eq!(stats.snapshot().larvae_count, 0);
        assert!(latest.lock().expect("latest").is_none());

        // The lane recovers on the next cycle without restarting.
        worker.oracle = Box::new(StaticOracle::empty());
        assert!(matches!(worker.cycle(), CycleOutcome::Produced));
        assert!(sub.try_take().is_some());
    }

    #[test]
    fn stats_track_the_latest_cycle() {
        let source = Box::new(SyntheticSource::endless((64, 48)));
        let oracle = Box::new(ScriptedOracle::cycling(vec![
            vec![Mask::with_area(400.0); 600],
            vec![Mask::with_area(400.0)],
        ]));
        let (mut worker, stats, _frames, _latest) = worker_for(source, oracle);

        assert!(matches!(worker.cycle(), CycleOutcome::Produced));
        let high = stats.snapshot();
        assert_eq!(high.larvae_count, 621);
        assert!(high.is_high_density);

        assert!(matches!(worker.cycle(), CycleOutcome::Produced));
        let calm = stats.snapshot();
        assert_eq!(calm.larvae_count, 1);
        assert!(!calm.is_high_density);
    }
}
