use std::sync::{Arc, Mutex};

use actix_web::web::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Density reading derived from one inference cycle.
///
/// Constructed whole by the density estimator and replaced atomically in the
/// stats store; `is_high_density` is always consistent with
/// `density_per_cm2` by construction.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct Metrics {
    pub(crate) larvae_count: u64,
    pub(crate) density_per_cm2: f64,
    pub(crate) density_per_m2: f64,
    pub(crate) is_high_density: bool,
    pub(crate) computed_at: DateTime<Utc>,
}

impl Metrics {
    /// Startup value before the first inference cycle completes.
    pub(crate) fn zero() -> Self {
        Self {
            larvae_count: 0,
            density_per_cm2: 0.0,
            density_per_m2: 0.0,
            is_high_density: false,
            computed_at: Utc::now(),
        }
    }
}

/// Encoded annotated frame ready to be fanned out. The JPEG is refcounted so
/// per-consumer delivery shares the buffer instead of copying it.
#[derive(Clone)]
pub(crate) struct FramePacket {
    pub(crate) jpeg: Bytes,
    pub(crate) larvae_count: u64,
    pub(crate) timestamp_ms: i64,
    pub(crate) frame_number: u64,
    pub(crate) fps: f32,
}

/// Alert payload; immutable once created, persisted verbatim.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct AlertRecord {
    pub(crate) title: String,
    pub(crate) message: String,
    pub(crate) larvae_count: u64,
    pub(crate) density_per_cm2: f64,
    pub(crate) timestamp: DateTime<Utc>,
}

/// Latest annotated frame for the single-shot `/frame.jpg` endpoint.
pub(crate) type SharedFrame = Arc<Mutex<Option<Arc<FramePacket>>>>;
