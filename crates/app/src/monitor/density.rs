//! Density estimation from segmentation masks.
//!
//! Two estimators run on every frame: the direct mask count, and total mask
//! coverage divided by the average larva footprint. The larger of the two
//! wins, which corrects undercounting when touching larvae merge into one
//! mask while still trusting the direct count when masks fragment.

use chrono::Utc;
use detect_core::DetectionSet;

use crate::monitor::{config::MonitorConfig, data::Metrics};

pub(crate) struct DensityEstimator {
    roi_area_cm2: f64,
    avg_larva_area_px: f64,
    min_mask_area_px: f64,
    density_threshold: f64,
}

impl DensityEstimator {
    pub(crate) fn new(
        roi_area_cm2: f64,
        avg_larva_area_px: f64,
        min_mask_area_px: f64,
        density_threshold: f64,
    ) -> Self {
        Self {
            roi_area_cm2,
            avg_larva_area_px,
            min_mask_area_px,
            density_threshold,
        }
    }

    pub(crate) fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.roi_area_cm2,
            config.avg_larva_area_px,
            config.min_mask_area_px,
            config.density_threshold,
        )
    }

    /// Convert one frame's detection set into a complete `Metrics` value.
    ///
    /// Masks at or below the noise floor are discarded. An empty detection
    /// set is a valid zero reading, not an error.
    pub(crate) fn estimate(&self, detections: &DetectionSet) -> Metrics {
        let mut mask_count: u64 = 0;
        let mut total_area: f64 = 0.0;
        for mask in detections {
            if mask.area_px > self.min_mask_area_px {
                mask_count += 1;
                total_area += mask.area_px;
            }
        }

        let area_estimate = if self.avg_larva_area_px > 0.0 {
            total_area / self.avg_larva_area_px
        } else {
            0.0
        };
        let larvae_count = (mask_count as f64).max(area_estimate).trunc() as u64;

        let density_per_cm2 = if self.roi_area_cm2 > 0.0 {
            larvae_count as f64 / self.roi_area_cm2
        } else {
            0.0
        };
        let density_per_m2 = if self.roi_area_cm2 > 0.0 {
            larvae_count as f64 / (self.roi_area_cm2 / 10_000.0)
        } else {
            0.0
        };

        Metrics {
            larvae_count,
            density_per_cm2,
            density_per_m2,
            is_high_density: density_per_cm2 > self.density_threshold,
            computed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detect_core::Mask;

    fn estimator() -> DensityEstimator {
        DensityEstimator::new(413.0, 386.0, 50.0, 1.25)
    }

    fn masks(areas: &[f64]) -> DetectionSet {
        areas.iter().map(|&a| Mask::with_area(a)).collect()
    }

    #[test]
    fn empty_detection_set_is_a_zero_reading() {
        let metrics = estimator().estimate(&Vec::new());
        assert_eq!(metrics.larvae_count, 0);
        assert_eq!(metrics.density_per_cm2, 0.0);
        assert_eq!(metrics.density_per_m2, 0.0);
        assert!(!metrics.is_high_density);
    }

    #[test]
    fn noise_floor_discards_small_masks() {
        // 40 is below the floor, 60 and 500 survive; the direct count wins
        // over 560/386 ≈ 1.45.
        let metrics = estimator().estimate(&masks(&[60.0, 40.0, 500.0]));
        assert_eq!(metrics.larvae_count, 2);
        assert!((metrics.density_per_cm2 - 2.0 / 413.0).abs() < 1e-12);
        assert!(!metrics.is_high_density);
    }

    #[test]
    fn mask_exactly_at_floor_is_discarded() {
        let metrics = estimator().estimate(&masks(&[50.0, 50.0]));
        assert_eq!(metrics.larvae_count, 0);
    }

    #[test]
    fn coverage_estimate_corrects_merged_masks() {
        // One huge merged mask: the direct count says 1, coverage says ~5.
        let metrics = estimator().estimate(&masks(&[1930.0]));
        assert_eq!(metrics.larvae_count, 5);
    }

    #[test]
    fn dense_scene_crosses_the_threshold() {
        // 600 masks of 400 px: coverage estimate 240000/386 ≈ 621.8 beats the
        // direct count and truncates to 621.
        let metrics = estimator().estimate(&masks(&vec![400.0; 600]));
        assert_eq!(metrics.larvae_count, 621);
        let expected = 621.0 / 413.0;
        assert!((metrics.density_per_cm2 - expected).abs() < 1e-12);
        assert!((metrics.density_per_m2 - expected * 10_000.0).abs() < 1e-6);
        assert!(metrics.is_high_density);
    }

    #[test]
    fn density_equal_to_threshold_is_not_high() {
        // Two larvae over 1 cm2 with a threshold of exactly 2.0.
        let estimator = DensityEstimator::new(1.0, 1_000_000.0, 0.0, 2.0);
        let metrics = estimator.estimate(&masks(&[10.0, 10.0]));
        assert_eq!(metrics.larvae_count, 2);
        assert_eq!(metrics.density_per_cm2, 2.0);
        assert!(!metrics.is_high_density);
    }

    #[test]
    fn high_flag_always_tracks_density_field() {
        let estimator = estimator();
        for n in [0usize, 1, 10, 500, 520, 600, 2000] {
            let metrics = estimator.estimate(&masks(&vec![400.0; n]));
            assert_eq!(metrics.is_high_density, metrics.density_per_cm2 > 1.25);
        }
    }
}
