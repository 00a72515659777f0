//! Location smoothing for the local runner.
//!
//! A scalar Kalman filter per axis with a shared variance (meters squared).
//! The process noise is small and fixed: the partner's view of our position
//! tolerates a few seconds of lag far better than visible jitter. Fixes worse
//! than the accuracy threshold are ignored entirely.

use tokio::time::Instant;
use tracing::trace;

use crate::types::{Coordinate, PositionFix};

/// Recursive position estimator.
#[derive(Debug, Clone)]
pub struct PositionSmoother {
    min_accuracy_meters: f64,
    /// Meters per second.
    process_noise: f64,
    state: Option<FilterState>,
}

#[derive(Debug, Clone, Copy)]
struct FilterState {
    estimate: Coordinate,
    variance: f64,
    updated_at: Instant,
}

impl PositionSmoother {
    pub fn new(min_accuracy_meters: f64, process_noise: f64) -> Self {
        Self { min_accuracy_meters, process_noise, state: None }
    }

    /// Feed one raw fix and return the filtered position.
    ///
    /// A rejected fix leaves the estimate unchanged and returns the previous
    /// value, or `None` if there is no prior estimate.
    pub fn filter(&mut self, fix: PositionFix, now: Instant) -> Option<Coordinate> {
        if !self.accepts(&fix) {
            trace!(accuracy = fix.horizontal_accuracy, "Rejecting low-quality fix");
            return self.current();
        }

        let measurement_variance = fix.horizontal_accuracy * fix.horizontal_accuracy;
        let next = match self.state {
            None => FilterState {
                estimate: Coordinate { latitude: fix.latitude, longitude: fix.longitude },
                variance: measurement_variance,
                updated_at: now,
            },
            Some(prev) => {
                let dt = now.saturating_duration_since(prev.updated_at).as_secs_f64();
                let predicted = prev.variance + dt * self.process_noise * self.process_noise;
                let gain = predicted / (predicted + measurement_variance);
                FilterState {
                    estimate: Coordinate {
                        latitude: prev.estimate.latitude
                            + gain * (fix.latitude - prev.estimate.latitude),
                        longitude: prev.estimate.longitude
                            + gain * (fix.longitude - prev.estimate.longitude),
                    },
                    variance: (1.0 - gain) * predicted,
                    updated_at: now,
                }
            }
        };
        self.state = Some(next);
        Some(next.estimate)
    }

    /// Current filtered position, if any fix has been accepted.
    pub fn current(&self) -> Option<Coordinate> {
        self.state.map(|s| s.estimate)
    }

    /// Estimated accuracy of the current position in meters.
    pub fn accuracy_meters(&self) -> Option<f64> {
        self.state.map(|s| s.variance.sqrt())
    }

    pub fn reset(&mut self) {
        self.state = None;
    }

    fn accepts(&self, fix: &PositionFix) -> bool {
        fix.latitude.is_finite()
            && fix.longitude.is_finite()
            && (-90.0..=90.0).contains(&fix.latitude)
            && (-180.0..=180.0).contains(&fix.longitude)
            && fix.horizontal_accuracy.is_finite()
            && fix.horizontal_accuracy > 0.0
            && fix.horizontal_accuracy <= self.min_accuracy_meters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn fix(latitude: f64, longitude: f64, accuracy: f64) -> PositionFix {
        PositionFix { latitude, longitude, horizontal_accuracy: accuracy }
    }

    #[test]
    fn first_good_fix_is_taken_as_is() {
        let mut smoother = PositionSmoother::new(50.0, 3.0);
        let now = Instant::now();
        let out = smoother.filter(fix(51.5, -0.12, 10.0), now).expect("accepted");
        assert_eq!(out, Coordinate { latitude: 51.5, longitude: -0.12 });
        assert_eq!(smoother.accuracy_meters(), Some(10.0));
    }

    #[test]
    fn poor_fix_without_history_yields_nothing() {
        let mut smoother = PositionSmoother::new(50.0, 3.0);
        assert_eq!(smoother.filter(fix(51.5, -0.12, 80.0), Instant::now()), None);
        assert_eq!(smoother.current(), None);
    }

    #[test]
    fn poor_fix_leaves_estimate_unchanged() {
        let mut smoother = PositionSmoother::new(50.0, 3.0);
        let t0 = Instant::now();
        let before = smoother.filter(fix(51.5, -0.12, 10.0), t0);
        let after = smoother.filter(fix(52.0, 0.5, 80.0), t0 + Duration::from_secs(1));
        assert_eq!(before, after);
        assert_eq!(smoother.current(), before);
    }

    #[test]
    fn jitter_is_damped() {
        let mut smoother = PositionSmoother::new(50.0, 3.0);
        let t0 = Instant::now();
        smoother.filter(fix(0.0, 0.0, 10.0), t0);
        let out = smoother.filter(fix(0.001, 0.001, 10.0), t0 + Duration::from_secs(1)).expect("fix");
        assert!(out.latitude > 0.0 && out.latitude < 0.001);
        assert!(out.longitude > 0.0 && out.longitude < 0.001);
    }

    #[test]
    fn malformed_fixes_are_rejected() {
        let mut smoother = PositionSmoother::new(50.0, 3.0);
        let now = Instant::now();
        assert_eq!(smoother.filter(fix(f64::NAN, 0.0, 5.0), now), None);
        assert_eq!(smoother.filter(fix(95.0, 0.0, 5.0), now), None);
        assert_eq!(smoother.filter(fix(10.0, 0.0, 0.0), now), None);
        assert_eq!(smoother.filter(fix(10.0, 0.0, -3.0), now), None);
    }

    proptest! {
        #[test]
        fn estimate_stays_between_prior_and_measurement(
            prior in -80.0f64..80.0,
            measured in -80.0f64..80.0,
            accuracy in 1.0f64..50.0,
            gap_ms in 0u64..10_000,
        ) {
            let mut smoother = PositionSmoother::new(50.0, 3.0);
            let t0 = Instant::now();
            smoother.filter(fix(prior, 0.0, 10.0), t0);
            let out = smoother
                .filter(fix(measured, 0.0, accuracy), t0 + Duration::from_millis(gap_ms))
                .expect("accepted");
            let (lo, hi) = (prior.min(measured), prior.max(measured));
            prop_assert!(out.latitude >= lo - 1e-9 && out.latitude <= hi + 1e-9);
        }

        #[test]
        fn fixes_beyond_threshold_never_move_the_estimate(accuracy in 50.0001f64..10_000.0) {
            let mut smoother = PositionSmoother::new(50.0, 3.0);
            let t0 = Instant::now();
            let before = smoother.filter(fix(1.0, 1.0, 5.0), t0);
            let after = smoother.filter(fix(2.0, 2.0, accuracy), t0 + Duration::from_secs(1));
            prop_assert_eq!(before, after);
        }
    }
}
