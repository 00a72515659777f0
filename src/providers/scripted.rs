//! Replay provider for recorded or synthetic runs

use std::collections::VecDeque;
use tokio::time::{Duration, Interval, MissedTickBehavior, interval};
use tracing::{debug, info, trace};

use crate::provider::TelemetryProvider;
use crate::types::RawTelemetrySample;
use crate::{Result, SyncError};

/// Slowest accepted script rate.
pub const MIN_SAMPLE_RATE_HZ: f64 = 0.001;
/// Fastest accepted script rate. With the speed clamp, pacing stays
/// between 100µs and 10,000s per sample.
pub const MAX_SAMPLE_RATE_HZ: f64 = 1000.0;

/// Replays a fixed list of samples at a steady pace
pub struct ScriptedProvider {
    /// Samples still to be delivered
    samples: VecDeque<RawTelemetrySample>,

    /// Total samples in the script
    total: usize,

    /// Native sample rate of the script
    sample_rate: f64,

    /// Playback speed multiplier (1.0 = normal, 2.0 = double speed)
    speed: f64,

    /// Sample pacing interval
    interval: Interval,
}

impl ScriptedProvider {
    /// Create a provider replaying `samples` at `sample_rate` Hz
    pub fn new(samples: Vec<RawTelemetrySample>, sample_rate: f64) -> Result<Self> {
        if !(MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&sample_rate) {
            return Err(SyncError::config(
                "sample_rate",
                format!("must be between {MIN_SAMPLE_RATE_HZ} and {MAX_SAMPLE_RATE_HZ} Hz"),
            ));
        }
        let total = samples.len();
        info!("Scripted provider: {} samples at {}Hz", total, sample_rate);

        Ok(Self {
            samples: samples.into(),
            total,
            sample_rate,
            speed: 1.0,
            interval: Self::pacing(sample_rate, 1.0),
        })
    }

    /// Synthesize a steady run: `seconds` samples at 1Hz and constant pace
    pub fn steady_run(seconds: u32, pace_sec_per_km: u32) -> Result<Self> {
        let meters_per_second = 1000.0 / pace_sec_per_km.max(1) as f64;
        let samples = (1..=seconds)
            .map(|s| RawTelemetrySample::new(s as f64 * meters_per_second, s).with_pace(pace_sec_per_km))
            .collect();
        Self::new(samples, 1.0)
    }

    fn pacing(sample_rate: f64, speed: f64) -> Interval {
        let mut interval = interval(Duration::from_secs_f64(1.0 / (sample_rate * speed)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Set playback speed
    pub fn set_speed(&mut self, speed: f64) {
        if speed.is_nan() {
            debug!("Ignoring NaN playback speed");
            return;
        }
        self.speed = speed.clamp(0.1, 10.0);
        self.interval = Self::pacing(self.sample_rate, self.speed);
        debug!("Playback speed set to {}x", self.speed);
    }

    /// Samples delivered so far
    pub fn delivered(&self) -> usize {
        self.total - self.samples.len()
    }

    /// Script duration in seconds at normal speed
    pub fn duration(&self) -> f64 {
        self.total as f64 / self.sample_rate
    }
}

#[async_trait::async_trait]
impl TelemetryProvider for ScriptedProvider {
    async fn next_sample(&mut self) -> Result<Option<RawTelemetrySample>> {
        if self.samples.is_empty() {
            debug!("Reached end of script");
            return Ok(None);
        }

        self.interval.tick().await;

        let sample = self.samples.pop_front();
        trace!("Sample {}/{}", self.delivered(), self.total);
        Ok(sample)
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}
