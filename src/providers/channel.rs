//! Push-based provider fed by the host application.

use tokio::sync::mpsc;
use tracing::debug;

use crate::Result;
use crate::provider::TelemetryProvider;
use crate::types::RawTelemetrySample;

/// Producer half handed to the host's workout integration.
pub type SampleSender = mpsc::Sender<RawTelemetrySample>;

/// Provider that yields whatever the host pushes into its channel.
///
/// The source ends when every [`SampleSender`] has been dropped.
pub struct ChannelProvider {
    rx: mpsc::Receiver<RawTelemetrySample>,
    sample_rate: f64,
}

impl ChannelProvider {
    /// Create a provider with a bounded buffer of `capacity` readings.
    pub fn new(capacity: usize) -> (Self, SampleSender) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { rx, sample_rate: 1.0 }, tx)
    }

    /// Declare the rate the host samples at.
    pub fn with_sample_rate(mut self, hz: f64) -> Self {
        self.sample_rate = hz;
        self
    }
}

#[async_trait::async_trait]
impl TelemetryProvider for ChannelProvider {
    async fn next_sample(&mut self) -> Result<Option<RawTelemetrySample>> {
        let sample = self.rx.recv().await;
        if sample.is_none() {
            debug!("Sample channel closed");
        }
        Ok(sample)
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}
