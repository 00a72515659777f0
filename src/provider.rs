//! Provider trait for local telemetry sources

use crate::Result;
use crate::types::RawTelemetrySample;

/// Trait for local telemetry sources
///
/// Providers abstract over where the runner's own readings come from (a
/// workout session, a recorded route, a test script) and handle their own
/// pacing internally.
#[async_trait::async_trait]
pub trait TelemetryProvider: Send + 'static {
    /// Wait for the next reading
    ///
    /// Returns:
    /// - `Ok(Some(sample))` - New reading available
    /// - `Ok(None)` - Source ended (normal termination)
    /// - `Err(e)` - Error occurred; the reader backs off and retries
    async fn next_sample(&mut self) -> Result<Option<RawTelemetrySample>>;

    /// Nominal sampling rate in Hz, for diagnostics
    fn sample_rate(&self) -> f64;
}
