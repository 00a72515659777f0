//! Shared fixtures for unit tests, integration tests and benches.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::Once;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::EngineConfig;
use crate::types::{LocalProfile, PartnerProfile, RawTelemetrySample, RunId, Snapshot};

/// Run id used by every fixture.
pub const FIXTURE_RUN: &str = "run";
/// Local runner in fixtures.
pub const FIXTURE_LOCAL: &str = "alice";
/// Remote runner in fixtures.
pub const FIXTURE_PARTNER: &str = "bob";

/// A plausible snapshot from the fixture partner.
pub fn snapshot_fixture(sequence: u64, distance_meters: f64) -> Snapshot {
    Snapshot {
        run_id: RunId::new(FIXTURE_RUN),
        peer_id: FIXTURE_PARTNER.into(),
        distance_meters,
        elapsed_seconds: (distance_meters * 0.3) as u32,
        current_pace_sec_per_km: Some(300),
        heart_rate_bpm: Some(150),
        calories_kcal: Some(120),
        latitude: Some(47.6062),
        longitude: Some(-122.3321),
        sequence,
        client_recorded_at: UNIX_EPOCH + Duration::from_millis(1_700_000_000_000 + sequence * 3_000),
        is_paused: None,
    }
}

/// A telemetry sample with distance and pace only.
pub fn sample_at(distance_meters: f64) -> RawTelemetrySample {
    RawTelemetrySample::new(distance_meters, (distance_meters * 0.3) as u32).with_pace(300)
}

pub fn local_profile() -> LocalProfile {
    LocalProfile::new(FIXTURE_LOCAL, "Alice")
}

pub fn partner_profile() -> PartnerProfile {
    PartnerProfile::new(FIXTURE_PARTNER, "Bob").with_max_heart_rate(190)
}

/// Engine defaults used throughout the tests.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
}

/// Fixed wall-clock time for deterministic envelopes.
pub fn wall_clock() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

static TRACING: Once = Once::new();

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
