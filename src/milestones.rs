//! One-shot threshold detectors for domain events.

use std::time::Duration;
use tokio::time::Instant;

/// Fires once per whole kilometer reached.
#[derive(Debug, Clone, Default)]
pub struct KilometerTracker {
    announced: u32,
    seed_on_first: bool,
}

impl KilometerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already-covered distance without announcing it.
    pub fn starting_at(distance_meters: f64) -> Self {
        Self { announced: whole_kilometers(distance_meters), seed_on_first: false }
    }

    /// Treat the first observed distance as already announced.
    ///
    /// For a runner whose earlier progress was announced before a restart.
    pub fn seeded_by_first() -> Self {
        Self { announced: 0, seed_on_first: true }
    }

    /// Returns the new kilometer count if `floor(distance / 1000)` increased.
    ///
    /// Jumping several kilometers in one update reports only the latest.
    pub fn observe(&mut self, distance_meters: f64) -> Option<u32> {
        let km = whole_kilometers(distance_meters);
        if self.seed_on_first {
            self.seed_on_first = false;
            self.announced = self.announced.max(km);
            return None;
        }
        if km > self.announced {
            self.announced = km;
            Some(km)
        } else {
            None
        }
    }

    pub fn announced(&self) -> u32 {
        self.announced
    }
}

fn whole_kilometers(distance_meters: f64) -> u32 {
    if distance_meters.is_finite() && distance_meters > 0.0 {
        (distance_meters / 1000.0).floor() as u32
    } else {
        0
    }
}

/// Debounced lead detection.
///
/// A gap smaller than the margin counts as a tie and changes nothing. A new
/// leader must hold continuously for the debounce interval before it is
/// announced. The first leader is established silently.
#[derive(Debug, Clone)]
pub struct LeadTracker {
    debounce: Duration,
    min_margin_meters: f64,
    leading: Option<bool>,
    candidate: Option<(bool, Instant)>,
}

impl LeadTracker {
    pub fn new(debounce: Duration, min_margin_meters: f64) -> Self {
        Self { debounce, min_margin_meters, leading: None, candidate: None }
    }

    /// Feed the current gap (`mine - partner`); returns `Some(is_leading)` on a change.
    pub fn observe(&mut self, my_distance: f64, partner_distance: f64, now: Instant) -> Option<bool> {
        let gap = my_distance - partner_distance;
        if !gap.is_finite() || gap.abs() < self.min_margin_meters {
            // A near-tie neither confirms nor cancels a pending change.
            return None;
        }
        let ahead = gap > 0.0;

        match self.leading {
            None => {
                self.leading = Some(ahead);
                None
            }
            Some(current) if current == ahead => {
                self.candidate = None;
                None
            }
            Some(_) => match self.candidate {
                Some((candidate, since)) if candidate == ahead => {
                    if now.saturating_duration_since(since) >= self.debounce {
                        self.leading = Some(ahead);
                        self.candidate = None;
                        Some(ahead)
                    } else {
                        None
                    }
                }
                _ => {
                    self.candidate = Some((ahead, now));
                    None
                }
            },
        }
    }

    pub fn is_leading(&self) -> Option<bool> {
        self.leading
    }
}
