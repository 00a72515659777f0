//! Stream combinators for subscriber-facing feeds.

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
