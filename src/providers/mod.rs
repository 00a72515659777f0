//! Built-in telemetry providers.

pub mod channel;
pub mod scripted;

pub use channel::{ChannelProvider, SampleSender};
pub use scripted::ScriptedProvider;
