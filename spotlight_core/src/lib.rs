//! Spotlight Core - Observation Rotation Engine
//!
//! Rotates a displayed "current" observation every N seconds while always
//! pre-fetching the next one, so the rotation never stalls on network
//! latency:
//! 1. **Diversity**: recently shown series and the last deployment are
//!    excluded when choosing the next observation (fresh-first, with a
//!    fallback when everything has been seen)
//! 2. **Cadence**: a cancellable countdown with "3", "2", "1" markers
//!    promotes the pending observation at expiry and re-arms itself
//! 3. **Consistency**: a generation counter discards late responses from
//!    cancelled or completed cycles

pub mod config;
pub mod controller;
pub mod countdown;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod runtime;
pub mod scheduler;
pub mod selector;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use config::{ExclusionStrategy, FailurePolicy, PrefetchPolicy, RotationConfig};
pub use controller::PlaybackController;
pub use countdown::{Countdown, TickValue};
pub use error::RotationError;
pub use fetcher::ObservationFetcher;
pub use history::{HistoryTracker, SharedHistory};
pub use runtime::RotationRuntime;
pub use scheduler::{
    Command, DisplaySnapshot, RotationPhase, RotationScheduler, RotationState, SchedulerEvent,
};
pub use selector::CandidateSelector;
