//! Countdown markers shown during the last seconds of a rotation cycle.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A countdown marker.
///
/// The three numbered markers are purely for display; `Expired` triggers
/// the rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickValue {
    Three,
    Two,
    One,
    Expired,
}

impl TickValue {
    /// Seconds remaining when this marker fires.
    pub fn seconds_remaining(&self) -> u64 {
        match self {
            TickValue::Three => 3,
            TickValue::Two => 2,
            TickValue::One => 1,
            TickValue::Expired => 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, TickValue::Expired)
    }
}

impl std::fmt::Display for TickValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickValue::Expired => Ok(()),
            marker => write!(f, "{}", marker.seconds_remaining()),
        }
    }
}

/// Fixed-length countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    duration: Duration,
}

impl Countdown {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns `(offset from start, marker)` pairs in firing order.
    ///
    /// Markers that would fire before the countdown starts are skipped;
    /// `Expired` is always last, at `duration`.
    pub fn schedule(&self) -> Vec<(Duration, TickValue)> {
        [TickValue::Three, TickValue::Two, TickValue::One]
            .into_iter()
            .filter_map(|marker| {
                self.duration
                    .checked_sub(Duration::from_secs(marker.seconds_remaining()))
                    .filter(|offset| !offset.is_zero())
                    .map(|offset| (offset, marker))
            })
            .chain(std::iter::once((self.duration, TickValue::Expired)))
            .collect()
    }
}
