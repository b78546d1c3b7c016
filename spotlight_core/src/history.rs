//! Bounded history of recently shown series.
//!
//! The tracker is the exclusion list for candidate requests: every
//! successfully resolved observation records its series here, and the oldest
//! entry is evicted once the capacity is reached.

use spotlight_env::SeriesId;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default number of series remembered (long-running sessions stay bounded).
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// FIFO of recently shown series identifiers.
#[derive(Debug, Clone)]
pub struct HistoryTracker {
    /// Series ids, oldest first
    entries: VecDeque<SeriesId>,

    /// Maximum number of retained ids (always >= 1)
    capacity: usize,
}

impl HistoryTracker {
    /// Creates an empty tracker. A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a series id, evicting the oldest entry when full.
    pub fn record(&mut self, series_id: SeriesId) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(series_id);
    }

    /// Returns true if the series was shown recently.
    pub fn contains(&self, series_id: &SeriesId) -> bool {
        self.entries.contains(series_id)
    }

    /// Returns the retained ids, oldest first.
    pub fn snapshot(&self) -> Vec<SeriesId> {
        self.entries.iter().cloned().collect()
    }

    /// Returns the most recently recorded id.
    pub fn last(&self) -> Option<&SeriesId> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// History shared between the scheduler and in-flight resolution tasks.
///
/// The lock is only ever held for a snapshot or a single `record`, never
/// across an await point.
#[derive(Debug, Clone, Default)]
pub struct SharedHistory(Arc<Mutex<HistoryTracker>>);

impl SharedHistory {
    /// Creates a shared tracker with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(HistoryTracker::new(capacity))))
    }

    /// Locks the tracker. A poisoned lock is recovered since the tracker
    /// has no invariant a panicking writer could break half-way.
    pub fn lock(&self) -> MutexGuard<'_, HistoryTracker> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the retained ids, oldest first.
    pub fn snapshot(&self) -> Vec<SeriesId> {
        self.lock().snapshot()
    }

    /// Records a series id.
    pub fn record(&self, series_id: SeriesId) {
        self.lock().record(series_id);
    }

    pub fn contains(&self, series_id: &SeriesId) -> bool {
        self.lock().contains(series_id)
    }
}
