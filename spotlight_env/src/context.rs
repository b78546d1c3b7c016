//! Core environment context trait for the Spotlight rotation engine.

use async_trait::async_trait;
use rand::rngs::StdRng;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the rotation engine can run
/// in both production (tokio) and simulation (virtual clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, entropy-seeded RNG
/// - **Simulation**: `SimContext` - virtual clock, `StdRng(seed)`
///
/// # Determinism
///
/// For DST, all methods that would normally introduce non-determinism
/// (time, randomness) are controlled by the implementation.
#[async_trait]
pub trait SpotlightContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for countdown bookkeeping and log timestamps.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    ///
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// The name is only used for diagnostics.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Derives a random number generator from a seed extension.
    ///
    /// Candidate selection draws from this RNG, so a seeded context makes
    /// the whole rotation sequence reproducible.
    ///
    /// # Arguments
    /// * `seed_extension` - A value to combine with the global seed
    fn derive_rng(&self, seed_extension: u64) -> StdRng;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}
