//! Simulation context implementing SpotlightContext for deterministic testing.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use spotlight_env::SpotlightContext;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug_span, Instrument};

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `SpotlightContext` using:
/// - A virtual clock that is advanced by the simulation world
/// - Seeded RNG streams for deterministic candidate selection
/// - Simulated sleep that advances virtual time
///
/// The clock never moves on its own, so this context is meant for the
/// discrete-event [`SimWorld`](crate::SimWorld), not for the tokio-driven
/// rotation runtime.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.clock();
        *time += duration.as_nanos() as u64;
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time: Duration) {
        *self.clock() = time.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.clock()
    }

    fn clock(&self) -> std::sync::MutexGuard<'_, u64> {
        self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl SpotlightContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // In simulation, sleep advances virtual time
        self.advance_time(duration);
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future.instrument(debug_span!("task", name)));
    }

    fn derive_rng(&self, seed_extension: u64) -> StdRng {
        // Combine master seed with extension for an independent stream
        let combined_seed = self.seed.wrapping_mul(0x517cc1b727220a95) ^ seed_extension;
        StdRng::seed_from_u64(combined_seed)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));

        ctx.set_time(Duration::from_secs(10));
        assert_eq!(ctx.now(), Duration::from_secs(10));
    }

    #[test]
    fn test_sim_context_deterministic_rng() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);

        let a: [u64; 4] = ctx1.derive_rng(1).gen();
        let b: [u64; 4] = ctx2.derive_rng(1).gen();

        // Same seed + extension = same stream
        assert_eq!(a, b);

        // Different extension = different stream
        let c: [u64; 4] = ctx1.derive_rng(2).gen();
        assert_ne!(a, c);
    }

    #[test]
    fn test_sim_context_seed() {
        let ctx = SimContext::new(12345);
        assert_eq!(ctx.seed(), 12345);
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));

        // Both should see the same time
        assert_eq!(ctx1.now(), ctx2.now());
    }

    #[tokio::test]
    async fn test_sim_context_sleep_advances_clock() {
        let ctx = SimContext::new(1);
        ctx.sleep(Duration::from_secs(3)).await;
        assert_eq!(ctx.now(), Duration::from_secs(3));
        assert_eq!(
            ctx.system_time(),
            UNIX_EPOCH + Duration::from_secs(1704067200 + 3)
        );
    }
}
