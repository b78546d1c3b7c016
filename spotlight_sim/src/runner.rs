//! Scenario runner - executes fault scenarios against a SimWorld.

use crate::scenarios::ScenarioId;
use crate::source::CatalogSpec;
use crate::world::{SimConfig, SimWorld, TraceEvent, TraceRecord};

use geo::HaversineDistance;
use serde::Serialize;
use spotlight_core::{FailurePolicy, RotationConfig, RotationPhase};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Countdown expiries that promoted a pending observation
    pub rotations: u64,

    /// Countdown expiries with nothing pending
    pub missed_rotations: u64,

    /// Countdown markers accepted (including expiries)
    pub markers: u64,

    /// Results discarded for carrying an old generation
    pub stale_discarded: u64,

    /// Failures injected by the source
    pub fetch_failures: u64,

    pub candidate_calls: u64,
    pub detail_calls: u64,

    /// Consecutive presentations of the same series
    pub series_repeats: u64,

    /// Consecutive presentations from the same deployment
    pub deployment_repeats: u64,

    /// Mean great-circle distance between consecutive presentations
    pub mean_hop_km: f64,
}

impl ScenarioMetrics {
    /// Collects metrics from a finished world.
    pub fn collect(world: &SimWorld) -> Self {
        let presented: Vec<&TraceEvent> = world
            .trace()
            .iter()
            .map(|r| &r.event)
            .filter(|e| matches!(e, TraceEvent::Presented { .. }))
            .collect();

        let mut series_repeats = 0;
        let mut deployment_repeats = 0;
        let mut hops = Vec::new();
        for pair in presented.windows(2) {
            if let (
                TraceEvent::Presented {
                    series_id: s1,
                    deployment_id: d1,
                    point: p1,
                    ..
                },
                TraceEvent::Presented {
                    series_id: s2,
                    deployment_id: d2,
                    point: p2,
                    ..
                },
            ) = (pair[0], pair[1])
            {
                if s1 == s2 {
                    series_repeats += 1;
                }
                if d1.is_some() && d1 == d2 {
                    deployment_repeats += 1;
                }
                if let (Some(a), Some(b)) = (p1, p2) {
                    hops.push(a.haversine_distance(b) / 1000.0);
                }
            }
        }

        let controller = world.source_controller();
        Self {
            rotations: world.scheduler().rotations(),
            missed_rotations: world.scheduler().missed_rotations(),
            markers: world
                .trace()
                .iter()
                .filter(|r| matches!(r.event, TraceEvent::Marker { .. }))
                .count() as u64,
            stale_discarded: world.scheduler().stale_discarded(),
            fetch_failures: controller.failures(),
            candidate_calls: controller.candidate_calls(),
            detail_calls: controller.detail_calls(),
            series_repeats,
            deployment_repeats,
            mean_hop_km: if hops.is_empty() {
                0.0
            } else {
                hops.iter().sum::<f64>() / hops.len() as f64
            },
        }
    }
}

/// Collects assertion failures for a scenario.
#[derive(Debug, Default)]
struct Checks(Vec<String>);

impl Checks {
    fn check(&mut self, condition: bool, message: impl FnOnce() -> String) {
        if !condition {
            let message = message();
            warn!("  ✗ {}", message);
            self.0.push(message);
        }
    }

    fn reason(self) -> Option<String> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.join("; "))
        }
    }
}

/// Runs fault scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Minimum simulated duration in seconds
    duration_secs: f64,

    /// Rotation settings shared by every scenario
    rotation: RotationConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            duration_secs: 60.0,
            rotation: RotationConfig::default(),
        }
    }

    /// Sets the minimum duration. Scenarios extend it when they need more
    /// cycles to reach their assertions.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs.max(0.0);
        self
    }

    /// Sets the rotation configuration.
    pub fn with_config(mut self, config: RotationConfig) -> Self {
        self.rotation = config;
        self
    }

    /// Sets the countdown length.
    pub fn with_countdown(mut self, secs: u64) -> Self {
        self.rotation.countdown_secs = secs;
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_traced(scenario).await.0
    }

    /// Runs a scenario and returns the result together with its trace.
    pub async fn run_traced(&self, scenario: ScenarioId) -> (ScenarioResult, Vec<TraceRecord>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let rotation = match scenario {
            ScenarioId::HaltPolicy => RotationConfig {
                failure_policy: FailurePolicy::HaltOnAnyError,
                ..self.rotation.clone()
            },
            _ => self.rotation.clone(),
        };
        let catalog = match scenario {
            ScenarioId::SmallUniverse => CatalogSpec {
                series: 3,
                deployments: 3,
                per_series: 10,
                flagged_every: 0,
            },
            _ => CatalogSpec::default(),
        };

        let mut world = match SimWorld::new(SimConfig {
            seed: self.seed,
            rotation,
            catalog,
        }) {
            Ok(world) => world,
            Err(e) => {
                warn!("Scenario {} could not start: {}", scenario, e);
                let result = ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    final_time_secs: 0.0,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                };
                return (result, Vec::new());
            }
        };

        let checks = match scenario {
            ScenarioId::SteadyRotation => self.run_steady_rotation(&mut world).await,
            ScenarioId::SmallUniverse => self.run_small_universe(&mut world).await,
            ScenarioId::FlakySource => self.run_flaky_source(&mut world).await,
            ScenarioId::InitialOutage => self.run_initial_outage(&mut world).await,
            ScenarioId::PauseResume => self.run_pause_resume(&mut world).await,
            ScenarioId::SlowSource => self.run_slow_source(&mut world).await,
            ScenarioId::HaltPolicy => self.run_halt_policy(&mut world).await,
        };

        let failure_reason = checks.reason();
        let metrics = ScenarioMetrics::collect(&world);
        if failure_reason.is_none() {
            info!(
                "✓ {} complete: {} rotations, {} missed, {} stale, mean hop {:.1}km",
                scenario,
                metrics.rotations,
                metrics.missed_rotations,
                metrics.stale_discarded,
                metrics.mean_hop_km
            );
        }

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            final_time_secs: world.now().as_secs_f64(),
            failure_reason,
            metrics,
        };
        (result, world.trace().to_vec())
    }

    fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs)
    }

    fn countdown(&self) -> Duration {
        self.rotation.countdown()
    }

    /// DST-001: healthy source, jittered latency.
    async fn run_steady_rotation(&self, world: &mut SimWorld) -> Checks {
        let mut checks = Checks::default();
        world
            .source_controller()
            .set_latency(Duration::from_millis(300), Duration::from_millis(100));

        let end = self.duration();
        world.play_at(Duration::ZERO);
        world.run_until(end).await;

        let Some(t0) = first_presented(world.trace(), Duration::ZERO) else {
            checks.check(false, || "nothing was ever presented".to_string());
            return checks;
        };
        debug!("  first observation presented at {:.3}s", t0.as_secs_f64());

        let expected = expiries_between(t0, end, self.countdown());
        let scheduler = world.scheduler();
        checks.check(scheduler.rotations() == expected, || {
            format!("expected {} rotations, got {}", expected, scheduler.rotations())
        });
        checks.check(scheduler.missed_rotations() == 0, || {
            format!("{} rotations missed", scheduler.missed_rotations())
        });
        let drift = cadence_violations(world.trace(), t0, end, self.countdown());
        checks.check(drift == 0, || format!("{} markers off cadence", drift));

        let presented = presented_count(world.trace());
        if presented <= world.config.catalog.series {
            let metrics = ScenarioMetrics::collect(world);
            checks.check(metrics.series_repeats == 0, || {
                format!("{} consecutive series repeats", metrics.series_repeats)
            });
            checks.check(metrics.deployment_repeats == 0, || {
                format!("{} consecutive deployment repeats", metrics.deployment_repeats)
            });
        }
        checks
    }

    /// DST-002: every series seen, rotation falls back to cached candidates.
    async fn run_small_universe(&self, world: &mut SimWorld) -> Checks {
        let mut checks = Checks::default();
        let end = self.duration().max(self.countdown() * 6);
        world.play_at(Duration::ZERO);
        world.run_until(end).await;

        let expected = expiries_between(Duration::ZERO, end, self.countdown());
        let scheduler = world.scheduler();
        checks.check(scheduler.rotations() == expected, || {
            format!("expected {} rotations, got {}", expected, scheduler.rotations())
        });
        checks.check(scheduler.phase() == RotationPhase::Counting, || {
            format!("rotation stalled in phase {}", scheduler.phase())
        });
        let errors = count(world.trace(), |e| matches!(e, TraceEvent::Error { .. }));
        checks.check(errors == 0, || format!("{} errors surfaced", errors));
        checks
    }

    /// DST-003: failed pre-fetches never stop a running rotation.
    async fn run_flaky_source(&self, world: &mut SimWorld) -> Checks {
        let mut checks = Checks::default();
        let countdown = self.countdown();
        world
            .source_controller()
            .set_latency(Duration::from_millis(200), Duration::ZERO);

        world.play_at(Duration::ZERO);
        world.run_until(Duration::from_secs(2).min(countdown)).await;
        let Some(t0) = first_presented(world.trace(), Duration::ZERO) else {
            checks.check(false, || "nothing was ever presented".to_string());
            return checks;
        };

        // The first pre-fetch fails, the second succeeds
        world.source_controller().fail_next(1);
        let chaos_at = t0 + countdown * 2 + Duration::from_secs(1);
        world.run_until(chaos_at).await;
        world.source_controller().set_failure_rate(0.25);

        let end = self.duration().max(t0 + countdown * 3);
        world.run_until(end).await;

        let scheduler = world.scheduler();
        let expected = expiries_between(t0, end, countdown);
        checks.check(scheduler.phase() == RotationPhase::Counting, || {
            format!("rotation stopped in phase {}", scheduler.phase())
        });
        checks.check(
            scheduler.rotations() + scheduler.missed_rotations() == expected,
            || {
                format!(
                    "expected {} expiries, got {} rotations + {} missed",
                    expected,
                    scheduler.rotations(),
                    scheduler.missed_rotations()
                )
            },
        );
        checks.check(scheduler.missed_rotations() >= 1, || {
            "failed pre-fetch did not cause a missed rotation".to_string()
        });
        checks.check(scheduler.rotations() >= 1, || {
            "rotation did not recover after a failed pre-fetch".to_string()
        });
        let errors = count(world.trace(), |e| matches!(e, TraceEvent::Error { .. }));
        checks.check(errors >= 1, || "no error surfaced".to_string());
        let drift = cadence_violations(world.trace(), t0, end, countdown);
        checks.check(drift == 0, || format!("{} markers off cadence", drift));
        checks
    }

    /// DST-004: an initial failure halts until play is pressed again.
    async fn run_initial_outage(&self, world: &mut SimWorld) -> Checks {
        let mut checks = Checks::default();
        let countdown = self.countdown();
        world.source_controller().set_outage(true);

        world.play_at(Duration::ZERO);
        let restart = countdown + Duration::from_secs(5);
        world.run_until(restart).await;

        checks.check(world.scheduler().phase() == RotationPhase::Failed, || {
            format!("expected failed phase, got {}", world.scheduler().phase())
        });
        checks.check(presented_count(world.trace()) == 0, || {
            "an observation was presented during the outage".to_string()
        });
        checks.check(world.source_controller().candidate_calls() == 1, || {
            format!(
                "expected a single attempt, got {}",
                world.source_controller().candidate_calls()
            )
        });

        world.source_controller().set_outage(false);
        world.play_at(restart);
        let end = self.duration().max(restart + countdown * 3);
        world.run_until(end).await;

        let t1 = first_presented(world.trace(), restart);
        checks.check(t1 == Some(restart), || {
            format!("replay presented at {:?}, expected {:?}", t1, restart)
        });
        let expected = expiries_between(restart, end, countdown);
        let scheduler = world.scheduler();
        checks.check(scheduler.rotations() == expected, || {
            format!("expected {} rotations, got {}", expected, scheduler.rotations())
        });
        checks.check(scheduler.state().last_error.is_none(), || {
            "error message survived a successful replay".to_string()
        });
        checks
    }

    /// DST-005: a response arriving after pause/play is discarded.
    async fn run_pause_resume(&self, world: &mut SimWorld) -> Checks {
        let mut checks = Checks::default();
        let countdown = self.countdown();
        let latency = Duration::from_secs(2);
        let resolution = latency * 2;
        world.source_controller().set_latency(latency, Duration::ZERO);

        let t0 = resolution;
        let prefetch_at = t0 + world.config.rotation.prefetch_delay();
        let pause_at = prefetch_at + Duration::from_secs(1);
        let play_at = pause_at + Duration::from_millis(500);
        let t1 = play_at + resolution;

        world.play_at(Duration::ZERO);
        world.pause_at(pause_at);
        world.pause_at(pause_at + Duration::from_millis(200));
        world.play_at(play_at);
        let end = self.duration().max(t1 + countdown * 2 + Duration::from_secs(1));
        world.run_until(end).await;

        let scheduler = world.scheduler();
        let stale = times(world.trace(), |e| matches!(e, TraceEvent::StaleDiscarded));
        checks.check(stale.first() == Some(&(prefetch_at + resolution)), || {
            format!("expected a stale response at {:?}, got {:?}", prefetch_at + resolution, stale)
        });
        let pending_while_paused = times(world.trace(), |e| {
            matches!(e, TraceEvent::PendingReady { .. })
        })
        .into_iter()
        .filter(|t| *t >= pause_at && *t < t1)
        .count();
        checks.check(pending_while_paused == 0, || {
            "a stale response filled the pending slot".to_string()
        });
        let markers_while_paused = times(world.trace(), |e| matches!(e, TraceEvent::Marker { .. }))
            .into_iter()
            .filter(|t| *t >= pause_at && *t < t1)
            .count();
        checks.check(markers_while_paused == 0, || {
            format!("{} markers fired while paused", markers_while_paused)
        });
        checks.check(first_presented(world.trace(), play_at) == Some(t1), || {
            format!("replay did not present at {:?}", t1)
        });

        let expected = expiries_between(t1, end, countdown);
        checks.check(
            scheduler.rotations() + scheduler.missed_rotations() == expected,
            || {
                format!(
                    "expected {} expiries after replay, got {}",
                    expected,
                    scheduler.rotations() + scheduler.missed_rotations()
                )
            },
        );
        checks.check(scheduler.phase() == RotationPhase::Counting, || {
            format!("expected counting phase, got {}", scheduler.phase())
        });
        let drift = cadence_violations(world.trace(), t1, end, countdown);
        checks.check(drift == 0, || format!("{} markers off cadence", drift));
        checks
    }

    /// DST-006: resolutions longer than the pre-fetch window.
    async fn run_slow_source(&self, world: &mut SimWorld) -> Checks {
        let mut checks = Checks::default();
        let countdown = self.countdown();
        let latency = Duration::from_millis(4500);
        let resolution = latency * 2;
        world.source_controller().set_latency(latency, Duration::ZERO);

        let t0 = resolution;
        let end = self.duration().max(t0 + countdown * 4);
        world.play_at(Duration::ZERO);
        world.run_until(end).await;

        let scheduler = world.scheduler();
        let expected = expiries_between(t0, end, countdown);
        let window = countdown.saturating_sub(world.config.rotation.prefetch_delay());
        if resolution > window {
            // Every pre-fetch lands after its cycle has rotated
            checks.check(scheduler.rotations() == 0, || {
                format!("expected no rotations, got {}", scheduler.rotations())
            });
            checks.check(scheduler.missed_rotations() == expected, || {
                format!(
                    "expected {} missed rotations, got {}",
                    expected,
                    scheduler.missed_rotations()
                )
            });
            checks.check(presented_count(world.trace()) == 1, || {
                "current changed without a pending observation".to_string()
            });
        } else {
            checks.check(scheduler.rotations() == expected, || {
                format!("expected {} rotations, got {}", expected, scheduler.rotations())
            });
        }
        checks.check(scheduler.phase() == RotationPhase::Counting, || {
            format!("expected counting phase, got {}", scheduler.phase())
        });
        let drift = cadence_violations(world.trace(), t0, end, countdown);
        checks.check(drift == 0, || format!("{} markers off cadence", drift));
        checks
    }

    /// DST-007: with the halting policy one failed pre-fetch stops rotation.
    async fn run_halt_policy(&self, world: &mut SimWorld) -> Checks {
        let mut checks = Checks::default();
        let countdown = self.countdown();

        world.play_at(Duration::ZERO);
        world.run_until(Duration::from_millis(500)).await;
        world.source_controller().fail_next(1);

        let failed_at = world.config.rotation.prefetch_delay();
        let restart = countdown + countdown / 2;
        world.run_until(restart).await;

        let scheduler = world.scheduler();
        checks.check(scheduler.phase() == RotationPhase::Failed, || {
            format!("expected failed phase, got {}", scheduler.phase())
        });
        let late_markers = times(world.trace(), |e| matches!(e, TraceEvent::Marker { .. }))
            .into_iter()
            .filter(|t| *t > failed_at)
            .count();
        checks.check(late_markers == 0, || {
            format!("{} markers fired after the halt", late_markers)
        });
        checks.check(scheduler.state().last_error.is_some(), || {
            "halt did not surface an error".to_string()
        });

        world.play_at(restart);
        let end = self.duration().max(restart + countdown * 2 + Duration::from_secs(1));
        world.run_until(end).await;

        let scheduler = world.scheduler();
        let expected = expiries_between(restart, end, countdown);
        checks.check(scheduler.rotations() == expected, || {
            format!("expected {} rotations after replay, got {}", expected, scheduler.rotations())
        });
        checks.check(scheduler.phase() == RotationPhase::Counting, || {
            format!("expected counting phase, got {}", scheduler.phase())
        });
        checks
    }
}

/// Number of countdown expiries strictly before `end` for a countdown
/// started at `start`.
fn expiries_between(start: Duration, end: Duration, countdown: Duration) -> u64 {
    let span = end.saturating_sub(start).as_nanos();
    let period = countdown.as_nanos().max(1);
    if span == 0 {
        0
    } else {
        ((span - 1) / period) as u64
    }
}

/// Markers within `[from, until)` that do not sit at their expected offset
/// in a countdown started at `from`.
fn cadence_violations(
    trace: &[TraceRecord],
    from: Duration,
    until: Duration,
    countdown: Duration,
) -> usize {
    let period = countdown.as_nanos().max(1);
    trace
        .iter()
        .filter(|r| r.time >= from && r.time < until)
        .filter_map(|r| match r.event {
            TraceEvent::Marker { marker } => Some((r.time, marker)),
            _ => None,
        })
        .filter(|(time, marker)| {
            let offset = (*time - from).as_nanos() % period;
            let lead = u128::from(marker.seconds_remaining()) * 1_000_000_000;
            offset != (period + period - lead % period) % period
        })
        .count()
}

fn first_presented(trace: &[TraceRecord], after: Duration) -> Option<Duration> {
    trace
        .iter()
        .find(|r| r.time >= after && matches!(r.event, TraceEvent::Presented { .. }))
        .map(|r| r.time)
}

fn presented_count(trace: &[TraceRecord]) -> usize {
    count(trace, |e| matches!(e, TraceEvent::Presented { .. }))
}

fn count<F: Fn(&TraceEvent) -> bool>(trace: &[TraceRecord], pred: F) -> usize {
    trace.iter().filter(|r| pred(&r.event)).count()
}

fn times<F: Fn(&TraceEvent) -> bool>(trace: &[TraceRecord], pred: F) -> Vec<Duration> {
    trace
        .iter()
        .filter(|r| pred(&r.event))
        .map(|r| r.time)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_all_scenarios_pass() {
        let runner = ScenarioRunner::new(42);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario).await;
            assert!(
                result.passed,
                "{} failed: {:?}",
                scenario,
                result.failure_reason
            );
        }
    }

    #[tokio::test]
    async fn test_steady_rotation_metrics() {
        let result = ScenarioRunner::new(7).run(ScenarioId::SteadyRotation).await;
        assert!(result.passed);
        assert_eq!(result.metrics.rotations, 5);
        assert_eq!(result.metrics.series_repeats, 0);
        assert_eq!(result.metrics.deployment_repeats, 0);
        assert!(result.metrics.mean_hop_km > 0.0);
        assert_eq!(result.final_time_secs, 60.0);
    }

    #[tokio::test]
    async fn test_slow_source_never_rotates() {
        let result = ScenarioRunner::new(3).run(ScenarioId::SlowSource).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.rotations, 0);
        assert!(result.metrics.stale_discarded >= 1);
    }

    #[tokio::test]
    async fn test_invalid_countdown_fails_cleanly() {
        let result = ScenarioRunner::new(1)
            .with_countdown(0)
            .run(ScenarioId::SteadyRotation)
            .await;
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("countdown_secs"));
    }

    #[tokio::test]
    async fn test_trace_is_reproducible() {
        let runner = ScenarioRunner::new(1234);
        let (a, trace_a) = runner.run_traced(ScenarioId::FlakySource).await;
        let (b, trace_b) = runner.run_traced(ScenarioId::FlakySource).await;
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(trace_a, trace_b);
    }

    #[test]
    fn test_expiries_between() {
        let c = Duration::from_secs(10);
        assert_eq!(expiries_between(Duration::ZERO, Duration::from_secs(30), c), 2);
        assert_eq!(expiries_between(Duration::ZERO, Duration::from_secs(31), c), 3);
        assert_eq!(expiries_between(Duration::from_secs(5), Duration::from_secs(5), c), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_steady_rotation_any_seed(seed in any::<u64>()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let result = rt.block_on(ScenarioRunner::new(seed).run(ScenarioId::SteadyRotation));
            prop_assert!(result.passed, "{:?}", result.failure_reason);
        }

        #[test]
        fn prop_pause_resume_any_seed(seed in any::<u64>()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let result = rt.block_on(ScenarioRunner::new(seed).run(ScenarioId::PauseResume));
            prop_assert!(result.passed, "{:?}", result.failure_reason);
        }
    }
}
