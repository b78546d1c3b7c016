//! SimWorld - The simulation harness container.
//!
//! Drives a [`RotationScheduler`] through a discrete-event queue on the
//! virtual clock. Timers are tagged with the cycle they were armed in, so
//! `CancelTimers` and `StartCountdown` invalidate everything armed before
//! them exactly like the runtime's cancellation tokens do.

use crate::context::SimContext;
use crate::source::{CatalogSpec, SimSource, SourceController};

use geo::Point;
use serde::Serialize;
use spotlight_core::{
    Command, ObservationFetcher, RotationConfig, RotationError, RotationPhase, RotationScheduler,
    SchedulerEvent, SharedHistory, TickValue,
};
use spotlight_env::{DeploymentId, Observation, ObservationId, SeriesId, SpotlightContext};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Seed extension for the selection RNG stream.
const SELECTION_STREAM: u64 = 0x5e1ec7;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Rotation settings under test
    pub rotation: RotationConfig,

    /// Shape of the generated catalog
    pub catalog: CatalogSpec,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            rotation: RotationConfig::default(),
            catalog: CatalogSpec::default(),
        }
    }
}

/// Something observable that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    PhaseChanged {
        phase: RotationPhase,
    },
    /// A countdown marker was accepted
    Marker {
        marker: TickValue,
    },
    /// The pending slot was filled
    PendingReady {
        id: ObservationId,
        series_id: SeriesId,
    },
    /// The current slot changed
    Presented {
        id: ObservationId,
        series_id: SeriesId,
        deployment_id: Option<DeploymentId>,
        point: Option<Point<f64>>,
        /// False for the initial observation after play
        rotation: bool,
    },
    /// A countdown expired with nothing pending
    MissedRotation,
    StaleDiscarded,
    Error {
        message: String,
    },
}

/// A trace event stamped with virtual time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    /// Seconds since simulation start
    pub time_secs: f64,
    #[serde(flatten)]
    pub event: TraceEvent,
    #[serde(skip)]
    pub time: Duration,
}

#[derive(Debug)]
enum Action {
    Dispatch(SchedulerEvent),
    BeginResolution {
        generation: u64,
        last_deployment: Option<DeploymentId>,
    },
}

#[derive(Debug)]
struct Scheduled {
    /// Cycle the entry was armed in; `None` entries are never cancelled
    cycle: Option<u64>,
    action: Action,
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    source: Arc<SimSource>,
    fetcher: ObservationFetcher<SimSource>,
    history: SharedHistory,
    scheduler: RotationScheduler,

    /// Pending actions ordered by (due time, insertion order)
    queue: BTreeMap<(Duration, u64), Scheduled>,
    next_seq: u64,

    /// Current timer cycle
    cycle: u64,

    trace: Vec<TraceRecord>,
}

impl SimWorld {
    /// Creates a new simulation world over a generated catalog.
    pub fn new(config: SimConfig) -> Result<Self, RotationError> {
        let catalog = config.catalog.generate(config.seed);
        Self::with_catalog(config, catalog)
    }

    /// Creates a new simulation world over an explicit catalog.
    pub fn with_catalog(config: SimConfig, catalog: Vec<Observation>) -> Result<Self, RotationError> {
        config.rotation.validate()?;

        let context = SimContext::shared(config.seed);
        let source = Arc::new(SimSource::new(catalog, config.seed));
        let fetcher = ObservationFetcher::new(
            Arc::clone(&source),
            &config.rotation,
            context.derive_rng(SELECTION_STREAM),
        );

        Ok(Self {
            history: SharedHistory::new(config.rotation.history_capacity),
            scheduler: RotationScheduler::new(&config.rotation),
            config,
            context,
            source,
            fetcher,
            queue: BTreeMap::new(),
            next_seq: 0,
            cycle: 0,
            trace: Vec::new(),
        })
    }

    /// Returns the current virtual time.
    pub fn now(&self) -> Duration {
        self.context.now()
    }

    /// Returns the fault injection controller of the source.
    pub fn source_controller(&self) -> &SourceController {
        self.source.controller()
    }

    pub fn source(&self) -> &SimSource {
        &self.source
    }

    pub fn scheduler(&self) -> &RotationScheduler {
        &self.scheduler
    }

    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    /// Returns everything recorded so far.
    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }

    /// Queues a play request at the given virtual time.
    pub fn play_at(&mut self, at: Duration) {
        self.schedule(at, None, Action::Dispatch(SchedulerEvent::Play));
    }

    /// Queues a pause request at the given virtual time.
    pub fn pause_at(&mut self, at: Duration) {
        self.schedule(at, None, Action::Dispatch(SchedulerEvent::Pause));
    }

    /// Processes every queued action due strictly before `end`, then moves
    /// the clock to `end`.
    pub async fn run_until(&mut self, end: Duration) {
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 >= end {
                break;
            }
            let ((due, _), scheduled) = entry.remove_entry();
            self.context.set_time(due);

            if let Some(cycle) = scheduled.cycle {
                if cycle != self.cycle {
                    trace!("Dropping action from cancelled cycle {}", cycle);
                    continue;
                }
            }

            match scheduled.action {
                Action::Dispatch(event) => self.dispatch(event),
                Action::BeginResolution {
                    generation,
                    last_deployment,
                } => self.begin_resolution(generation, last_deployment).await,
            }
        }

        if self.now() < end {
            self.context.set_time(end);
        }
    }

    fn schedule(&mut self, at: Duration, cycle: Option<u64>, action: Action) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert((at, seq), Scheduled { cycle, action });
    }

    fn record(&mut self, event: TraceEvent) {
        let time = self.now();
        debug!("[{:>7.3}s] {:?}", time.as_secs_f64(), event);
        self.trace.push(TraceRecord {
            time_secs: time.as_secs_f64(),
            event,
            time,
        });
    }

    /// Feeds one event to the scheduler, traces what changed and carries
    /// out the returned commands.
    fn dispatch(&mut self, event: SchedulerEvent) {
        let phase = self.scheduler.phase();
        let rotations = self.scheduler.rotations();
        let missed = self.scheduler.missed_rotations();
        let stale = self.scheduler.stale_discarded();
        let pending = self.scheduler.state().pending.as_ref().map(|o| o.id.clone());
        let current = self.scheduler.state().current.as_ref().map(|o| o.id.clone());
        let last_error = self.scheduler.state().last_error.clone();

        let accepted_marker = match &event {
            SchedulerEvent::Tick { generation, marker }
                if *generation == self.scheduler.generation()
                    && phase == RotationPhase::Counting =>
            {
                Some(*marker)
            }
            _ => None,
        };

        let commands = self.scheduler.handle(event);

        if let Some(marker) = accepted_marker {
            self.record(TraceEvent::Marker { marker });
        }
        if self.scheduler.stale_discarded() > stale {
            self.record(TraceEvent::StaleDiscarded);
        }
        if self.scheduler.missed_rotations() > missed {
            self.record(TraceEvent::MissedRotation);
        }

        let state = self.scheduler.state();
        let pending_event = state
            .pending
            .as_ref()
            .filter(|o| Some(&o.id) != pending.as_ref())
            .map(|o| TraceEvent::PendingReady {
                id: o.id.clone(),
                series_id: o.series_id.clone(),
            });
        let presented_event = state
            .current
            .as_ref()
            .filter(|o| Some(&o.id) != current.as_ref() || self.scheduler.rotations() > rotations)
            .map(|o| TraceEvent::Presented {
                id: o.id.clone(),
                series_id: o.series_id.clone(),
                deployment_id: o.deployment_id.clone(),
                point: o.location.as_ref().map(|l| l.point),
                rotation: self.scheduler.rotations() > rotations,
            });
        let error_event = state
            .last_error
            .as_ref()
            .filter(|_| state.last_error != last_error)
            .map(|message| TraceEvent::Error {
                message: message.clone(),
            });

        for event in [pending_event, presented_event, error_event].into_iter().flatten() {
            self.record(event);
        }
        if self.scheduler.phase() != phase {
            self.record(TraceEvent::PhaseChanged {
                phase: self.scheduler.phase(),
            });
        }

        for command in commands {
            self.execute(command);
        }
    }

    fn execute(&mut self, command: Command) {
        let now = self.now();
        match command {
            Command::CancelTimers => {
                self.cycle += 1;
            }
            Command::StartCountdown { generation } => {
                self.cycle += 1;
                let cycle = Some(self.cycle);
                for (offset, marker) in self.scheduler.countdown().schedule() {
                    self.schedule(
                        now + offset,
                        cycle,
                        Action::Dispatch(SchedulerEvent::Tick { generation, marker }),
                    );
                }
            }
            Command::ResolvePending {
                generation,
                delay,
                last_deployment,
            } => {
                let cycle = Some(self.cycle);
                self.schedule(
                    now + delay,
                    cycle,
                    Action::BeginResolution {
                        generation,
                        last_deployment,
                    },
                );
            }
        }
    }

    /// Runs a resolution against the source and delivers its outcome after
    /// the latency the source accrued. Delivery is not cancellable; the
    /// generation check discards it if it arrives late.
    async fn begin_resolution(&mut self, generation: u64, last_deployment: Option<DeploymentId>) {
        let result = self
            .fetcher
            .resolve_pending(&self.history, last_deployment.as_ref())
            .await;
        let latency = self.source.controller().take_accrued_latency();
        let due = self.now() + latency;
        self.schedule(
            due,
            None,
            Action::Dispatch(SchedulerEvent::Resolved { generation, result }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn world_with(catalog: CatalogSpec) -> SimWorld {
        SimWorld::new(SimConfig {
            seed: 7,
            catalog,
            ..SimConfig::default()
        })
        .unwrap()
    }

    fn times<F: Fn(&TraceEvent) -> bool>(world: &SimWorld, pred: F) -> Vec<f64> {
        world
            .trace()
            .iter()
            .filter(|r| pred(&r.event))
            .map(|r| r.time_secs)
            .collect()
    }

    #[tokio::test]
    async fn test_rotation_cadence() {
        let mut world = world_with(CatalogSpec::default());
        world.play_at(Duration::ZERO);
        world.run_until(secs(30.0)).await;

        let rotations = times(&world, |e| matches!(e, TraceEvent::Presented { rotation: true, .. }));
        assert_eq!(rotations, vec![10.0, 20.0]);

        let markers = times(&world, |e| {
            matches!(e, TraceEvent::Marker { marker } if !marker.is_expired())
        });
        assert_eq!(markers, vec![7.0, 8.0, 9.0, 17.0, 18.0, 19.0, 27.0, 28.0, 29.0]);

        assert_eq!(world.scheduler().rotations(), 2);
        assert_eq!(world.scheduler().missed_rotations(), 0);
        assert_eq!(world.now(), secs(30.0));
    }

    #[tokio::test]
    async fn test_prefetch_fills_pending_before_rotation() {
        let mut world = world_with(CatalogSpec {
            series: 15,
            deployments: 15,
            per_series: 1,
            flagged_every: 0,
        });
        world.play_at(Duration::ZERO);
        world.run_until(secs(5.0)).await;

        let state = world.scheduler().state();
        let initial = state.current.clone().unwrap();
        let pending = state.pending.clone().unwrap();
        assert_ne!(initial.series_id, pending.series_id);
        assert_ne!(initial.deployment_id, pending.deployment_id);
        assert_eq!(
            times(&world, |e| matches!(e, TraceEvent::PendingReady { .. })),
            vec![3.0]
        );

        world.run_until(secs(9.9)).await;
        assert_eq!(world.scheduler().state().current.as_ref(), Some(&initial));

        world.run_until(secs(10.5)).await;
        assert_eq!(world.scheduler().state().current.as_ref(), Some(&pending));
        assert_eq!(world.scheduler().rotations(), 1);
        assert_eq!(world.history().snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_pause_cancels_timers() {
        let mut world = world_with(CatalogSpec::default());
        world.play_at(Duration::ZERO);
        world.pause_at(secs(8.5));
        world.run_until(secs(40.0)).await;

        assert_eq!(world.scheduler().phase(), RotationPhase::Paused);
        assert_eq!(world.scheduler().rotations(), 0);
        let last_marker = times(&world, |e| matches!(e, TraceEvent::Marker { .. }));
        assert_eq!(last_marker, vec![7.0, 8.0]);
    }

    #[tokio::test]
    async fn test_late_response_is_discarded_after_pause_and_play() {
        let mut world = world_with(CatalogSpec::default());
        world
            .source_controller()
            .set_latency(Duration::from_secs(1), Duration::ZERO);

        // Initial resolution lands at 2, prefetch starts at 5 and lands at 7
        world.play_at(Duration::ZERO);
        world.pause_at(secs(6.0));
        world.play_at(secs(6.5));
        world.run_until(secs(9.0)).await;

        assert_eq!(world.scheduler().stale_discarded(), 1);
        assert_eq!(
            times(&world, |e| matches!(e, TraceEvent::StaleDiscarded)),
            vec![7.0]
        );
        // Fresh initial resolution after replay lands at 8.5
        assert_eq!(
            times(&world, |e| matches!(e, TraceEvent::Presented { .. })),
            vec![2.0, 8.5]
        );
        assert!(world.scheduler().state().pending.is_none());
    }

    #[tokio::test]
    async fn test_initial_outage_halts_without_retry() {
        let mut world = world_with(CatalogSpec::default());
        world.source_controller().set_outage(true);
        world.play_at(Duration::ZERO);
        world.run_until(secs(60.0)).await;

        assert_eq!(world.scheduler().phase(), RotationPhase::Failed);
        assert_eq!(world.source_controller().candidate_calls(), 1);
        assert!(times(&world, |e| matches!(e, TraceEvent::Error { .. })).len() == 1);
    }

    #[tokio::test]
    async fn test_same_seed_same_trace() {
        async fn run() -> Vec<TraceRecord> {
            let mut world = SimWorld::new(SimConfig {
                seed: 99,
                ..SimConfig::default()
            })
            .unwrap();
            world
                .source_controller()
                .set_latency(Duration::from_millis(300), Duration::from_millis(120));
            world.play_at(Duration::ZERO);
            world.run_until(secs(60.0)).await;
            world.trace().to_vec()
        }

        assert_eq!(run().await, run().await);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SimConfig {
            rotation: RotationConfig {
                countdown_secs: 0,
                ..RotationConfig::default()
            },
            ..SimConfig::default()
        };
        assert!(matches!(
            SimWorld::new(config),
            Err(RotationError::InvalidConfig(_))
        ));
    }
}
