//! The rotation state machine.
//!
//! `RotationScheduler` is sans-IO: it consumes [`SchedulerEvent`]s and
//! returns the [`Command`]s the driver must carry out (arm timers, start a
//! resolution). The tokio runtime and the simulation world both drive the
//! same machine, one event at a time.
//!
//! # States
//!
//! ```text
//!            play()                 resolved(ok)
//!   Idle ───────────► Resolving ────────────────► Counting ◄──┐
//!    ▲                   │  ▲                       │   │     │ expired:
//!    │ (never returns)   │  │ play()                │   └─────┘ rotate + re-arm
//!                        ▼  │                       │
//!                      Failed ◄──── halt policy ────┤
//!                           ▲                       │ pause()
//!                           └─ play() ── Paused ◄───┘
//! ```
//!
//! # Generations
//!
//! Every play, pause and rotation restart bumps the generation. Timers and
//! resolutions carry the generation they were started under, and anything
//! arriving with an older one is discarded, so a late response can never
//! overwrite a newer cycle's pending slot.

use crate::config::{FailurePolicy, RotationConfig};
use crate::countdown::{Countdown, TickValue};
use crate::error::RotationError;
use serde::{Deserialize, Serialize};
use spotlight_env::{DeploymentId, Observation};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle phase of a rotation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPhase {
    /// No countdown has ever run
    Idle,
    /// Initial pending observation in flight
    Resolving,
    /// Countdown active
    Counting,
    /// Stopped on request
    Paused,
    /// Stopped by a fetch error until play() is invoked again
    Failed,
}

impl RotationPhase {
    /// True iff the rotation is running (Resolving or Counting).
    pub fn is_playing(&self) -> bool {
        matches!(self, RotationPhase::Resolving | RotationPhase::Counting)
    }
}

impl std::fmt::Display for RotationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationPhase::Idle => write!(f, "idle"),
            RotationPhase::Resolving => write!(f, "resolving"),
            RotationPhase::Counting => write!(f, "counting"),
            RotationPhase::Paused => write!(f, "paused"),
            RotationPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Slots and status of a rotation session.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationState {
    /// Observation queued for the next rotation
    pub pending: Option<Observation>,

    /// Observation currently presented
    pub current: Option<Observation>,

    /// Last countdown marker shown, cleared on expiry
    pub countdown: Option<TickValue>,

    pub phase: RotationPhase,

    /// User-facing message for the most recent error
    pub last_error: Option<String>,
}

impl Default for RotationState {
    fn default() -> Self {
        Self {
            pending: None,
            current: None,
            countdown: None,
            phase: RotationPhase::Idle,
            last_error: None,
        }
    }
}

/// What the display layer consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplaySnapshot {
    pub current: Option<Observation>,
    /// "3", "2", "1" during the final seconds, empty otherwise
    pub countdown_display: String,
    pub playing: bool,
    pub error_message: Option<String>,
    pub rotations: u64,
}

/// Inputs to the state machine.
#[derive(Debug)]
pub enum SchedulerEvent {
    Play,
    Pause,
    /// A countdown marker fired
    Tick { generation: u64, marker: TickValue },
    /// A pending resolution finished
    Resolved {
        generation: u64,
        result: Result<Observation, RotationError>,
    },
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Cancel every timer of the current cycle
    CancelTimers,

    /// Cancel the current cycle's timers and start a fresh countdown
    StartCountdown { generation: u64 },

    /// Resolve a pending observation after `delay`
    ResolvePending {
        generation: u64,
        delay: Duration,
        last_deployment: Option<DeploymentId>,
    },
}

/// The rotation state machine.
#[derive(Debug)]
pub struct RotationScheduler {
    state: RotationState,
    countdown: Countdown,
    prefetch_delay: Duration,
    failure_policy: FailurePolicy,

    /// Bumped on every play, pause and rotation restart
    generation: u64,

    /// Deployment of the most recently resolved observation
    last_deployment: Option<DeploymentId>,

    rotations: u64,
    missed_rotations: u64,
    stale_discarded: u64,
}

impl RotationScheduler {
    pub fn new(config: &RotationConfig) -> Self {
        Self {
            state: RotationState::default(),
            countdown: Countdown::new(config.countdown()),
            prefetch_delay: config.prefetch_delay(),
            failure_policy: config.failure_policy,
            generation: 0,
            last_deployment: None,
            rotations: 0,
            missed_rotations: 0,
            stale_discarded: 0,
        }
    }

    pub fn state(&self) -> &RotationState {
        &self.state
    }

    pub fn phase(&self) -> RotationPhase {
        self.state.phase
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Completed pending-to-current promotions.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Expiries at which no pending observation was ready.
    pub fn missed_rotations(&self) -> u64 {
        self.missed_rotations
    }

    /// Resolutions dropped because their generation was outdated.
    pub fn stale_discarded(&self) -> u64 {
        self.stale_discarded
    }

    /// Builds the display view of the current state.
    pub fn snapshot(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            current: self.state.current.clone(),
            countdown_display: self.state.countdown.map(|t| t.to_string()).unwrap_or_default(),
            playing: self.state.phase.is_playing(),
            error_message: self.state.last_error.clone(),
            rotations: self.rotations,
        }
    }

    /// Applies one event and returns the commands to execute, in order.
    pub fn handle(&mut self, event: SchedulerEvent) -> Vec<Command> {
        match event {
            SchedulerEvent::Play => self.on_play(),
            SchedulerEvent::Pause => self.on_pause(),
            SchedulerEvent::Tick { generation, marker } => self.on_tick(generation, marker),
            SchedulerEvent::Resolved { generation, result } => self.on_resolved(generation, result),
        }
    }

    fn on_play(&mut self) -> Vec<Command> {
        if self.state.phase.is_playing() {
            debug!("play() ignored, already {}", self.state.phase);
            return Vec::new();
        }

        self.generation += 1;
        self.state.phase = RotationPhase::Resolving;
        self.state.pending = None;
        self.state.countdown = None;
        self.state.last_error = None;
        info!("Starting rotation (generation {})", self.generation);

        vec![
            Command::CancelTimers,
            Command::ResolvePending {
                generation: self.generation,
                delay: Duration::ZERO,
                last_deployment: self.last_deployment.clone(),
            },
        ]
    }

    fn on_pause(&mut self) -> Vec<Command> {
        if self.state.phase == RotationPhase::Paused {
            return Vec::new();
        }

        self.generation += 1;
        self.state.phase = RotationPhase::Paused;
        // A pending record belongs to the cycle that fetched it
        self.state.pending = None;
        self.state.countdown = None;
        info!("Rotation paused (generation {})", self.generation);

        vec![Command::CancelTimers]
    }

    fn on_tick(&mut self, generation: u64, marker: TickValue) -> Vec<Command> {
        if generation != self.generation || self.state.phase != RotationPhase::Counting {
            debug!("Ignoring stale countdown marker {:?} (generation {})", marker, generation);
            return Vec::new();
        }

        if !marker.is_expired() {
            self.state.countdown = Some(marker);
            return Vec::new();
        }

        debug!("Countdown complete");
        self.state.countdown = None;
        self.rotate();
        self.generation += 1;
        self.start_cycle()
    }

    fn on_resolved(
        &mut self,
        generation: u64,
        result: Result<Observation, RotationError>,
    ) -> Vec<Command> {
        if generation != self.generation {
            self.stale_discarded += 1;
            debug!(
                "Discarding resolution from generation {} (now {})",
                generation, self.generation
            );
            return Vec::new();
        }

        match (self.state.phase, result) {
            (RotationPhase::Resolving, Ok(observation)) => {
                info!("Initial observation {} ready", observation.id);
                self.last_deployment = observation.deployment_id.clone();
                self.state.current = Some(observation);
                self.state.last_error = None;
                self.state.phase = RotationPhase::Counting;
                self.start_cycle()
            }
            (RotationPhase::Resolving, Err(err)) => {
                log_failure(&err);
                self.state.phase = RotationPhase::Failed;
                self.state.last_error = Some(err.to_string());
                vec![Command::CancelTimers]
            }
            (RotationPhase::Counting, Ok(observation)) => {
                debug!("Pending observation {} ready", observation.id);
                self.last_deployment = observation.deployment_id.clone();
                self.state.pending = Some(observation);
                self.state.last_error = None;
                Vec::new()
            }
            (RotationPhase::Counting, Err(err)) => {
                log_failure(&err);
                self.state.last_error = Some(err.to_string());
                match self.failure_policy {
                    FailurePolicy::RetryNextRotation => Vec::new(),
                    FailurePolicy::HaltOnAnyError => {
                        self.generation += 1;
                        self.state.phase = RotationPhase::Failed;
                        self.state.pending = None;
                        self.state.countdown = None;
                        vec![Command::CancelTimers]
                    }
                }
            }
            (phase, _) => {
                self.stale_discarded += 1;
                debug!("Discarding resolution while {}", phase);
                Vec::new()
            }
        }
    }

    /// Promotes pending to current. Without a resolved pending observation
    /// the current one stays on display.
    fn rotate(&mut self) {
        match self.state.pending.take() {
            Some(next) => {
                info!("Rotating to observation {} (series {})", next.id, next.series_id);
                self.state.current = Some(next);
                self.rotations += 1;
            }
            None => {
                warn!("No pending observation at rotation time, keeping current");
                self.missed_rotations += 1;
            }
        }
    }

    fn start_cycle(&self) -> Vec<Command> {
        vec![
            Command::StartCountdown {
                generation: self.generation,
            },
            Command::ResolvePending {
                generation: self.generation,
                delay: self.prefetch_delay,
                last_deployment: self.last_deployment.clone(),
            },
        ]
    }
}

fn log_failure(err: &RotationError) {
    if err.is_contract_violation() {
        error!("Observation selection contract violated: {}", err);
    } else {
        warn!("{}", err);
    }
}
