//! Rotation Runtime - Drives the rotation state machine with an environment context.
//!
//! This module provides the integration layer between the pure state machine
//! ([`RotationScheduler`]) and the environment abstraction (SpotlightContext).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RotationRuntime                        │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │              Context: SpotlightContext               │   │
//! │  │  • sleep() → countdown markers, pre-fetch delay      │   │
//! │  │  • spawn() → timer and resolution tasks              │   │
//! │  │  • derive_rng() → candidate selection                │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                              │                              │
//! │  control ──►┌──────────────────────────┐◄── Tick / Resolved │
//! │             │  RotationScheduler       │                    │
//! │             │  (single writer)         │──► watch<Display>  │
//! │             └──────────────────────────┘                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every event, whether it comes from the controller, a timer or a finished
//! fetch, is handled by one task, so the pending/current slots are never
//! mutated concurrently. Each scheduling cycle owns one cancellation token;
//! cancelling it stops the cycle's timers synchronously. In-flight fetches
//! are left to finish and are filtered by generation instead.
//!
//! # Usage
//!
//! ```ignore
//! use spotlight_core::{RotationConfig, RotationRuntime};
//! use spotlight_env::TokioContext;
//!
//! let controller = RotationRuntime::spawn(TokioContext::shared(), source, RotationConfig::default())?;
//! controller.play().await?;
//! ```

use crate::config::RotationConfig;
use crate::controller::{Control, PlaybackController};
use crate::error::Result;
use crate::fetcher::ObservationFetcher;
use crate::history::SharedHistory;
use crate::scheduler::{Command, DisplaySnapshot, RotationScheduler, SchedulerEvent};
use spotlight_env::{DeploymentId, ObservationSource, SpotlightContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Seed extension for the candidate-selection RNG stream.
const SELECTION_RNG_STREAM: u64 = 0x5e1ec7;

/// Control messages buffered before play()/pause() callers wait.
const CONTROL_QUEUE_DEPTH: usize = 16;

/// The scheduler actor.
///
/// Generic over the context and source implementations, allowing the same
/// rotation code to run in production (tokio) or against simulated sources.
pub struct RotationRuntime<Ctx, Src>
where
    Ctx: SpotlightContext,
    Src: ObservationSource,
{
    /// Environment context
    context: Arc<Ctx>,

    /// Pending-observation resolution
    fetcher: Arc<ObservationFetcher<Src>>,

    /// Recently shown series
    history: SharedHistory,

    /// The state machine
    scheduler: RotationScheduler,

    /// Timer and fetch completions
    events_tx: mpsc::UnboundedSender<SchedulerEvent>,
    events_rx: mpsc::UnboundedReceiver<SchedulerEvent>,

    /// play()/pause() from controllers
    control_rx: mpsc::Receiver<Control>,

    /// Display surface
    display_tx: watch::Sender<DisplaySnapshot>,

    /// Cancellation for the current cycle's timers
    cycle: CancellationToken,
}

impl<Ctx, Src> RotationRuntime<Ctx, Src>
where
    Ctx: SpotlightContext,
    Src: ObservationSource,
{
    /// Validates the configuration, spawns the scheduler task on the
    /// context and returns a controller for it.
    ///
    /// The task stops once every controller clone has been dropped.
    pub fn spawn(
        context: Arc<Ctx>,
        source: Arc<Src>,
        config: RotationConfig,
    ) -> Result<PlaybackController> {
        config.validate()?;

        let rng = context.derive_rng(SELECTION_RNG_STREAM);
        let fetcher = Arc::new(ObservationFetcher::new(source, &config, rng));
        let scheduler = RotationScheduler::new(&config);

        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (display_tx, display_rx) = watch::channel(scheduler.snapshot());

        let runtime = Self {
            context: Arc::clone(&context),
            fetcher,
            history: SharedHistory::new(config.history_capacity),
            scheduler,
            events_tx,
            events_rx,
            control_rx,
            display_tx,
            cycle: CancellationToken::new(),
        };

        info!(
            "Spawning rotation scheduler (countdown {:?}, batch {}, seed {})",
            config.countdown(),
            config.batch_size,
            context.seed()
        );
        context.spawn("rotation-scheduler", runtime.run());

        Ok(PlaybackController::new(control_tx, display_rx))
    }

    async fn run(mut self) {
        loop {
            let (event, ack) = tokio::select! {
                control = self.control_rx.recv() => match control {
                    Some(Control::Play(ack)) => (SchedulerEvent::Play, Some(ack)),
                    Some(Control::Pause(ack)) => (SchedulerEvent::Pause, Some(ack)),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => (event, None),
            };

            for command in self.scheduler.handle(event) {
                self.execute(command);
            }
            self.display_tx.send_replace(self.scheduler.snapshot());

            if let Some(ack) = ack {
                // The caller may have given up waiting
                let _ = ack.send(());
            }
        }

        self.cycle.cancel();
        info!("Rotation scheduler stopped after {} rotations", self.scheduler.rotations());
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::CancelTimers => self.reset_cycle(),
            Command::StartCountdown { generation } => {
                self.reset_cycle();
                self.spawn_countdown(generation);
            }
            Command::ResolvePending {
                generation,
                delay,
                last_deployment,
            } => self.spawn_resolution(generation, delay, last_deployment),
        }
    }

    /// Cancels every timer of the current cycle and opens a new one.
    fn reset_cycle(&mut self) {
        self.cycle.cancel();
        self.cycle = CancellationToken::new();
    }

    fn spawn_countdown(&self, generation: u64) {
        let context = Arc::clone(&self.context);
        let events = self.events_tx.clone();
        let token = self.cycle.clone();
        let schedule = self.scheduler.countdown().schedule();
        debug!("Beginning countdown (generation {})", generation);

        self.context.spawn("countdown", async move {
            let mut elapsed = Duration::ZERO;
            for (offset, marker) in schedule {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = context.sleep(offset.saturating_sub(elapsed)) => {}
                }
                elapsed = offset;
                if events.send(SchedulerEvent::Tick { generation, marker }).is_err() {
                    return;
                }
            }
        });
    }

    fn spawn_resolution(
        &self,
        generation: u64,
        delay: Duration,
        last_deployment: Option<DeploymentId>,
    ) {
        let context = Arc::clone(&self.context);
        let fetcher = Arc::clone(&self.fetcher);
        let history = self.history.clone();
        let events = self.events_tx.clone();
        let token = self.cycle.clone();

        self.context.spawn("resolve-pending", async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = context.sleep(delay) => {}
                }
            }
            // Past this point the request runs to completion; the generation
            // decides whether its result is still wanted.
            let result = fetcher.resolve_pending(&history, last_deployment.as_ref()).await;
            let _ = events.send(SchedulerEvent::Resolved { generation, result });
        });
    }
}
