//! Caller-facing handle to a running rotation.

use crate::error::{Result, RotationError};
use crate::scheduler::DisplaySnapshot;
use spotlight_env::Observation;
use tokio::sync::{mpsc, oneshot, watch};

/// Requests forwarded to the scheduler task.
///
/// The sender is acknowledged once the request has been applied and the
/// resulting display state published.
#[derive(Debug)]
pub(crate) enum Control {
    Play(oneshot::Sender<()>),
    Pause(oneshot::Sender<()>),
}

/// Thin handle exposing play/pause and the display state.
///
/// Holds no scheduling logic; every request is forwarded to the scheduler
/// task created by [`RotationRuntime::spawn`](crate::RotationRuntime::spawn).
/// Clones share the same rotation.
#[derive(Debug, Clone)]
pub struct PlaybackController {
    control_tx: mpsc::Sender<Control>,
    display_rx: watch::Receiver<DisplaySnapshot>,
}

impl PlaybackController {
    pub(crate) fn new(
        control_tx: mpsc::Sender<Control>,
        display_rx: watch::Receiver<DisplaySnapshot>,
    ) -> Self {
        Self {
            control_tx,
            display_rx,
        }
    }

    /// Starts (or restarts) the rotation.
    ///
    /// Returns once the scheduler is resolving, so `playing()` is already
    /// true.
    pub async fn play(&self) -> Result<()> {
        self.request(Control::Play).await
    }

    /// Stops the countdown. Calling it repeatedly has no further effect.
    ///
    /// Returns once the cycle's timers are cancelled and the cleared
    /// countdown is visible through `display()`.
    pub async fn pause(&self) -> Result<()> {
        self.request(Control::Pause).await
    }

    /// True while an observation is being resolved or the countdown runs.
    pub fn playing(&self) -> bool {
        self.display_rx.borrow().playing
    }

    /// Message describing the most recent fetch error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.display_rx.borrow().error_message.clone()
    }

    /// The observation currently presented.
    pub fn current(&self) -> Option<Observation> {
        self.display_rx.borrow().current.clone()
    }

    /// Full display state.
    pub fn display(&self) -> DisplaySnapshot {
        self.display_rx.borrow().clone()
    }

    /// Receiver notified after every scheduler event.
    pub fn subscribe(&self) -> watch::Receiver<DisplaySnapshot> {
        self.display_rx.clone()
    }

    async fn request(&self, control: fn(oneshot::Sender<()>) -> Control) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control_tx
            .send(control(ack_tx))
            .await
            .map_err(|_| RotationError::SchedulerStopped)?;
        ack_rx.await.map_err(|_| RotationError::SchedulerStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_controller_forwards_requests() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_display_tx, display_rx) = watch::channel(DisplaySnapshot::default());
        let controller = PlaybackController::new(tx, display_rx);

        let scheduler = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(control) = rx.recv().await {
                let ack = match control {
                    Control::Play(ack) => {
                        seen.push("play");
                        ack
                    }
                    Control::Pause(ack) => {
                        seen.push("pause");
                        ack
                    }
                };
                let _ = ack.send(());
            }
            seen
        });

        controller.play().await.unwrap();
        controller.pause().await.unwrap();
        drop(controller);

        assert_eq!(scheduler.await.unwrap(), vec!["play", "pause"]);
    }

    #[tokio::test]
    async fn test_controller_waits_for_acknowledgement() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_display_tx, display_rx) = watch::channel(DisplaySnapshot::default());
        let controller = PlaybackController::new(tx, display_rx);

        // Request accepted but dropped before being applied
        tokio::spawn(async move {
            let _ = rx.recv().await;
        });

        assert_eq!(controller.pause().await, Err(RotationError::SchedulerStopped));
    }

    #[tokio::test]
    async fn test_controller_reports_stopped_scheduler() {
        let (tx, rx) = mpsc::channel(4);
        let (_display_tx, display_rx) = watch::channel(DisplaySnapshot::default());
        let controller = PlaybackController::new(tx, display_rx);
        drop(rx);

        assert_eq!(controller.play().await, Err(RotationError::SchedulerStopped));
    }

    #[test]
    fn test_controller_reads_display() {
        let (tx, _rx) = mpsc::channel(4);
        let (display_tx, display_rx) = watch::channel(DisplaySnapshot::default());
        let controller = PlaybackController::new(tx, display_rx);
        assert!(!controller.playing());

        display_tx.send_replace(DisplaySnapshot {
            playing: true,
            error_message: Some("Failed to retrieve an observation".to_string()),
            ..Default::default()
        });

        assert!(controller.playing());
        assert_eq!(
            controller.last_error().as_deref(),
            Some("Failed to retrieve an observation")
        );
    }
}
