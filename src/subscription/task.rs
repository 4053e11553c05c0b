//! Per-subscription lifecycle with compile-time state safety via statum.
//!
//! # State Machine
//!
//! ```text
//! Starting ──► Running ──► Stopping ──► Stopped
//!     │           │                        ▲
//!     │           └────────────────────────┘
//!     │                (natural exit)
//!     └──► (spawn failure, nothing recorded)
//! ```
//!
//! A task owns the spawned process exclusively. While Running it forwards each
//! stdout line to the manager's event channel; a cancelled token moves it to
//! Stopping, a closed stdout reports the exit and moves it straight to Stopped.

use std::fmt;

use statum::{machine, state};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::process::{ProcessExit, ProcessRunner, RunningProcess};
use crate::subscription::error::SubscriptionError;

/// Identity of a live subscription: the pid of its listening process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u32);

impl From<u32> for SubscriptionId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events a running subscription delivers to the control loop.
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// One complete line from the listening process, in production order.
    Line { id: SubscriptionId, text: String },
    /// The process ended on its own; informational, not a failure.
    Exited { id: SubscriptionId, exit: ProcessExit },
}

/// Outcome of the Running loop.
pub enum RunOutcome {
    /// The process exited naturally; exit already reported on the event channel.
    Finished(SubscriptionTask<Stopped>),
    /// A stop was requested; the child still needs reaping via `finish`.
    Cancelled(SubscriptionTask<Stopping>),
}

#[state]
#[derive(Debug, Clone)]
pub enum SubscriptionState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[machine]
pub struct SubscriptionTask<S: SubscriptionState> {
    topic: String,
    argv: Vec<String>,
    events: mpsc::Sender<SubscriptionEvent>,
    process: Option<RunningProcess>,
}

impl SubscriptionTask<Starting> {
    pub fn create(topic: String, argv: Vec<String>, events: mpsc::Sender<SubscriptionEvent>) -> Self {
        debug!("Creating subscription task for '{}'", topic);
        Self::new(topic, argv, events, None)
    }

    /// Spawns the listening process and transitions to Running.
    ///
    /// A spawn failure consumes the task without recording anything; the error
    /// goes back to the subscribe caller.
    pub fn start(mut self) -> Result<SubscriptionTask<Running>, SubscriptionError> {
        let process = ProcessRunner::start(&self.argv)?;
        info!(
            "Subscription to '{}' running as pid {}",
            self.topic, process.pid
        );
        self.process = Some(process);
        Ok(self.transition())
    }
}

impl SubscriptionTask<Running> {
    pub fn id(&self) -> SubscriptionId {
        self.process
            .as_ref()
            .map(|p| SubscriptionId(p.pid))
            .unwrap_or(SubscriptionId(0))
    }

    /// Token that requests a stop for this subscription. Cancelling is
    /// idempotent.
    pub fn cancel_token(&self) -> CancellationToken {
        self.process
            .as_ref()
            .map(|p| p.cancel_token())
            .unwrap_or_default()
    }

    /// Forwards stdout lines to the event channel until stop or process exit.
    pub async fn forward_lines(mut self) -> Result<RunOutcome, SubscriptionError> {
        let mut process = self
            .process
            .take()
            .ok_or_else(|| SubscriptionError::Task("subscription has no process".to_string()))?;
        let id = SubscriptionId(process.pid);
        let cancel = process.cancel_token();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Stop requested for subscription {}", id);
                    self.process = Some(process);
                    return Ok(RunOutcome::Cancelled(self.transition()));
                }
                line = process.lines.recv() => match line {
                    Some(text) => {
                        if self.events.send(SubscriptionEvent::Line { id, text }).await.is_err() {
                            warn!("Event channel closed, stopping subscription {}", id);
                            cancel.cancel();
                            self.process = Some(process);
                            return Ok(RunOutcome::Cancelled(self.transition()));
                        }
                    }
                    None => {
                        // A stop can race the stream teardown; it still counts
                        // as a stop, not a natural exit.
                        if cancel.is_cancelled() {
                            self.process = Some(process);
                            return Ok(RunOutcome::Cancelled(self.transition()));
                        }
                        break;
                    }
                }
            }
        }

        // Stdout closed: the process ended on its own. Report the exit after
        // the last line so sinks see everything in order.
        let exit = process.exit.await.unwrap_or(ProcessExit::Natural(None));
        info!("Subscription {} ('{}') ended: {:?}", id, self.topic, exit);
        if self
            .events
            .send(SubscriptionEvent::Exited { id, exit })
            .await
            .is_err()
        {
            debug!("Event channel closed before exit report of {}", id);
        }
        Ok(RunOutcome::Finished(self.transition()))
    }
}

impl SubscriptionTask<Stopping> {
    /// Reaps the cancelled child and completes the lifecycle.
    pub async fn finish(mut self) -> SubscriptionTask<Stopped> {
        if let Some(process) = self.process.take() {
            let id = SubscriptionId(process.pid);
            match process.exit.await {
                Ok(exit) => debug!("Subscription {} stopped ({:?})", id, exit),
                Err(_) => debug!("Subscription {} exit signal lost", id),
            }
        }
        info!("Subscription to '{}' fully stopped", self.topic);
        self.transition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn spawn_failure_reaches_the_caller() {
        let (tx, _rx) = mpsc::channel(8);
        let task = SubscriptionTask::create(
            "t".to_string(),
            vec!["mqttdeck-no-such-binary".to_string()],
            tx,
        );
        assert!(matches!(
            task.start(),
            Err(SubscriptionError::Process(_))
        ));
    }

    #[tokio::test]
    async fn lines_are_forwarded_in_order_then_exit_is_reported() {
        let (tx, mut rx) = mpsc::channel(8);
        let task = SubscriptionTask::create(
            "t".to_string(),
            sh("printf 'first\\nsecond\\n'; exit 7"),
            tx,
        );
        let running = task.start().unwrap();
        let id = running.id();

        let outcome = timeout(Duration::from_secs(5), running.forward_lines())
            .await
            .expect("task did not finish")
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(_)));

        match rx.recv().await.unwrap() {
            SubscriptionEvent::Line { id: got, text } => {
                assert_eq!(got, id);
                assert_eq!(text, "first");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            SubscriptionEvent::Line { text, .. } => assert_eq!(text, "second"),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            SubscriptionEvent::Exited { id: got, exit } => {
                assert_eq!(got, id);
                assert_eq!(exit, ProcessExit::Natural(Some(7)));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancellation_moves_through_stopping_to_stopped() {
        let (tx, mut rx) = mpsc::channel(8);
        let task = SubscriptionTask::create("t".to_string(), sh("sleep 30"), tx);
        let running = task.start().unwrap();
        let cancel = running.cancel_token();

        let join = tokio::spawn(running.forward_lines());
        cancel.cancel();

        let outcome = timeout(Duration::from_secs(5), join)
            .await
            .expect("task did not observe the stop")
            .unwrap()
            .unwrap();
        match outcome {
            RunOutcome::Cancelled(stopping) => {
                timeout(Duration::from_secs(5), stopping.finish())
                    .await
                    .expect("child was not reaped");
            }
            RunOutcome::Finished(_) => panic!("expected a cancelled outcome"),
        }
        // No exit event for caller-requested stops.
        assert!(rx.try_recv().is_err());
    }
}
