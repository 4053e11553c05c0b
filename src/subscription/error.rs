use thiserror::Error;

use crate::process::ProcessError;
use crate::sink::SinkError;

/// Errors surfaced to callers of the subscription manager.
///
/// Only failures detected synchronously during a call end up here; a process
/// dying later is reported through a sink status line, never as an error.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Empty or missing topic, rejected before any process is spawned.
    #[error("Topic must not be empty")]
    TopicRequired,

    /// The external client binary could not be started.
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// A display surface could not be created.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Communication with the manager task failed.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Invalid internal task state.
    #[error("Task error: {0}")]
    Task(String),
}
