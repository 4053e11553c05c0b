//! # Process Runner Module
//!
//! Spawns the external client binaries and exposes their stdout as a stream of
//! complete lines plus a one-shot exit signal. One live OS process per
//! successful start; stopping is idempotent and kills the child.

pub mod runner;

pub use runner::{ProcessError, ProcessExit, ProcessRunner, RunningProcess};
