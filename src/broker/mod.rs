//! # Broker Connection Module
//!
//! Holds the current broker connection parameters and turns them into command
//! lines for the external mosquitto client binaries. The MQTT wire protocol
//! itself is never spoken here; subscribing and publishing are delegated to
//! `mosquitto_sub` / `mosquitto_pub` processes built from this state.
//!
//! ```text
//! broker/
//! ├── connection.rs - connection parameters, connect/disconnect lifecycle
//! └── command.rs    - argv construction for the external client binaries
//! ```
//!
//! Connection state is owned by the subscription manager and mutated only by an
//! explicit connect or disconnect; the command builder reads it and is otherwise
//! pure, so identical inputs always produce identical argv vectors.

pub mod command;
pub mod connection;

pub use command::{build_command, ClientRole};
pub use connection::{BrokerConnection, ConnectOptions};
