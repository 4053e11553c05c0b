//! # Subscription Module
//!
//! The lifecycle core: one external listening process per live subscription,
//! with its output routed into the topic's display surface and the aggregated
//! console. The manager runs as a single control task; every mutation of the
//! handle map and the sink registry happens there, so lines from one
//! subscription are always applied in the order the process produced them and
//! appends never race surface removal.
//!
//! ```text
//! subscription/
//! ├── error.rs   - error taxonomy for subscribe/publish/stop paths
//! ├── task.rs    - per-subscription state machine (Starting -> Running -> Stopping -> Stopped)
//! └── manager.rs - control loop, handle map, client handle
//! ```
//!
//! Subscriptions are keyed by the identity of their spawned process; two
//! subscribe calls for the same topic yield two independent processes.

pub mod error;
pub mod manager;
pub mod task;

pub use error::SubscriptionError;
pub use manager::{ManagerClient, ManagerHandle, StatusSnapshot};
pub use task::{SubscriptionEvent, SubscriptionId};
