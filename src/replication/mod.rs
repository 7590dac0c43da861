//! Primary health and failover.
//!
//! - `failover` - Shared HEALTHY/FAILED flag
//! - `heartbeat` - Periodic probing that drives the flag

pub mod failover;
pub mod heartbeat;

pub use failover::*;
pub use heartbeat::*;
