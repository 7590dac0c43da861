//! Traffic control.
//!
//! - `rules` - Normal/Congestion tests over possibly-unknown metrics
//! - `decision` - Per-intersection traffic state machine
//! - `semaphore` - Per-intersection light state machine
//! - `controller` - Serialises ingest, decisions and overrides per intersection

pub mod controller;
pub mod decision;
pub mod rules;
pub mod semaphore;

pub use controller::*;
pub use decision::*;
pub use rules::*;
pub use semaphore::*;
