//! Sensor ingestion.
//!
//! - `event` - Wire payloads and the typed `SensorReading`
//! - `normalizer` - Latest-value snapshots per intersection
//! - `subscriber` - Relay feed client

pub mod event;
pub mod normalizer;
pub mod subscriber;

pub use event::*;
pub use normalizer::*;
pub use subscriber::*;
