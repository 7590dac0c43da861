//! Operations and observability.
//!
//! - `telemetry` - Tracing setup and the HTTP health/metrics endpoint
//! - `metrics` - Process counters
//! - `audit` - Operator alert log

pub mod audit;
pub mod metrics;
pub mod telemetry;

pub use audit::*;
pub use metrics::*;
pub use telemetry::*;
