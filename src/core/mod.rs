//! Core runtime infrastructure.
//!
//! This module contains the components every crossway process shares:
//! - `config` - Configuration parsing and validation
//! - `runtime` - Wiring and shutdown of the control process
//! - `time` - Wall and manual clocks

pub mod config;
pub mod runtime;
pub mod time;

pub use config::*;
pub use runtime::*;
pub use time::*;
