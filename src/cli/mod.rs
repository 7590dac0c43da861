//! Crossway CLI - unified command-line interface.
//!
//! Provides a single binary entry point for:
//! - `crossway start` - Start the control process
//! - `crossway store` - Host the primary store
//! - `crossway query` - Monitoring client for the gateway
//! - `crossway check-config` - Validate a configuration file

mod args;
pub mod commands;

pub use args::{
    CheckConfigArgs, Cli, ColorArg, Commands, QueryArgs, QueryOp, RouteArgs, StartArgs, StoreArgs,
};
