//! Networking helpers shared by the store, heartbeat, gateway and relay links.
//!
//! - `framing` - Newline-delimited JSON frames
//! - `listener` - Bind and accept loop with cooperative shutdown

pub mod framing;
pub mod listener;

pub use framing::*;
pub use listener::*;
