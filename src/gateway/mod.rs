//! Query/command gateway.
//!
//! - `api` - Typed requests, replies and the error payload
//! - `service` - Dispatch to the controller and the authoritative store
//! - `server` - Serial line-JSON listener and a one-shot client

pub mod api;
pub mod server;
pub mod service;

pub use api::*;
pub use server::*;
pub use service::*;
