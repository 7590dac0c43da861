//! Traffic record storage.
//!
//! - `records` - Record types written on every decision and command
//! - `store` - The `TrafficStore` trait and its query surface
//! - `memory` - In-process store
//! - `sqlite` - SQLite-backed store
//! - `remote` - Line-JSON client for a store hosted by another process
//! - `server` - Host side of the remote store and the heartbeat responder
//! - `coordinator` - Replica/primary dual writes

pub mod coordinator;
pub mod memory;
pub mod records;
pub mod remote;
pub mod server;
pub mod sqlite;
pub mod store;

pub use coordinator::*;
pub use memory::*;
pub use records::*;
pub use remote::*;
pub use server::*;
pub use sqlite::*;
pub use store::*;
