//! CLI command implementations.

mod config;
mod query;
mod start;
mod store;

pub use config::run_check_config;
pub use query::{build_request, run_query};
pub use start::run_start;
pub use store::run_store;
