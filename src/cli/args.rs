//! CLI argument definitions using clap.

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Crossway - traffic-grid decision engine with semaphore control and primary/replica failover.
#[derive(Parser)]
#[command(name = "crossway")]
#[command(version)]
#[command(about = "Crossway traffic control engine and operator tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the control process (ingest, decisions, gateway, failover)
    Start(StartArgs),

    /// Host the primary store and its heartbeat responder
    Store(StoreArgs),

    /// Send one request to a running gateway and print the response
    Query(QueryArgs),

    /// Load and validate a configuration file
    CheckConfig(CheckConfigArgs),
}

// -----------------------------------------------------------------------------
// Start / store / check-config
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct StartArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/crossway.toml")]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct StoreArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/primary.toml")]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct CheckConfigArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/crossway.toml")]
    pub config: PathBuf,
}

// -----------------------------------------------------------------------------
// Query command (monitoring client)
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct QueryArgs {
    /// Gateway address
    #[arg(long, default_value = "127.0.0.1:5562")]
    pub gateway: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub timeout_ms: u64,

    /// Print compact JSON instead of pretty-printed
    #[arg(long)]
    pub compact: bool,

    #[command(subcommand)]
    pub op: QueryOp,
}

#[derive(Subcommand)]
pub enum QueryOp {
    /// Current traffic state, semaphore and recent events of one intersection
    Status {
        /// Intersection id, e.g. INT-B2
        intersection: String,
    },

    /// Decision records in a time window
    History {
        /// Window start (RFC 3339); defaults to one hour before `--to`
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Window end (RFC 3339); defaults to now
        #[arg(long)]
        to: Option<DateTime<Utc>>,

        /// Restrict to one intersection
        #[arg(long)]
        intersection: Option<String>,
    },

    /// Force a green wave along a route
    GreenWave {
        #[command(flatten)]
        route: RouteArgs,

        #[arg(long)]
        reason: Option<String>,

        #[arg(long)]
        requested_by: Option<String>,
    },

    /// Hold one semaphore at a color
    Manual {
        intersection: String,

        #[arg(value_enum)]
        color: ColorArg,

        #[arg(long)]
        requested_by: Option<String>,
    },

    /// Totals, per-state counts and failover status
    Summary,

    /// Liveness and failover status
    Health,
}

/// Exactly one way of naming the green-wave route.
#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct RouteArgs {
    /// Comma-separated intersection ids
    #[arg(long, value_delimiter = ',')]
    pub intersections: Vec<String>,

    /// Grid row label
    #[arg(long)]
    pub row: Option<String>,

    /// Grid column number
    #[arg(long)]
    pub column: Option<u32>,
}

#[derive(ValueEnum, Clone, Copy)]
pub enum ColorArg {
    Red,
    Green,
}
