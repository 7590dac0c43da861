//! Check-config command.

use crate::cli::args::CheckConfigArgs;
use crate::config::Config;
use anyhow::Result;
use serde_json::json;

pub fn run_check_config(args: CheckConfigArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    config.validate()?;
    let summary = json!({
        "config": args.config.display().to_string(),
        "intersections": config.intersection_ids().len(),
        "sensors": config.sensor_map().len(),
        "gateway": config.gateway.bind,
        "relay": config.ingest.relay_addr,
        "primary": config.storage.primary.addr,
        "primary_heartbeat": config.storage.primary.heartbeat_addr,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
