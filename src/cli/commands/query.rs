//! Query command - monitoring client for a running gateway.

use crate::cli::args::{ColorArg, QueryArgs, QueryOp, RouteArgs};
use crate::control::semaphore::SemaphoreColor;
use crate::gateway::api::GatewayRequest;
use crate::gateway::server::request;
use crate::grid::RouteSpec;
use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use std::time::Duration as StdDuration;

pub async fn run_query(args: QueryArgs) -> Result<()> {
    let request_body = build_request(args.op, Utc::now())?;
    let timeout = StdDuration::from_millis(args.timeout_ms);
    let response = request(&args.gateway, &request_body, timeout).await?;
    if args.compact {
        println!("{}", serde_json::to_string(&response)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    if response["status"] != "ok" {
        bail!("gateway rejected {}", request_body.name());
    }
    Ok(())
}

/// Translate a parsed subcommand into its wire request.
pub fn build_request(op: QueryOp, now: DateTime<Utc>) -> Result<GatewayRequest> {
    Ok(match op {
        QueryOp::Status { intersection } => GatewayRequest::IntersectionStatus { intersection },
        QueryOp::History {
            from,
            to,
            intersection,
        } => {
            let to = to.unwrap_or(now);
            GatewayRequest::CongestionHistory {
                from: from.unwrap_or(to - Duration::hours(1)),
                to,
                intersection,
            }
        }
        QueryOp::GreenWave {
            route,
            reason,
            requested_by,
        } => GatewayRequest::ForceGreenWave {
            route: route_spec(route)?,
            reason,
            requested_by,
        },
        QueryOp::Manual {
            intersection,
            color,
            requested_by,
        } => GatewayRequest::ManualSemaphoreChange {
            intersection,
            color: match color {
                ColorArg::Red => SemaphoreColor::Red,
                ColorArg::Green => SemaphoreColor::Green,
            },
            requested_by,
        },
        QueryOp::Summary => GatewayRequest::SystemSummary,
        QueryOp::Health => GatewayRequest::HealthCheck,
    })
}

fn route_spec(route: RouteArgs) -> Result<RouteSpec> {
    match (route.intersections.is_empty(), route.row, route.column) {
        (false, None, None) => Ok(RouteSpec::Intersections(route.intersections)),
        (true, Some(row), None) => Ok(RouteSpec::Row(row)),
        (true, None, Some(column)) => Ok(RouteSpec::Column(column)),
        _ => bail!("name the route with exactly one of --intersections, --row or --column"),
    }
}
