//! City grid topology.
//!
//! Intersections are the cells of a rows x columns grid named `INT-<row><column>`.
//! The set is fixed at startup; every lookup by name goes through [`Grid::resolve`]
//! so unknown names surface as [`GridError::UnknownIntersection`].

use crate::config::{Config, SensorConfig, SensorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Opaque intersection identifier (`INT-A1`..`INT-D4` in the default grid).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntersectionId(String);

impl IntersectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("unknown intersection {0}")]
    UnknownIntersection(String),
    #[error("unknown grid row {0}")]
    UnknownRow(String),
    #[error("unknown grid column {0}")]
    UnknownColumn(u32),
    #[error("route is empty")]
    EmptyRoute,
}

/// Target of a green wave: an explicit ordered route, a whole row or a whole column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSpec {
    Intersections(Vec<String>),
    Row(String),
    Column(u32),
}

impl RouteSpec {
    pub fn describe(&self) -> String {
        match self {
            RouteSpec::Intersections(ids) => ids.join(","),
            RouteSpec::Row(row) => format!("row {row}"),
            RouteSpec::Column(column) => format!("column {column}"),
        }
    }
}

#[derive(Debug, Clone)]
struct SensorBinding {
    kind: SensorKind,
    intersection: IntersectionId,
}

/// Immutable grid layout plus sensor bindings.
#[derive(Debug, Clone)]
pub struct Grid {
    rows: Vec<String>,
    columns: Vec<u32>,
    ids: Vec<IntersectionId>,
    sensors: HashMap<String, SensorBinding>,
}

impl Grid {
    pub fn from_config(config: &Config) -> Self {
        let ids: Vec<IntersectionId> = config
            .intersection_ids()
            .into_iter()
            .map(IntersectionId)
            .collect();
        let sensors = config
            .sensor_map()
            .into_iter()
            .map(|SensorConfig { sensor_id, kind, intersection }| {
                (
                    sensor_id,
                    SensorBinding {
                        kind,
                        intersection: IntersectionId(intersection),
                    },
                )
            })
            .collect();
        Self {
            rows: config.grid.rows.clone(),
            columns: config.grid.columns.clone(),
            ids,
            sensors,
        }
    }

    pub fn intersections(&self) -> &[IntersectionId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.iter().any(|id| id.0 == name)
    }

    /// Resolve a name into a configured id.
    pub fn resolve(&self, name: &str) -> Result<IntersectionId, GridError> {
        self.ids
            .iter()
            .find(|id| id.0 == name)
            .cloned()
            .ok_or_else(|| GridError::UnknownIntersection(name.to_string()))
    }

    /// Intersection a sensor is installed at, if the sensor is mapped.
    pub fn sensor_intersection(&self, sensor_id: &str) -> Option<&IntersectionId> {
        self.sensors.get(sensor_id).map(|b| &b.intersection)
    }

    pub fn sensor_kind(&self, sensor_id: &str) -> Option<SensorKind> {
        self.sensors.get(sensor_id).map(|b| b.kind)
    }

    /// Expand a route into configured ids. Fails as a whole if any member is unknown.
    pub fn expand_route(&self, route: &RouteSpec) -> Result<Vec<IntersectionId>, GridError> {
        let ids = match route {
            RouteSpec::Intersections(names) => names
                .iter()
                .map(|name| self.resolve(name))
                .collect::<Result<Vec<_>, _>>()?,
            RouteSpec::Row(row) => {
                if !self.rows.iter().any(|r| r == row) {
                    return Err(GridError::UnknownRow(row.clone()));
                }
                self.columns
                    .iter()
                    .map(|column| IntersectionId(format!("INT-{row}{column}")))
                    .collect()
            }
            RouteSpec::Column(column) => {
                if !self.columns.contains(column) {
                    return Err(GridError::UnknownColumn(*column));
                }
                self.rows
                    .iter()
                    .map(|row| IntersectionId(format!("INT-{row}{column}")))
                    .collect()
            }
        };
        if ids.is_empty() {
            return Err(GridError::EmptyRoute);
        }
        let mut deduped: Vec<IntersectionId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        Ok(deduped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        Grid::from_config(&Config::default())
    }

    #[test]
    fn resolves_configured_names_only() {
        let grid = grid();
        assert_eq!(grid.len(), 16);
        assert_eq!(grid.resolve("INT-C3").unwrap().as_str(), "INT-C3");
        assert_eq!(
            grid.resolve("INT-E1"),
            Err(GridError::UnknownIntersection("INT-E1".into()))
        );
    }

    #[test]
    fn rows_and_columns_expand_in_grid_order() {
        let grid = grid();
        let row: Vec<String> = grid
            .expand_route(&RouteSpec::Row("B".into()))
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(row, vec!["INT-B1", "INT-B2", "INT-B3", "INT-B4"]);
        let column: Vec<String> = grid
            .expand_route(&RouteSpec::Column(3))
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(column, vec!["INT-A3", "INT-B3", "INT-C3", "INT-D3"]);
    }

    #[test]
    fn one_unknown_member_rejects_the_whole_route() {
        let grid = grid();
        let route = RouteSpec::Intersections(vec!["INT-A1".into(), "INT-Q7".into()]);
        assert_eq!(
            grid.expand_route(&route),
            Err(GridError::UnknownIntersection("INT-Q7".into()))
        );
        assert_eq!(
            grid.expand_route(&RouteSpec::Intersections(vec![])),
            Err(GridError::EmptyRoute)
        );
        assert!(grid.expand_route(&RouteSpec::Row("Z".into())).is_err());
    }

    #[test]
    fn default_sensor_map_binds_gps_units() {
        let grid = grid();
        assert_eq!(grid.sensor_intersection("GPS-B2").unwrap().as_str(), "INT-B2");
        assert_eq!(grid.sensor_kind("ESP-D4"), Some(SensorKind::InductiveLoop));
        assert!(grid.sensor_intersection("GPS-Z1").is_none());
    }
}
