use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const GATEWAY_BIND_DEFAULT: &str = "0.0.0.0:5562";
const RELAY_ADDR_DEFAULT: &str = "127.0.0.1:5560";
const PRIMARY_ADDR_DEFAULT: &str = "127.0.0.1:5570";
const PRIMARY_HEARTBEAT_DEFAULT: &str = "127.0.0.1:5571";

/// Longest accepted semaphore, override or probe interval: one day.
pub const MAX_TIMER_SEC: u64 = 86_400;
/// Longest accepted probe, request or sweep timeout in milliseconds.
pub const MAX_TIMEOUT_MS: u64 = MAX_TIMER_SEC * 1_000;

/// Top-level configuration for the crossway runtime.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub grid: GridConfig,
    /// Sensor-to-intersection mapping. Empty means one camera, loop and GPS per intersection.
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub rules: RuleConfig,
    #[serde(default)]
    pub timings: TimingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub store_server: StoreServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_rows")]
    pub rows: Vec<String>,
    #[serde(default = "default_columns")]
    pub columns: Vec<u32>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: default_rows(),
            columns: default_columns(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    #[serde(rename = "camara")]
    Camera,
    #[serde(rename = "espira_inductiva")]
    InductiveLoop,
    #[serde(rename = "gps")]
    Gps,
}

impl SensorKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            SensorKind::Camera => "camara",
            SensorKind::InductiveLoop => "espira_inductiva",
            SensorKind::Gps => "gps",
        }
    }

    fn id_prefix(self) -> &'static str {
        match self {
            SensorKind::Camera => "CAM",
            SensorKind::InductiveLoop => "ESP",
            SensorKind::Gps => "GPS",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub sensor_id: String,
    pub kind: SensorKind,
    pub intersection: String,
}

/// Rule thresholds for the Normal and Congestion tests.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "default_normal_q_max")]
    pub normal_q_max: u32,
    #[serde(default = "default_normal_vp_min")]
    pub normal_vp_min: f64,
    #[serde(default = "default_congestion_q_min")]
    pub congestion_q_min: u32,
    #[serde(default = "default_congestion_vp_max")]
    pub congestion_vp_max: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            normal_q_max: default_normal_q_max(),
            normal_vp_min: default_normal_vp_min(),
            congestion_q_min: default_congestion_q_min(),
            congestion_vp_max: default_congestion_vp_max(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_normal_cycle_sec")]
    pub normal_cycle_sec: u64,
    #[serde(default = "default_congestion_extension_sec")]
    pub congestion_extension_sec: u64,
    #[serde(default = "default_green_wave_duration_sec")]
    pub green_wave_duration_sec: u64,
    #[serde(default = "default_health_check_interval_sec")]
    pub health_check_interval_sec: u64,
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    #[serde(default = "default_health_check_max_retries")]
    pub health_check_max_retries: u32,
    /// Period of the semaphore/green-wave expiry sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl TimingConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_sec)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            normal_cycle_sec: default_normal_cycle_sec(),
            congestion_extension_sec: default_congestion_extension_sec(),
            green_wave_duration_sec: default_green_wave_duration_sec(),
            health_check_interval_sec: default_health_check_interval_sec(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            health_check_max_retries: default_health_check_max_retries(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Address of the relay's outbound feed. `None` disables the subscriber.
    #[serde(default = "default_relay_addr")]
    pub relay_addr: Option<String>,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
}

impl IngestConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms.max(1))
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            relay_addr: default_relay_addr(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            topics: default_topics(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    /// Client-side timeout used by `crossway query`.
    #[serde(default = "default_gateway_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            request_timeout_ms: default_gateway_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub replica: ReplicaStoreConfig,
    #[serde(default)]
    pub primary: PrimaryStoreConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaStoreConfig {
    #[serde(default = "default_replica_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_replica_path")]
    pub path: PathBuf,
}

impl Default for ReplicaStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_replica_backend(),
            path: default_replica_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrimaryStoreConfig {
    #[serde(default = "default_primary_addr")]
    pub addr: String,
    #[serde(default = "default_primary_heartbeat_addr")]
    pub heartbeat_addr: String,
    #[serde(default = "default_primary_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Bounded depth of the non-blocking primary write queue.
    #[serde(default = "default_primary_queue_depth")]
    pub queue_depth: usize,
}

impl PrimaryStoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for PrimaryStoreConfig {
    fn default() -> Self {
        Self {
            addr: default_primary_addr(),
            heartbeat_addr: default_primary_heartbeat_addr(),
            request_timeout_ms: default_primary_request_timeout_ms(),
            queue_depth: default_primary_queue_depth(),
        }
    }
}

/// Settings for `crossway store`, the process hosting the primary store.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreServerConfig {
    #[serde(default = "default_store_bind")]
    pub bind: String,
    #[serde(default = "default_store_heartbeat_bind")]
    pub heartbeat_bind: String,
    #[serde(default = "default_primary_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_primary_path")]
    pub path: PathBuf,
}

impl Default for StoreServerConfig {
    fn default() -> Self {
        Self {
            bind: default_store_bind(),
            heartbeat_bind: default_store_heartbeat_bind(),
            backend: default_primary_backend(),
            path: default_primary_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TelemetryConfig {
    pub log_level: Option<String>,
    pub metrics_bind: Option<String>,
}

impl Config {
    /// Load configuration from a path resolved via CROSSWAY_CONFIG or defaults to `config/crossway.toml`.
    pub fn load_from_env() -> Result<Self> {
        let path = env_config_path();
        let mut cfg = Self::load(&path)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Load configuration from a specific file (TOML or JSON based on extension).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let data = fs::read_to_string(path_ref)
            .with_context(|| format!("unable to read config {}", path_ref.display()))?;
        if is_json(path_ref) {
            Ok(serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON config {}", path_ref.display()))?)
        } else {
            Ok(toml::from_str(&data)
                .with_context(|| format!("invalid TOML config {}", path_ref.display()))?)
        }
    }

    /// All configured intersection ids, row-major (`INT-A1`, `INT-A2`, ...).
    pub fn intersection_ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.grid.rows.len() * self.grid.columns.len());
        for row in &self.grid.rows {
            for column in &self.grid.columns {
                ids.push(format!("INT-{row}{column}"));
            }
        }
        ids
    }

    /// Effective sensor mapping; synthesises the default layout when none is configured.
    pub fn sensor_map(&self) -> Vec<SensorConfig> {
        if !self.sensors.is_empty() {
            return self.sensors.clone();
        }
        let mut sensors = Vec::new();
        for id in self.intersection_ids() {
            let suffix = id.trim_start_matches("INT-").to_string();
            for kind in [SensorKind::Camera, SensorKind::InductiveLoop, SensorKind::Gps] {
                sensors.push(SensorConfig {
                    sensor_id: format!("{}-{}", kind.id_prefix(), suffix),
                    kind,
                    intersection: id.clone(),
                });
            }
        }
        sensors
    }

    /// Validate invariants that must hold for the whole process lifetime.
    pub fn validate(&self) -> Result<()> {
        if self.grid.rows.is_empty() || self.grid.columns.is_empty() {
            bail!("grid must have at least one row and one column");
        }
        let mut rows = HashSet::new();
        for row in &self.grid.rows {
            if row.is_empty() {
                bail!("grid row labels must be non-empty");
            }
            if !rows.insert(row) {
                bail!("duplicate grid row {row}");
            }
        }
        let mut columns = HashSet::new();
        for column in &self.grid.columns {
            if !columns.insert(column) {
                bail!("duplicate grid column {column}");
            }
        }
        let known: HashSet<String> = self.intersection_ids().into_iter().collect();
        let mut sensor_ids = HashSet::new();
        for sensor in &self.sensors {
            if !known.contains(&sensor.intersection) {
                bail!(
                    "sensor {} mapped to unconfigured intersection {}",
                    sensor.sensor_id,
                    sensor.intersection
                );
            }
            if !sensor_ids.insert(&sensor.sensor_id) {
                bail!("duplicate sensor id {}", sensor.sensor_id);
            }
        }
        let t = &self.timings;
        for (field, value) in [
            ("normal_cycle_sec", t.normal_cycle_sec),
            ("congestion_extension_sec", t.congestion_extension_sec),
            ("green_wave_duration_sec", t.green_wave_duration_sec),
            ("health_check_interval_sec", t.health_check_interval_sec),
        ] {
            check_range("timings", field, value, MAX_TIMER_SEC)?;
        }
        check_range("timings", "health_check_timeout_ms", t.health_check_timeout_ms, MAX_TIMEOUT_MS)?;
        check_range("timings", "sweep_interval_ms", t.sweep_interval_ms, MAX_TIMEOUT_MS)?;
        if t.health_check_max_retries == 0 {
            bail!("timings.health_check_max_retries must be > 0");
        }
        if self.storage.primary.queue_depth == 0 {
            bail!("storage.primary.queue_depth must be > 0");
        }
        check_range(
            "storage.primary",
            "request_timeout_ms",
            self.storage.primary.request_timeout_ms,
            MAX_TIMEOUT_MS,
        )?;
        if self.rules.normal_q_max > self.rules.congestion_q_min {
            bail!("rules.normal_q_max must not exceed rules.congestion_q_min");
        }
        if self.rules.normal_vp_min < self.rules.congestion_vp_max {
            bail!("rules.normal_vp_min must not be below rules.congestion_vp_max");
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("CROSSWAY_RELAY_ADDR") {
            self.ingest.relay_addr = if addr.is_empty() { None } else { Some(addr) };
        }
        if let Ok(addr) = std::env::var("CROSSWAY_PRIMARY_ADDR") {
            self.storage.primary.addr = addr;
        }
        if let Ok(addr) = std::env::var("CROSSWAY_PRIMARY_HEARTBEAT_ADDR") {
            self.storage.primary.heartbeat_addr = addr;
        }
        if let Ok(level) = std::env::var("CROSSWAY_LOG") {
            self.telemetry.log_level = Some(level);
        }
    }
}

fn check_range(section: &str, field: &str, value: u64, max: u64) -> Result<()> {
    if value == 0 {
        bail!("{section}.{field} must be > 0");
    }
    if value > max {
        bail!("{section}.{field} must be <= {max} (got {value})");
    }
    Ok(())
}

fn env_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CROSSWAY_CONFIG") {
        PathBuf::from(path)
    } else {
        PathBuf::from("config/crossway.toml")
    }
}

fn is_json(path: &Path) -> bool {
    matches!(path.extension().and_then(|s| s.to_str()), Some("json"))
}

fn default_rows() -> Vec<String> {
    ["A", "B", "C", "D"].iter().map(|r| r.to_string()).collect()
}

fn default_columns() -> Vec<u32> {
    vec![1, 2, 3, 4]
}

fn default_normal_q_max() -> u32 {
    5
}

fn default_normal_vp_min() -> f64 {
    35.0
}

fn default_congestion_q_min() -> u32 {
    10
}

fn default_congestion_vp_max() -> f64 {
    20.0
}

fn default_normal_cycle_sec() -> u64 {
    15
}

fn default_congestion_extension_sec() -> u64 {
    10
}

fn default_green_wave_duration_sec() -> u64 {
    30
}

fn default_health_check_interval_sec() -> u64 {
    5
}

fn default_health_check_timeout_ms() -> u64 {
    2_000
}

fn default_health_check_max_retries() -> u32 {
    3
}

fn default_sweep_interval_ms() -> u64 {
    500
}

fn default_relay_addr() -> Option<String> {
    Some(RELAY_ADDR_DEFAULT.to_string())
}

fn default_reconnect_backoff_ms() -> u64 {
    1_000
}

fn default_topics() -> Vec<String> {
    vec!["camara".into(), "espira".into(), "gps".into()]
}

fn default_gateway_bind() -> String {
    GATEWAY_BIND_DEFAULT.to_string()
}

fn default_gateway_request_timeout_ms() -> u64 {
    5_000
}

fn default_replica_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_replica_path() -> PathBuf {
    PathBuf::from("data/replica.db")
}

fn default_primary_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_primary_path() -> PathBuf {
    PathBuf::from("data/primary.db")
}

fn default_primary_addr() -> String {
    PRIMARY_ADDR_DEFAULT.to_string()
}

fn default_primary_heartbeat_addr() -> String {
    PRIMARY_HEARTBEAT_DEFAULT.to_string()
}

fn default_primary_request_timeout_ms() -> u64 {
    1_500
}

fn default_primary_queue_depth() -> usize {
    1_024
}

fn default_store_bind() -> String {
    "0.0.0.0:5570".to_string()
}

fn default_store_heartbeat_bind() -> String {
    "0.0.0.0:5571".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_describe_the_sixteen_cell_grid() {
        let cfg = Config::default();
        let ids = cfg.intersection_ids();
        assert_eq!(ids.len(), 16);
        assert_eq!(ids.first().map(String::as_str), Some("INT-A1"));
        assert_eq!(ids.last().map(String::as_str), Some("INT-D4"));
        assert_eq!(cfg.sensor_map().len(), 48);
        assert_eq!(cfg.timings.health_check_max_retries, 3);
        assert_eq!(cfg.timings.health_check_timeout_ms, 2_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_overrides_merge_with_defaults() {
        let doc = r#"
[grid]
rows = ["A", "B"]
columns = [1, 2]

[[sensors]]
sensor_id = "GPS-X"
kind = "gps"
intersection = "INT-B2"

[timings]
green_wave_duration_sec = 45

[storage.replica]
backend = "memory"
"#;
        let cfg: Config = toml::from_str(doc).unwrap();
        assert_eq!(cfg.intersection_ids().len(), 4);
        assert_eq!(cfg.timings.green_wave_duration_sec, 45);
        assert_eq!(cfg.timings.normal_cycle_sec, 15);
        assert_eq!(cfg.storage.replica.backend, StoreBackend::Memory);
        assert_eq!(cfg.sensor_map().len(), 1);
        assert_eq!(cfg.sensor_map()[0].kind, SensorKind::Gps);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn sensors_on_unknown_intersections_are_rejected() {
        let mut cfg = Config::default();
        cfg.sensors.push(SensorConfig {
            sensor_id: "CAM-Z9".into(),
            kind: SensorKind::Camera,
            intersection: "INT-Z9".into(),
        });
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:?}").contains("unconfigured intersection"));
    }

    #[test]
    fn zero_retries_are_rejected() {
        let mut cfg = Config::default();
        cfg.timings.health_check_max_retries = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let mut cfg = Config::default();
        cfg.timings.green_wave_duration_sec = u64::MAX;
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:?}").contains("green_wave_duration_sec"));

        let mut cfg = Config::default();
        cfg.timings.normal_cycle_sec = MAX_TIMER_SEC + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.timings.congestion_extension_sec = MAX_TIMER_SEC;
        assert!(cfg.validate().is_ok());

        let mut cfg = Config::default();
        cfg.storage.primary.request_timeout_ms = u64::MAX;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_config_is_detected_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crossway.json");
        fs::write(&path, r#"{"gateway": {"bind": "127.0.0.1:0"}}"#).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.gateway.bind, "127.0.0.1:0");
        assert_eq!(cfg.grid.rows.len(), 4);
    }
}
