//! Configuration file – reads/writes `~/.scanfuse/config.toml`.
//!
//! Every field has a default, so a partial file (or none at all) is valid.
//! `SCANFUSE_*` environment variables override individual fields after the
//! file is read.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scanfuse_hal::Obstacle;
use scanfuse_perception::SamplerConfig;
use scanfuse_runtime::LoopConfig;

/// Env var naming an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "SCANFUSE_CONFIG";

/// One reflector of the simulated room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimObstacle {
    /// Bearing, counter-clockwise positive, 0° straight ahead.
    pub angle_deg: f32,
    pub distance_mm: f32,
    #[serde(default = "default_obstacle_width")]
    pub width_deg: f32,
}

/// Persisted bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Rangefinder driver. Only `"sim"` is built in.
    #[serde(default = "default_device")]
    pub device: String,

    /// Address the profile channel is served on.
    #[serde(default = "default_profile_addr")]
    pub profile_addr: String,

    /// Address the objects channel is served on.
    #[serde(default = "default_objects_addr")]
    pub objects_addr: String,

    /// WebSocket URL of the detections producer.
    #[serde(default = "default_detections_url")]
    pub detections_url: String,

    /// Wait between detections reconnect attempts.
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,

    #[serde(default = "default_angle_resolution_deg")]
    pub angle_resolution_deg: f32,

    #[serde(default = "default_min_distance_mm")]
    pub min_distance_mm: f32,

    #[serde(default = "default_max_distance_mm")]
    pub max_distance_mm: f32,

    #[serde(default = "default_max_angle_diff_deg")]
    pub max_angle_diff_deg: f32,

    #[serde(default = "default_max_object_age_ms")]
    pub max_object_age_ms: u64,

    #[serde(default = "default_force_publish_ms")]
    pub force_publish_ms: u64,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,

    #[serde(default = "default_recovery_delay_ms")]
    pub recovery_delay_ms: u64,

    #[serde(default = "default_detection_poll_ms")]
    pub detection_poll_ms: u64,

    /// Whether the profile channel starts enabled (SIGUSR1 toggles it).
    #[serde(default = "default_publish_profile")]
    pub publish_profile: bool,

    #[serde(default = "default_status_every_cycles")]
    pub status_every_cycles: u64,

    /// Revolution time of the simulated device.
    #[serde(default = "default_sim_scan_period_ms")]
    pub sim_scan_period_ms: u64,

    #[serde(default = "default_sim_obstacles")]
    pub sim_obstacles: Vec<SimObstacle>,
}

fn default_device() -> String {
    "sim".to_string()
}
fn default_profile_addr() -> String {
    "0.0.0.0:5556".to_string()
}
fn default_objects_addr() -> String {
    "0.0.0.0:5557".to_string()
}
fn default_detections_url() -> String {
    "ws://localhost:5555".to_string()
}
fn default_reconnect_ms() -> u64 {
    1_000
}
fn default_angle_resolution_deg() -> f32 {
    1.0
}
fn default_min_distance_mm() -> f32 {
    100.0
}
fn default_max_distance_mm() -> f32 {
    3_000.0
}
fn default_max_angle_diff_deg() -> f32 {
    10.0
}
fn default_max_object_age_ms() -> u64 {
    500
}
fn default_force_publish_ms() -> u64 {
    1_000
}
fn default_max_consecutive_failures() -> usize {
    3
}
fn default_recovery_delay_ms() -> u64 {
    500
}
fn default_detection_poll_ms() -> u64 {
    1
}
fn default_publish_profile() -> bool {
    true
}
fn default_status_every_cycles() -> u64 {
    30
}
fn default_sim_scan_period_ms() -> u64 {
    100
}
fn default_obstacle_width() -> f32 {
    3.0
}
fn default_sim_obstacles() -> Vec<SimObstacle> {
    vec![
        SimObstacle {
            angle_deg: 0.0,
            distance_mm: 1_000.0,
            width_deg: 6.0,
        },
        SimObstacle {
            angle_deg: 35.0,
            distance_mm: 1_800.0,
            width_deg: 4.0,
        },
        SimObstacle {
            angle_deg: -60.0,
            distance_mm: 650.0,
            width_deg: 10.0,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: default_device(),
            profile_addr: default_profile_addr(),
            objects_addr: default_objects_addr(),
            detections_url: default_detections_url(),
            reconnect_ms: default_reconnect_ms(),
            angle_resolution_deg: default_angle_resolution_deg(),
            min_distance_mm: default_min_distance_mm(),
            max_distance_mm: default_max_distance_mm(),
            max_angle_diff_deg: default_max_angle_diff_deg(),
            max_object_age_ms: default_max_object_age_ms(),
            force_publish_ms: default_force_publish_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            recovery_delay_ms: default_recovery_delay_ms(),
            detection_poll_ms: default_detection_poll_ms(),
            publish_profile: default_publish_profile(),
            status_every_cycles: default_status_every_cycles(),
            sim_scan_period_ms: default_sim_scan_period_ms(),
            sim_obstacles: default_sim_obstacles(),
        }
    }
}

impl Config {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.angle_resolution_deg.is_finite() && self.angle_resolution_deg > 0.0) {
            return Err(format!(
                "angle_resolution_deg must be positive, got {}",
                self.angle_resolution_deg
            ));
        }
        if !(self.min_distance_mm >= 0.0 && self.min_distance_mm <= self.max_distance_mm) {
            return Err(format!(
                "distance window [{}, {}] is empty",
                self.min_distance_mm, self.max_distance_mm
            ));
        }
        if !(self.max_angle_diff_deg.is_finite() && self.max_angle_diff_deg >= 0.0) {
            return Err(format!(
                "max_angle_diff_deg must be non-negative, got {}",
                self.max_angle_diff_deg
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err("max_consecutive_failures must be at least 1".to_string());
        }
        self.profile_socket()?;
        self.objects_socket()?;
        if !(self.detections_url.starts_with("ws://") || self.detections_url.starts_with("wss://")) {
            return Err(format!(
                "detections_url must be a ws:// or wss:// URL, got {}",
                self.detections_url
            ));
        }
        Ok(())
    }

    pub fn profile_socket(&self) -> Result<SocketAddr, String> {
        parse_addr("profile_addr", &self.profile_addr)
    }

    pub fn objects_socket(&self) -> Result<SocketAddr, String> {
        parse_addr("objects_addr", &self.objects_addr)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            sampler: SamplerConfig::new(
                self.angle_resolution_deg,
                self.min_distance_mm,
                self.max_distance_mm,
            ),
            max_angle_diff_deg: self.max_angle_diff_deg,
            max_object_age_ms: self.max_object_age_ms,
            force_publish_ms: self.force_publish_ms,
            max_consecutive_failures: self.max_consecutive_failures,
            recovery_delay: Duration::from_millis(self.recovery_delay_ms),
            detection_poll: Duration::from_millis(self.detection_poll_ms),
            status_every_cycles: self.status_every_cycles,
        }
    }

    pub fn sim_room(&self) -> Vec<Obstacle> {
        self.sim_obstacles
            .iter()
            .map(|o| Obstacle::new(o.angle_deg, o.distance_mm).with_width(o.width_deg))
            .collect()
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, String> {
    value
        .parse()
        .map_err(|e| format!("{field} {value:?} is not a socket address: {e}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths
// ─────────────────────────────────────────────────────────────────────────────

/// Return the config path: `$SCANFUSE_CONFIG`, else
/// `~/.scanfuse/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(explicit);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".scanfuse").join("config.toml")
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// Load the config, writing the defaults to disk on first run.
///
/// Returns the config and whether the file was just created.
pub fn load_or_init() -> Result<(Config, bool), String> {
    let path = config_path();
    match load_from(&path)? {
        Some(cfg) => Ok((cfg, false)),
        None => {
            let mut cfg = Config::default();
            save_to(&cfg, &path)?;
            apply_env_overrides(&mut cfg);
            Ok((cfg, true))
        }
    }
}

/// Load the config from a specific path. Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `SCANFUSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SCANFUSE_DEVICE` | `device` |
/// | `SCANFUSE_PROFILE_ADDR` | `profile_addr` |
/// | `SCANFUSE_OBJECTS_ADDR` | `objects_addr` |
/// | `SCANFUSE_DETECTIONS_URL` | `detections_url` |
/// | `SCANFUSE_PUBLISH_PROFILE` | `publish_profile` |
/// | `SCANFUSE_MAX_ANGLE_DIFF_DEG` | `max_angle_diff_deg` |
/// | `SCANFUSE_MAX_OBJECT_AGE_MS` | `max_object_age_ms` |
/// | `SCANFUSE_FORCE_PUBLISH_MS` | `force_publish_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SCANFUSE_DEVICE") {
        cfg.device = v;
    }
    if let Some(v) = lookup("SCANFUSE_PROFILE_ADDR") {
        cfg.profile_addr = v;
    }
    if let Some(v) = lookup("SCANFUSE_OBJECTS_ADDR") {
        cfg.objects_addr = v;
    }
    if let Some(v) = lookup("SCANFUSE_DETECTIONS_URL") {
        cfg.detections_url = v;
    }
    if let Some(v) = lookup("SCANFUSE_PUBLISH_PROFILE")
        && let Ok(enabled) = v.parse::<bool>()
    {
        cfg.publish_profile = enabled;
    }
    if let Some(v) = lookup("SCANFUSE_MAX_ANGLE_DIFF_DEG")
        && let Ok(deg) = v.parse::<f32>()
    {
        cfg.max_angle_diff_deg = deg;
    }
    if let Some(v) = lookup("SCANFUSE_MAX_OBJECT_AGE_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.max_object_age_ms = ms;
    }
    if let Some(v) = lookup("SCANFUSE_FORCE_PUBLISH_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.force_publish_ms = ms;
    }
}

/// Save the config to a specific path, creating its directory if needed.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only file (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
