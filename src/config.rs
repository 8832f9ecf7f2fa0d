//! TOML configuration for the engraver core.
//!
//! Every field carries a serde default so a partial (or missing) file still
//! produces a runnable configuration. Range limits that the firmware relies
//! on (line buffer size, queue depths) are enforced by [`Config::validate`]
//! at load time rather than silently clamped.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} = {value} is out of range ({min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("unknown kinematics '{0}' (expected 'cartesian' or 'corexy')")]
    UnknownKinematics(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub machine: MachineConfig,

    #[serde(default)]
    pub stepper: StepperTimingConfig,

    #[serde(default)]
    pub arc: ArcConfig,

    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub serial: Option<SerialConfig>,
}

/// Line framer limits and normalization switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_line_max")]
    pub line_max: usize,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// How many bytes the transport feeds per call; bounds real-time latency.
    #[serde(default = "default_rx_chunk")]
    pub rx_chunk: usize,

    #[serde(default)]
    pub allow_dollar_commands: bool,

    #[serde(default = "default_true")]
    pub strip_paren_comments: bool,

    #[serde(default = "default_true")]
    pub strip_semicolon_comments: bool,

    #[serde(default = "default_true")]
    pub to_uppercase: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            line_max: default_line_max(),
            queue_depth: default_queue_depth(),
            rx_chunk: default_rx_chunk(),
            allow_dollar_commands: false,
            strip_paren_comments: true,
            strip_semicolon_comments: true,
            to_uppercase: true,
        }
    }
}

/// Machine geometry, rates and travel limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineConfig {
    #[serde(default = "default_kinematics")]
    pub kinematics: String,

    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: [f64; 3],

    /// Subdivide linear moves into segments no longer than this, if set.
    #[serde(default)]
    pub max_segment_len_mm: Option<f64>,

    /// Feed used for G00 rapids (mm/min).
    #[serde(default = "default_rapid_rate")]
    pub rapid_rate_mm_min: f64,

    /// Nominal acceleration handed to planner blocks (mm/s^2).
    #[serde(default = "default_accel")]
    pub accel_mm_s2: f64,

    #[serde(default = "default_planner_depth")]
    pub planner_queue_depth: usize,

    #[serde(default = "default_soft_limit_min_xy")]
    pub soft_limit_x_min: f64,
    #[serde(default = "default_soft_limit_max_xy")]
    pub soft_limit_x_max: f64,
    #[serde(default = "default_soft_limit_min_xy")]
    pub soft_limit_y_min: f64,
    #[serde(default = "default_soft_limit_max_xy")]
    pub soft_limit_y_max: f64,
    #[serde(default = "default_soft_limit_z_min")]
    pub soft_limit_z_min: f64,
    #[serde(default = "default_soft_limit_z_max")]
    pub soft_limit_z_max: f64,

    #[serde(default)]
    pub machine_name: Option<String>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            kinematics: default_kinematics(),
            steps_per_mm: default_steps_per_mm(),
            max_segment_len_mm: None,
            rapid_rate_mm_min: default_rapid_rate(),
            accel_mm_s2: default_accel(),
            planner_queue_depth: default_planner_depth(),
            soft_limit_x_min: default_soft_limit_min_xy(),
            soft_limit_x_max: default_soft_limit_max_xy(),
            soft_limit_y_min: default_soft_limit_min_xy(),
            soft_limit_y_max: default_soft_limit_max_xy(),
            soft_limit_z_min: default_soft_limit_z_min(),
            soft_limit_z_max: default_soft_limit_z_max(),
            machine_name: None,
        }
    }
}

/// Step pulse timing and idle power handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepperTimingConfig {
    #[serde(default = "default_step_pulse_us")]
    pub step_pulse_us: u32,

    #[serde(default = "default_dir_setup_us")]
    pub dir_setup_us: u32,

    #[serde(default = "default_true")]
    pub idle_disable: bool,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u32,
}

impl Default for StepperTimingConfig {
    fn default() -> Self {
        Self {
            step_pulse_us: default_step_pulse_us(),
            dir_setup_us: default_dir_setup_us(),
            idle_disable: true,
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

/// Arc expansion granularity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArcConfig {
    /// Target chord length; smaller values give smoother curves.
    #[serde(default = "default_arc_segment_len")]
    pub segment_len_mm: f64,

    /// Arcs with a smaller working radius are rejected as degenerate.
    #[serde(default = "default_arc_radius_min")]
    pub radius_min_mm: f64,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            segment_len_mm: default_arc_segment_len(),
            radius_min_mm: default_arc_radius_min(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub enabled: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enabled: false,
        }
    }
}

/// Optional serial transport; stdin/stdout is used when absent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_line_max() -> usize {
    96
}
fn default_queue_depth() -> usize {
    8
}
fn default_rx_chunk() -> usize {
    64
}
fn default_true() -> bool {
    true
}
fn default_kinematics() -> String {
    "cartesian".to_string()
}
fn default_steps_per_mm() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}
fn default_rapid_rate() -> f64 {
    1500.0
}
fn default_accel() -> f64 {
    500.0
}
fn default_planner_depth() -> usize {
    256
}
fn default_soft_limit_min_xy() -> f64 {
    0.0
}
fn default_soft_limit_max_xy() -> f64 {
    200.0
}
fn default_soft_limit_z_min() -> f64 {
    -50.0
}
fn default_soft_limit_z_max() -> f64 {
    0.0
}
fn default_step_pulse_us() -> u32 {
    10
}
fn default_dir_setup_us() -> u32 {
    5
}
fn default_idle_timeout_ms() -> u32 {
    30_000
}
fn default_arc_segment_len() -> f64 {
    0.5
}
fn default_arc_radius_min() -> f64 {
    0.001
}
fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_baud() -> u32 {
    115_200
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        range("protocol.line_max", self.protocol.line_max as i64, 32, 256)?;
        range("protocol.queue_depth", self.protocol.queue_depth as i64, 1, 32)?;
        range("protocol.rx_chunk", self.protocol.rx_chunk as i64, 1, 4096)?;
        range(
            "machine.planner_queue_depth",
            self.machine.planner_queue_depth as i64,
            1,
            65_536,
        )?;
        match self.machine.kinematics.as_str() {
            "cartesian" | "corexy" => {}
            other => return Err(ConfigError::UnknownKinematics(other.to_string())),
        }
        Ok(())
    }
}

fn range(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Load and validate a configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let config: Config = toml::from_str(&text)?;
    config.validate()?;
    tracing::info!("loaded configuration from {}", path.as_ref().display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protocol.line_max, 96);
        assert_eq!(config.protocol.queue_depth, 8);
        assert_eq!(config.arc.segment_len_mm, 0.5);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [machine]
            kinematics = "corexy"
            steps_per_mm = [80.0, 80.0, 400.0]
            "#,
        )
        .unwrap();
        assert_eq!(config.machine.kinematics, "corexy");
        assert_eq!(config.machine.steps_per_mm[2], 400.0);
        assert_eq!(config.protocol.line_max, 96);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_line_max() {
        let config: Config = toml::from_str("[protocol]\nline_max = 16\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "protocol.line_max",
                ..
            })
        ));
    }

    #[test]
    fn rejects_unknown_kinematics() {
        let config: Config = toml::from_str("[machine]\nkinematics = \"delta\"\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownKinematics(_))
        ));
    }
}
