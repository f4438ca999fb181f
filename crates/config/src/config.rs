//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Directory watching configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Root directory to watch recursively (defaults to the user's Videos folder)
    pub root: Option<PathBuf>,
    /// Extension of files to convert, without the leading dot
    #[serde(default = "default_source_extension")]
    pub source_extension: String,
    /// Extension of converted outputs, without the leading dot
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

fn default_source_extension() -> String {
    "jxr".to_string()
}

fn default_output_extension() -> String {
    "jpg".to_string()
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: None,
            source_extension: default_source_extension(),
            output_extension: default_output_extension(),
        }
    }
}

impl WatchConfig {
    /// The configured root, or the platform Videos folder when unset.
    pub fn resolved_root(&self) -> Option<PathBuf> {
        self.root.clone().or_else(dirs::video_dir)
    }
}

/// Busy gate configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusyGateConfig {
    /// CPU utilization (percent) above which the system counts as busy
    #[serde(default = "default_cpu_threshold_percent")]
    pub cpu_threshold_percent: f32,
    /// Length of the CPU sampling window in milliseconds
    #[serde(default = "default_sample_window_ms")]
    pub sample_window_ms: u64,
    /// Process names treated as exclusive foreground applications (games, presentations)
    #[serde(default)]
    pub exclusive_apps: Vec<String>,
}

fn default_cpu_threshold_percent() -> f32 {
    25.0
}

fn default_sample_window_ms() -> u64 {
    1000
}

impl Default for BusyGateConfig {
    fn default() -> Self {
        Self {
            cpu_threshold_percent: default_cpu_threshold_percent(),
            sample_window_ms: default_sample_window_ms(),
            exclusive_apps: Vec::new(),
        }
    }
}

/// Conversion worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// How long the worker waits on an empty queue before declaring idle
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// How long the worker parks after deferring an item because the system is busy
    #[serde(default = "default_busy_retry_secs")]
    pub busy_retry_secs: u64,
    /// Maximum exclusive-open probes before a locked file is skipped
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,
    /// Delay between exclusive-open probes
    #[serde(default = "default_readiness_delay_secs")]
    pub readiness_delay_secs: u64,
    /// JPEG quality (0-100) for the SDR output or the HDR base image
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_busy_retry_secs() -> u64 {
    30
}

fn default_readiness_attempts() -> u32 {
    5
}

fn default_readiness_delay_secs() -> u64 {
    2
}

fn default_jpeg_quality() -> u8 {
    95
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            busy_retry_secs: default_busy_retry_secs(),
            readiness_attempts: default_readiness_attempts(),
            readiness_delay_secs: default_readiness_delay_secs(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// HDR gain-map encoding configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HdrConfig {
    /// JPEG quality (0-100) of the gain map image
    #[serde(default = "default_gain_map_quality")]
    pub gain_map_quality: u8,
    /// Peak brightness of the target display in nits
    #[serde(default = "default_target_peak_nits")]
    pub target_peak_nits: f32,
    /// Luminance the source format assigns to linear 1.0
    #[serde(default = "default_source_white_nits")]
    pub source_white_nits: f32,
    /// Luminance the gain-map encoder assigns to linear 1.0
    #[serde(default = "default_reference_white_nits")]
    pub reference_white_nits: f32,
}

fn default_gain_map_quality() -> u8 {
    95
}

fn default_target_peak_nits() -> f32 {
    4000.0
}

fn default_source_white_nits() -> f32 {
    80.0
}

fn default_reference_white_nits() -> f32 {
    203.0
}

impl Default for HdrConfig {
    fn default() -> Self {
        Self {
            gain_map_quality: default_gain_map_quality(),
            target_peak_nits: default_target_peak_nits(),
            source_white_nits: default_source_white_nits(),
            reference_white_nits: default_reference_white_nits(),
        }
    }
}

/// Local control server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlConfig {
    /// Whether to start the control server
    #[serde(default = "default_control_enabled")]
    pub enabled: bool,
    /// Address the control server listens on
    #[serde(default = "default_control_listen")]
    pub listen: SocketAddr,
}

fn default_control_enabled() -> bool {
    true
}

fn default_control_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7879))
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_control_enabled(),
            listen: default_control_listen(),
        }
    }
}

/// Log file configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Path of the append-only log file (defaults to the local data dir)
    pub file: Option<PathBuf>,
    /// Number of trailing lines kept when the log is trimmed at startup
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

fn default_max_lines() -> usize {
    500
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: None,
            max_lines: default_max_lines(),
        }
    }
}

impl LogConfig {
    /// The configured log file, or `<data_local_dir>/jxr-cleaner/log.txt`.
    pub fn resolved_file(&self) -> PathBuf {
        self.file.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join("jxr-cleaner").join("log.txt"))
                .unwrap_or_else(|| PathBuf::from("jxr-cleaner.log"))
        })
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub busy_gate: BusyGateConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub hdr: HdrConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - JXR_WATCH_ROOT -> watch.root
    /// - JXR_CPU_THRESHOLD -> busy_gate.cpu_threshold_percent
    /// - JXR_JPEG_QUALITY -> worker.jpeg_quality
    /// - JXR_CONTROL_LISTEN -> control.listen
    /// - JXR_CONTROL_ENABLED -> control.enabled
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("JXR_WATCH_ROOT") {
            if !val.trim().is_empty() {
                self.watch.root = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("JXR_CPU_THRESHOLD") {
            if let Ok(threshold) = val.parse::<f32>() {
                self.busy_gate.cpu_threshold_percent = threshold;
            }
        }

        if let Ok(val) = env::var("JXR_JPEG_QUALITY") {
            if let Ok(quality) = val.parse::<u8>() {
                self.worker.jpeg_quality = quality;
            }
        }

        if let Ok(val) = env::var("JXR_CONTROL_LISTEN") {
            if let Ok(addr) = val.parse::<SocketAddr>() {
                self.control.listen = addr;
            }
        }

        if let Ok(val) = env::var("JXR_CONTROL_ENABLED") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.control.enabled = true,
                "false" | "0" | "no" => self.control.enabled = false,
                _ => {} // Invalid value, keep existing
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but falls back to defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
            other => other,
        }
    }
}
