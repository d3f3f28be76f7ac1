//! Gateway configuration, loaded from YAML with environment substitution.
//!
//! `${VAR}` tokens anywhere in the file are replaced from the environment
//! before parsing; unset variables are left verbatim so validation can
//! report them meaningfully.

use serde::Deserialize;
use thiserror::Error;

use cl_canbus::poller::{MAX_INTERVAL_MS, MIN_INTERVAL_MS, PidScheduleEntry};
use cl_mqtt::MqttConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing or invalid configuration: {0}")]
    Invalid(String),
}

/// CAN ingestion settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CanConfig {
    /// CAN interface name, e.g. "can0".
    pub interface: String,
    /// Bus bitrate; recorded for the log, configured at the OS level.
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    /// Ingest buffer capacity in frames.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Utilisation fraction that triggers pressure warnings.
    #[serde(default = "default_warning_threshold")]
    pub buffer_warning_threshold: f64,
}

fn default_bitrate() -> u32 {
    500_000
}

fn default_buffer_size() -> usize {
    10_000
}

fn default_warning_threshold() -> f64 {
    0.8
}

/// Vehicle identity.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleConfig {
    /// 17-character VIN.
    pub vin: String,
    pub gateway_id: String,
}

/// One polled PID, as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct PidEntryConfig {
    /// Hex PID string, e.g. "0x0C".
    pub pid: String,
    pub name: String,
    #[serde(default = "default_pid_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_pid_interval() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// OBD-II polling settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Obd2Config {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub pids: Vec<PidEntryConfig>,
}

/// Local spool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "data/telemetry_spool.db".to_string()
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub can: CanConfig,
    pub vehicle: VehicleConfig,
    #[serde(default)]
    pub obd2: Obd2Config,
    #[serde(default)]
    pub buffer: BufferConfig,
    pub mqtt: MqttConfig,
}

impl GatewayConfig {
    /// Load, substitute environment variables, parse and validate.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config = Self::from_yaml(&raw)?;
        tracing::info!(path, "configuration loaded");
        Ok(config)
    }

    /// Parse from a YAML string (tests and `load`).
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(raw);
        let config: Self = serde_yaml::from_str(&substituted)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.can.interface.is_empty() {
            return Err(ConfigError::Invalid("can.interface is empty".into()));
        }
        if self.vehicle.vin.len() != 17 {
            return Err(ConfigError::Invalid(format!(
                "vehicle.vin must be exactly 17 characters, got {}",
                self.vehicle.vin.len()
            )));
        }
        if self.vehicle.gateway_id.is_empty() {
            return Err(ConfigError::Invalid("vehicle.gateway_id is empty".into()));
        }
        if self.mqtt.endpoint.is_empty() {
            return Err(ConfigError::Invalid("mqtt.endpoint is empty".into()));
        }
        if !(0.0..=1.0).contains(&self.can.buffer_warning_threshold) {
            return Err(ConfigError::Invalid(format!(
                "can.buffer_warning_threshold must be in [0, 1], got {}",
                self.can.buffer_warning_threshold
            )));
        }

        for entry in &self.obd2.pids {
            parse_pid(&entry.pid)?;
            if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&entry.interval_ms) {
                return Err(ConfigError::Invalid(format!(
                    "interval_ms for PID {} must be in [{MIN_INTERVAL_MS}, {MAX_INTERVAL_MS}], got {}",
                    entry.pid, entry.interval_ms
                )));
            }
        }
        Ok(())
    }

    /// Build the poller schedule from the validated PID list.
    pub fn schedule_entries(&self) -> Vec<PidScheduleEntry> {
        self.obd2
            .pids
            .iter()
            .filter_map(|entry| {
                let pid = parse_pid(&entry.pid).ok()?;
                Some(PidScheduleEntry::new(
                    pid,
                    entry.name.clone(),
                    entry.interval_ms,
                    entry.enabled,
                ))
            })
            .collect()
    }
}

fn parse_pid(text: &str) -> Result<u8, ConfigError> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16)
        .map_err(|_| ConfigError::Invalid(format!("unparsable PID hex string '{text}'")))
}

/// Replace `${VAR}` tokens with environment values; unset vars are kept.
fn substitute_env_vars(raw: &str) -> String {
    let pattern = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    pattern
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
