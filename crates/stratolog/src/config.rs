//! Configuration management for stratolog.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults. The
//! loaded [`Config`] is passed explicitly to every component; nothing reads
//! configuration from global state.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reading::SourceKind;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory name under the user config dir.
const APP_DIR_NAME: &str = "stratolog";

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "STRATOLOG_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `STRATOLOG_`, sections split on `__`)
/// 2. TOML config file at `~/.config/stratolog/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mission-wide paths.
    pub mission: MissionConfig,
    /// Process supervision.
    pub supervisor: SupervisorConfig,
    /// Per-source sensor settings.
    pub sensors: SensorsConfig,
    /// Summary generation.
    pub summary: SummaryConfig,
}

/// Mission-wide paths.
///
/// Relative file paths elsewhere in the configuration are resolved against
/// `data_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    /// Directory holding logs, backups and the live state.
    pub data_dir: PathBuf,
    /// The shared live-state document.
    pub live_state_file: PathBuf,
    /// Where summary artifacts are published.
    pub charts_dir: PathBuf,
}

/// What happens to the stdout/stderr of launched units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerOutput {
    /// Discard it.
    #[default]
    Null,
    /// Share the supervisor's terminal.
    Inherit,
}

/// An additional unit launched after the sensor workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Operator-facing name.
    pub name: String,
    /// Program to execute.
    pub program: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Liveness poll period in milliseconds.
    pub poll_interval_ms: u64,
    /// Settling delay between launches in milliseconds.
    pub launch_delay_ms: u64,
    /// How long shutdown waits for units to exit, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Output handling for launched units.
    pub worker_output: WorkerOutput,
    /// Units launched after the sensor workers (for example a dashboard).
    pub extra_units: Vec<UnitConfig>,
}

/// How a sensor is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Synthetic values, no hardware needed.
    #[default]
    Simulated,
    /// Run a helper program per acquisition.
    Command,
}

/// Settings for one sensor worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Whether the supervisor launches this worker.
    pub enabled: bool,
    /// Sampling period in milliseconds.
    pub interval_ms: u64,
    /// How the instrument is read.
    pub backend: Backend,
    /// Helper argv for the command backend.
    pub command: Vec<String>,
    /// Per-attempt read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Extra read attempts per tick after a fault.
    pub read_retries: u32,
    /// Consecutive failed ticks before the worker reports itself degraded.
    pub degraded_threshold: u32,
    /// The append-only log.
    pub log_file: PathBuf,
    /// The before-write backup of the log.
    pub backup_file: Option<PathBuf>,
    /// Sync each record to the device before continuing.
    pub fsync: bool,
}

/// Per-source sensor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    /// DHT11 temperature/humidity.
    pub humidity_temperature: SensorConfig,
    /// MPU-6050 motion.
    pub motion: SensorConfig,
    /// KY-038 sound and buzzer.
    pub acoustic: SensorConfig,
}

/// Summary generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Records kept from the end of the log.
    pub max_points: usize,
    /// Moving-average window.
    pub smoothing_window: usize,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            live_state_file: PathBuf::from("live.json"),
            charts_dir: PathBuf::from("charts"),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            launch_delay_ms: 500,
            shutdown_grace_ms: 3000,
            worker_output: WorkerOutput::Null,
            extra_units: Vec::new(),
        }
    }
}

impl SensorConfig {
    /// Default settings for `kind`.
    #[must_use]
    pub fn defaults_for(kind: SourceKind) -> Self {
        let (interval_ms, log_file, backup_file) = match kind {
            SourceKind::HumidityTemperature => (10_000, "DHT11.txt", "DHT11_backup.txt"),
            SourceKind::Motion => (500, "MPU6050.txt", "MPU6050_backup.txt"),
            SourceKind::Acoustic => (1000, "sound.txt", "sound_backup.txt"),
        };
        Self {
            enabled: true,
            interval_ms,
            backend: Backend::Simulated,
            command: Vec::new(),
            read_timeout_ms: 2000,
            read_retries: 3,
            degraded_threshold: 3,
            log_file: PathBuf::from(log_file),
            backup_file: Some(PathBuf::from(backup_file)),
            fsync: true,
        }
    }

    /// Sampling period.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Per-attempt read timeout.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            humidity_temperature: SensorConfig::defaults_for(SourceKind::HumidityTemperature),
            motion: SensorConfig::defaults_for(SourceKind::Motion),
            acoustic: SensorConfig::defaults_for(SourceKind::Acoustic),
        }
    }
}

impl SensorsConfig {
    /// Settings for `kind`.
    #[must_use]
    pub fn get(&self, kind: SourceKind) -> &SensorConfig {
        match kind {
            SourceKind::HumidityTemperature => &self.humidity_temperature,
            SourceKind::Motion => &self.motion,
            SourceKind::Acoustic => &self.acoustic,
        }
    }

}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_points: 120,
            smoothing_window: 5,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing config file is not an error; defaults and environment
    /// variables still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::ConfigValidation { message });

        if self.supervisor.poll_interval_ms == 0 {
            return invalid("supervisor.poll_interval_ms must be greater than 0".to_string());
        }
        if self.summary.max_points == 0 {
            return invalid("summary.max_points must be at least 1".to_string());
        }
        if self.summary.smoothing_window == 0 {
            return invalid("summary.smoothing_window must be greater than 0".to_string());
        }

        let mut seen = HashSet::new();
        for kind in SourceKind::ALL {
            let sensor = self.sensor(kind);
            let section = kind.as_str().replace('-', "_");
            if sensor.interval_ms == 0 {
                return invalid(format!(
                    "sensors.{section}.interval_ms must be greater than 0"
                ));
            }
            if sensor.degraded_threshold == 0 {
                return invalid(format!(
                    "sensors.{section}.degraded_threshold must be greater than 0"
                ));
            }
            if sensor.backend == Backend::Command && sensor.command.is_empty() {
                return invalid(format!(
                    "sensors.{section}.command is required for the command backend"
                ));
            }
            let paths = std::iter::once(self.log_path(kind)).chain(self.backup_path(kind));
            for path in paths {
                if !seen.insert(path.clone()) {
                    return invalid(format!(
                        "sensors.{section} reuses file {}",
                        path.display()
                    ));
                }
            }
        }

        for unit in &self.supervisor.extra_units {
            if unit.name.is_empty() || unit.program.is_empty() {
                return invalid(
                    "supervisor.extra_units entries need a name and a program".to_string(),
                );
            }
        }

        Ok(())
    }

    /// Settings for one source.
    #[must_use]
    pub fn sensor(&self, kind: SourceKind) -> &SensorConfig {
        self.sensors.get(kind)
    }

    /// Sources whose workers the supervisor launches, in launch order.
    #[must_use]
    pub fn enabled_sources(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|kind| self.sensor(*kind).enabled)
            .collect()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.mission.data_dir.join(path)
        }
    }

    /// Path of the append-only log for `kind`.
    #[must_use]
    pub fn log_path(&self, kind: SourceKind) -> PathBuf {
        self.resolve(&self.sensor(kind).log_file)
    }

    /// Path of the backup log for `kind`, if configured.
    #[must_use]
    pub fn backup_path(&self, kind: SourceKind) -> Option<PathBuf> {
        self.sensor(kind)
            .backup_file
            .as_deref()
            .map(|path| self.resolve(path))
    }

    /// Path of the shared live-state document.
    #[must_use]
    pub fn live_state_path(&self) -> PathBuf {
        self.resolve(&self.mission.live_state_file)
    }

    /// Directory summary artifacts are published to.
    #[must_use]
    pub fn charts_dir(&self) -> PathBuf {
        self.resolve(&self.mission.charts_dir)
    }

    /// Default summary artifact path for `kind`.
    #[must_use]
    pub fn summary_path(&self, kind: SourceKind) -> PathBuf {
        self.charts_dir().join(format!("{kind}_summary.json"))
    }

    /// Get the liveness poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor.poll_interval_ms)
    }

    /// Get the launch settling delay as a Duration.
    #[must_use]
    pub fn launch_delay(&self) -> Duration {
        Duration::from_millis(self.supervisor.launch_delay_ms)
    }

    /// Get the shutdown grace period as a Duration.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.supervisor.shutdown_grace_ms)
    }
}
