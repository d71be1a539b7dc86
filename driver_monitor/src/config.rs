use std::{
    collections::HashSet,
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use utilities::stepper_driver::{ChipFamily, DriverSettings};

use crate::{axis::AxisId, monitor::MonitorSettings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration file: {source}")]
    ReadError { source: std::io::Error },

    #[error("Failed to parse configuration: {source}")]
    ParseError { source: toml::de::Error },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError { source: toml::ser::Error },

    #[error("Failed to write configuration file: {source}")]
    WriteError { source: std::io::Error },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Single-wire UART behind a serial-to-TCP adapter.
    Uart { ip: IpAddr, port: u16, address: u8 },
    /// SPI bus adapter; `chip_select` picks the driver on the bus.
    Spi {
        ip: IpAddr,
        port: u16,
        chip_select: u8,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct AxisConfig {
    pub axis: AxisId,
    pub chip: ChipFamily,
    pub transport: TransportConfig,
    pub rsense: f32,
    pub current_ma: u16,
    pub hold_multiplier: f32,
    pub microsteps: u16,
    #[serde(default)]
    pub stealthchop: bool,
    /// stealthChop to spreadCycle switch-over speed in mm/s.
    #[serde(default)]
    pub hybrid_threshold: Option<f32>,
    pub steps_per_mm: f32,
}

impl AxisConfig {
    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            rsense: self.rsense,
            current_ma: self.current_ma,
            hold_multiplier: self.hold_multiplier,
            microsteps: self.microsteps,
            stealthchop: self.stealthchop,
            hybrid_threshold: self.hybrid_threshold.map(|speed| {
                utilities::stepper_driver::current::speed_to_tpwmthrs(
                    speed,
                    self.microsteps,
                    self.steps_per_mm,
                )
            }),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub poll_interval_ms: u32,
    pub stop_on_error: bool,
    /// mA removed per poll under a sustained pre-warning; 0 disables.
    pub current_step_down: u16,
    pub report_current_change: bool,
    pub debug_dump_on_error: bool,
    /// 0 disables the watchdog.
    pub watchdog_timeout_ms: u64,
    pub tick_ms: u64,
    pub axes: Vec<AxisConfig>,
}

impl MonitorConfig {
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            stop_on_error: self.stop_on_error,
            current_step_down: self.current_step_down,
            report_current_change: self.report_current_change,
            debug_dump_on_error: self.debug_dump_on_error,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: String| Err(ConfigError::ValidationError { message });

        if self.poll_interval_ms == 0 {
            return fail("poll_interval_ms must be positive".to_string());
        }
        if self.tick_ms == 0 {
            return fail("tick_ms must be positive".to_string());
        }

        let mut seen = HashSet::new();
        for axis in &self.axes {
            if !seen.insert(axis.axis) {
                return fail(format!("Axis {} is configured twice", axis.axis));
            }

            let transport_fits = matches!(
                (axis.chip, &axis.transport),
                (ChipFamily::Tmc2208, TransportConfig::Uart { .. })
                    | (ChipFamily::Tmc2130, TransportConfig::Spi { .. })
                    | (ChipFamily::Tmc2660, TransportConfig::Spi { .. })
            );
            if !transport_fits {
                return fail(format!(
                    "Axis {}: {} cannot be reached over {}",
                    axis.axis,
                    axis.chip,
                    match axis.transport {
                        TransportConfig::Uart { .. } => "UART",
                        TransportConfig::Spi { .. } => "SPI",
                    }
                ));
            }

            if !(axis.rsense > 0.0) {
                return fail(format!("Axis {}: rsense must be positive", axis.axis));
            }
            if !axis.microsteps.is_power_of_two() || axis.microsteps > 256 {
                return fail(format!(
                    "Axis {}: {} microsteps is not a power of two up to 256",
                    axis.axis, axis.microsteps
                ));
            }
            if !(0.0..=1.0).contains(&axis.hold_multiplier) {
                return fail(format!(
                    "Axis {}: hold_multiplier must be within 0..=1",
                    axis.axis
                ));
            }
            if !(axis.steps_per_mm > 0.0) {
                return fail(format!("Axis {}: steps_per_mm must be positive", axis.axis));
            }
        }

        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let localhost: IpAddr = [127, 0, 0, 1].into();

        Self {
            poll_interval_ms: 500,
            stop_on_error: true,
            current_step_down: 50,
            report_current_change: true,
            debug_dump_on_error: false,
            watchdog_timeout_ms: 4000,
            tick_ms: 10,
            axes: vec![
                AxisConfig {
                    axis: AxisId::X,
                    chip: ChipFamily::Tmc2130,
                    transport: TransportConfig::Spi {
                        ip: localhost,
                        port: 50060,
                        chip_select: 0,
                    },
                    rsense: 0.11,
                    current_ma: 800,
                    hold_multiplier: 0.5,
                    microsteps: 16,
                    stealthchop: true,
                    hybrid_threshold: Some(100.0),
                    steps_per_mm: 80.0,
                },
                AxisConfig {
                    axis: AxisId::Y,
                    chip: ChipFamily::Tmc2130,
                    transport: TransportConfig::Spi {
                        ip: localhost,
                        port: 50060,
                        chip_select: 1,
                    },
                    rsense: 0.11,
                    current_ma: 800,
                    hold_multiplier: 0.5,
                    microsteps: 16,
                    stealthchop: true,
                    hybrid_threshold: Some(100.0),
                    steps_per_mm: 80.0,
                },
                AxisConfig {
                    axis: AxisId::Z,
                    chip: ChipFamily::Tmc2660,
                    transport: TransportConfig::Spi {
                        ip: localhost,
                        port: 50060,
                        chip_select: 2,
                    },
                    rsense: 0.11,
                    current_ma: 800,
                    hold_multiplier: 0.5,
                    microsteps: 16,
                    stealthchop: false,
                    hybrid_threshold: None,
                    steps_per_mm: 400.0,
                },
                AxisConfig {
                    axis: AxisId::E0,
                    chip: ChipFamily::Tmc2208,
                    transport: TransportConfig::Uart {
                        ip: localhost,
                        port: 50061,
                        address: 0,
                    },
                    rsense: 0.11,
                    current_ma: 800,
                    hold_multiplier: 0.5,
                    microsteps: 16,
                    stealthchop: false,
                    hybrid_threshold: None,
                    steps_per_mm: 93.0,
                },
            ],
        }
    }
}

#[derive(Debug)]
pub struct ConfigOptions {
    pub config_path: PathBuf,
    pub create_if_missing: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            create_if_missing: false,
        }
    }
}

impl ConfigOptions {
    pub fn default_config_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("default_config.toml"))
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            options: ConfigOptions::default(),
        }
    }

    pub fn with_options(options: ConfigOptions) -> Self {
        Self { options }
    }

    pub fn load(&self) -> anyhow::Result<MonitorConfig> {
        let config_path = &self.options.config_path;

        if !config_path.exists() {
            if self.options.create_if_missing {
                let default_config = MonitorConfig::default();
                self.save(&default_config)
                    .context("Failed to save default config")?;
                return Ok(default_config);
            }
            return Err(ConfigError::FileNotFound {
                path: config_path.clone(),
            }
            .into());
        }

        let content =
            fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError { source: e })?;

        let config: MonitorConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { source: e })?;

        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, config: &MonitorConfig) -> anyhow::Result<()> {
        let config_path = &self.options.config_path;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(config_path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

pub fn init_config() -> anyhow::Result<(ConfigManager, MonitorConfig)> {
    let manager = ConfigManager::new();
    let config = manager.load()?;
    Ok((manager, config))
}

pub fn create_default_config<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<()> {
    let config_path = path
        .map(|p| p.as_ref().to_path_buf())
        .unwrap_or_else(ConfigOptions::default_config_path);

    let manager = ConfigManager::with_options(ConfigOptions {
        config_path,
        create_if_missing: true,
    });
    manager.save(&MonitorConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("driver_monitor_{}_{}", std::process::id(), name))
            .join("config.toml")
    }

    #[test]
    fn default_config_is_valid_and_round_trips() {
        let path = temp_path("round_trip");
        let manager = ConfigManager::with_options(ConfigOptions::with_path(&path));

        manager.save(&MonitorConfig::default()).unwrap();
        let loaded = manager.load().unwrap();

        assert_eq!(loaded, MonitorConfig::default());
        assert_eq!(loaded.poll_interval_ms, 500);
        assert_eq!(loaded.current_step_down, 50);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_is_an_error_unless_created() {
        let path = temp_path("missing");
        let _ = fs::remove_dir_all(path.parent().unwrap());

        let err = ConfigManager::with_options(ConfigOptions::with_path(&path))
            .load()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::FileNotFound { .. })
        ));

        let created = ConfigManager::with_options(ConfigOptions {
            config_path: path.clone(),
            create_if_missing: true,
        })
        .load()
        .unwrap();
        assert_eq!(created, MonitorConfig::default());
        assert!(path.exists());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn parses_hand_written_axis() {
        let config: MonitorConfig = toml::from_str(
            r#"
            poll_interval_ms = 500
            stop_on_error = true
            current_step_down = 50
            report_current_change = true
            debug_dump_on_error = false
            watchdog_timeout_ms = 0
            tick_ms = 10

            [[axes]]
            axis = "E1"
            chip = "tmc2208"
            rsense = 0.11
            current_ma = 600
            hold_multiplier = 0.5
            microsteps = 16
            steps_per_mm = 93.0
            transport = { kind = "uart", ip = "10.0.0.5", port = 4001, address = 1 }
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        let axis = &config.axes[0];
        assert_eq!(axis.axis, AxisId::E1);
        assert_eq!(axis.chip, ChipFamily::Tmc2208);
        assert!(!axis.stealthchop);
        assert_eq!(axis.driver_settings().hybrid_threshold, None);
    }

    #[test]
    fn rejects_duplicate_axes() {
        let mut config = MonitorConfig::default();
        let first = config.axes[0].clone();
        config.axes.push(first);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn rejects_chip_on_wrong_bus() {
        let mut config = MonitorConfig::default();
        config.axes[0].chip = ChipFamily::Tmc2208;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_odd_microsteps_and_zero_rsense() {
        let mut config = MonitorConfig::default();
        config.axes[0].microsteps = 12;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.axes[0].rsense = 0.0;
        assert!(config.validate().is_err());
    }
}
