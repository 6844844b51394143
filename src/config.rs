//! Configuration System using Figment
//!
//! Strongly-typed configuration for the acquisition station. Configuration is
//! loaded from:
//! 1. `config/jv_daq.toml` (base configuration; every field has a default)
//! 2. Environment variables prefixed with `JV_DAQ_`, sections separated by `__`
//!
//! # Example
//! ```no_run
//! use jv_daq::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Holder: {}x{}", config.devices.rows, config.devices.cols);
//! # Ok::<(), jv_daq::error::DaqError>(())
//! ```
//!
//! Environment override example: `JV_DAQ_ACQUISITION__MAX_VOLTAGE=1.2`.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::acquisition::{AcquisitionParameters, SubstrateGrid, VisitOrder};
use crate::error::{AppResult, DaqError};
use crate::measurement::MeasurementSettings;
use crate::tracing_setup::{self, LogFormat};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/jv_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "JV_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Default acquisition parameters
    pub acquisition: AcquisitionParameters,
    /// Light source and instrument settings
    pub instruments: InstrumentConfig,
    /// Substrate holder geometry
    pub devices: DeviceLayoutConfig,
    /// Result persistence
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Console log format
    pub log_format: LogFormat,
    /// Log span open/close events
    pub log_span_events: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "jv-daq".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            log_span_events: false,
        }
    }
}

/// Light source and instrument configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Calibrated 1-sun irradiance
    pub irradiance: f64,
    /// Active area of one device, in units matching `irradiance`
    pub device_area: f64,
    /// Report photocurrent as positive
    pub invert_current: bool,
    /// VISA resource of the source-meter
    pub source_meter_id: String,
    /// VISA resource of the parameter analyzer (hardware sweeps)
    pub parameter_analyzer_id: String,
    /// VISA resource of the switch box; empty when none is fitted
    pub switch_box_id: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            irradiance: 3682.0,
            device_area: 0.00064516,
            invert_current: true,
            source_meter_id: "GPIB0::24::INSTR".to_string(),
            parameter_analyzer_id: "GPIB0::17::INSTR".to_string(),
            switch_box_id: String::new(),
        }
    }
}

/// Substrate holder geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceLayoutConfig {
    /// Substrate rows on the holder
    pub rows: u32,
    /// Substrate columns on the holder
    pub cols: u32,
    /// Devices on each substrate
    pub devices_per_substrate: u32,
    /// Cell visit order
    pub visit_order: VisitOrder,
}

impl Default for DeviceLayoutConfig {
    fn default() -> Self {
        Self {
            rows: 4,
            cols: 4,
            devices_per_substrate: 6,
            visit_order: VisitOrder::RowMajor,
        }
    }
}

/// Result persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Output directory for CSV files
    pub csv_dir: PathBuf,
    /// Write persisted results to CSV
    pub save_local_csv: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            csv_dir: PathBuf::from("./data"),
            save_local_csv: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/jv_daq.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `JV_DAQ_`.
    /// Example: `JV_DAQ_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self)
            .map_err(|e| DaqError::Storage(format!("serializing configuration: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        Ok(())
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        tracing_setup::parse_level(&self.application.log_level)?;

        let irradiance = self.instruments.irradiance;
        if !irradiance.is_finite() || irradiance < 0.0 {
            return Err(DaqError::Validation(format!(
                "Invalid irradiance {irradiance}. Must be a non-negative number"
            )));
        }
        let area = self.instruments.device_area;
        if !area.is_finite() || area <= 0.0 {
            return Err(DaqError::Validation(format!(
                "Invalid device_area {area}. Must be positive"
            )));
        }

        // Geometry checks live in the grid constructor.
        self.layout::<&str>(&[])?;

        if self.storage.save_local_csv && self.storage.csv_dir.as_os_str().is_empty() {
            return Err(DaqError::Validation(
                "csv_dir is empty but save_local_csv is set".to_string(),
            ));
        }

        // The label is supplied per run; check everything else.
        let mut acquisition = self.acquisition.clone();
        if acquisition.device_label.trim().is_empty() {
            acquisition.device_label = "unlabelled".to_string();
        }
        acquisition.validate()
    }

    /// Run parameters, with the device label overridden when given.
    pub fn acquisition_parameters(&self, label: Option<&str>) -> AcquisitionParameters {
        let mut parameters = self.acquisition.clone();
        if let Some(label) = label {
            parameters.device_label = label.to_string();
        }
        parameters
    }

    /// Input power and sign convention for the measurement primitives.
    pub fn measurement_settings(&self) -> MeasurementSettings {
        MeasurementSettings::new(
            self.instruments.irradiance,
            self.instruments.device_area,
            self.instruments.invert_current,
        )
    }

    /// Holder grid with `labels` assigned to cells in visit order.
    pub fn layout<S: AsRef<str>>(&self, labels: &[S]) -> AppResult<SubstrateGrid> {
        SubstrateGrid::new(
            self.devices.rows,
            self.devices.cols,
            self.devices.devices_per_substrate,
        )?
        .with_visit_order(self.devices.visit_order)
        .fill_in_order(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.step_voltage, 0.5);
        assert_eq!(config.acquisition.num_tracking_points, 5);
        assert_eq!(config.devices.rows, 4);
        assert!((config.measurement_settings().power_in - 3682.0 * 0.00064516).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_geometry_and_area() {
        let mut config = AppConfig::default();
        config.devices.cols = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.devices.rows = 70_000;
        config.devices.cols = 70_000;
        assert!(matches!(config.validate(), Err(DaqError::Validation(_))));

        let mut config = AppConfig::default();
        config.instruments.device_area = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.acquisition.start_voltage = 5.0;
        assert!(matches!(
            config.validate(),
            Err(DaqError::VoltageRange { .. })
        ));
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "jv.toml",
                r#"
                [acquisition]
                min_voltage = -0.2
                max_voltage = 1.1
                device_label = "batch-12"

                [devices]
                rows = 2
                cols = 3
                visit_order = "column_major"
                "#,
            )?;
            jail.set_env("JV_DAQ_ACQUISITION__MAX_VOLTAGE", "1.4");
            jail.set_env("JV_DAQ_APPLICATION__LOG_LEVEL", "debug");
            jail.set_env("JV_DAQ_APPLICATION__LOG_FORMAT", "json");

            let config = AppConfig::load_from("jv.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.acquisition.min_voltage, -0.2);
            assert_eq!(config.acquisition.max_voltage, 1.4);
            assert_eq!(config.acquisition.step_voltage, 0.5);
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.application.log_format, LogFormat::Json);
            assert_eq!(config.devices.visit_order, VisitOrder::ColumnMajor);
            assert_eq!(config.devices.devices_per_substrate, 6);
            assert_eq!(
                config.acquisition_parameters(None).device_label,
                "batch-12"
            );
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_| {
            let config = AppConfig::load_from("absent.toml").map_err(|e| e.to_string())?;
            assert_eq!(config, AppConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jv_daq.toml");
        let mut config = AppConfig::default();
        config.acquisition.gate_voltage = Some(0.3);
        config.acquisition.operator = "lab".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.acquisition.gate_voltage, Some(0.3));
        assert_eq!(loaded.acquisition.operator, "lab");
        assert_eq!(loaded.storage, config.storage);
    }

    #[test]
    fn test_layout_from_labels() {
        let config = AppConfig::default();
        let grid = config.layout(&["A", "B"]).unwrap();
        let cells = grid.active_cells();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].substrate, 13);
        assert_eq!(cells[1].substrate, 14);
        assert_eq!(
            config.acquisition_parameters(Some("A")).device_label,
            "A"
        );
    }
}
