//! Device configuration loaded with Figment.
//!
//! The configuration file keeps the layout used by the run-control
//! deployments: every setting sits under `Device → Configuration`.
//!
//! ```yaml
//! Device:
//!   Configuration:
//!     Port: /dev/ttyUSB0
//!     Baudrate: 57600
//!     Source: V
//!     Measure: A
//!     TriggerCount: 10
//!     TriggerDelay: 0.0
//!     RangeSource: auto
//!     AutoRangeSource: ON
//!     ComplianceSource: 200
//!     RangeMeasure: auto
//!     AutoRangeMeasure: ON
//!     ComplianceMeasure: 0.0001
//!     SettlingTime: 0.5
//!     WaitRead: 0.1
//! ```
//!
//! YAML is the default format; a `.toml` extension selects TOML with the same
//! key layout (`[Device.Configuration]`).
//!
//! Loading never fails lazily: all keys are checked up front and every
//! missing key is reported in one error.

use crate::units::{mode_code, Function, Role};
use figment::{
    providers::{Format, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Number of readings the 2400-series trace buffer can hold.
pub const MAX_BUFFER_POINTS: u32 = 2500;

/// Response wait bound used when `ReadTimeout` is absent.
pub const DEFAULT_READ_TIMEOUT_S: f64 = 10.0;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration path does not name a file.
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),
    /// Figment could not read or parse the document.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Required keys absent under `Device.Configuration`.
    #[error("Missing configuration keys under Device.Configuration: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
    /// A key holds a value outside its allowed domain.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    /// The configuration could not be rendered as YAML.
    #[error("Configuration serialization error: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Range setting for the source or sense function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeSetting {
    /// Let the instrument pick the range.
    Auto,
    /// Fixed range in SI units.
    Fixed(f64),
}

impl Serialize for RangeSetting {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RangeSetting::Auto => serializer.serialize_str("auto"),
            RangeSetting::Fixed(value) => serializer.serialize_f64(*value),
        }
    }
}

/// Validated instrument configuration.
///
/// Read once before the controller exists and never changed afterwards.
/// The sign of `compliance_source` fixes the polarity accepted by
/// [`SmuController::set_voltage`](crate::instrument::SmuController::set_voltage).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SmuConfig {
    /// Serial device (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Serial baud rate
    #[serde(rename = "Baudrate")]
    pub baud_rate: u32,
    /// Source function
    pub source: Function,
    /// Sense function
    pub measure: Function,
    /// Readings per trigger; also sizes the trace buffer
    pub trigger_count: u32,
    /// Trigger delay in seconds
    pub trigger_delay: f64,
    /// Source range
    pub range_source: RangeSetting,
    /// Source autorange flag
    pub auto_range_source: bool,
    /// Source compliance; its sign fixes the allowed polarity
    pub compliance_source: f64,
    /// Sense range
    pub range_measure: RangeSetting,
    /// Sense autorange flag
    pub auto_range_measure: bool,
    /// Sense compliance
    pub compliance_measure: f64,
    /// Pause after each level change, seconds
    pub settling_time: f64,
    /// Pause between first response bytes and draining the buffer, seconds
    pub wait_read: f64,
    /// Upper bound on waiting for a response, seconds
    pub read_timeout: f64,
}

impl SmuConfig {
    /// Load configuration from a YAML or TOML file.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file does not exist, cannot be parsed,
    /// lacks required keys or holds invalid values.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Figment::new().merge(Toml::file(path)),
            _ => Figment::new().merge(Yaml::file(path)),
        };
        Self::from_figment(figment)
    }

    /// Parse configuration from an in-memory YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Figment::new().merge(Yaml::string(yaml)))
    }

    /// Extract and validate configuration from any Figment source.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let document: RawDocument = figment.extract()?;
        let raw = document
            .device
            .and_then(|device| device.configuration)
            .unwrap_or_default();

        let config = raw.into_config()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Checks:
    /// - Port is not empty and baud rate is non-zero
    /// - Trigger count fits the trace buffer
    /// - Times are finite and non-negative, read timeout positive
    /// - Limits and fixed ranges are finite, fixed ranges positive
    /// - A fixed range is given wherever autorange is off
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "'Port' cannot be empty".to_string(),
            ));
        }

        if self.baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "'Baudrate' must be > 0".to_string(),
            ));
        }

        if self.trigger_count == 0 || self.trigger_count > MAX_BUFFER_POINTS {
            return Err(ConfigError::ValidationError(format!(
                "Invalid TriggerCount {}. Must be 1-{}",
                self.trigger_count, MAX_BUFFER_POINTS
            )));
        }

        for (key, value) in [
            ("TriggerDelay", self.trigger_delay),
            ("SettlingTime", self.settling_time),
            ("WaitRead", self.wait_read),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid {} {}. Must be a non-negative number of seconds",
                    key, value
                )));
            }
        }

        if !self.read_timeout.is_finite() || self.read_timeout <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid ReadTimeout {}. Must be a positive number of seconds",
                self.read_timeout
            )));
        }

        for (key, value) in [
            ("ComplianceSource", self.compliance_source),
            ("ComplianceMeasure", self.compliance_measure),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid {} {}",
                    key, value
                )));
            }
        }

        check_range("RangeSource", self.range_source, self.auto_range_source)?;
        check_range("RangeMeasure", self.range_measure, self.auto_range_measure)?;

        Ok(())
    }

    /// Settling time after each level change.
    pub fn settling_time(&self) -> Duration {
        seconds(self.settling_time)
    }

    /// Drain delay once a response has started to arrive.
    pub fn wait_read(&self) -> Duration {
        seconds(self.wait_read)
    }

    /// Upper bound on waiting for a response.
    pub fn read_timeout(&self) -> Duration {
        seconds(self.read_timeout)
    }

    /// Render the configuration in the file layout it was loaded from.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        let document = DocumentRef {
            device: DeviceRef {
                configuration: self,
            },
        };
        Ok(serde_yaml::to_string(&document)?)
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn check_range(key: &str, range: RangeSetting, autorange: bool) -> Result<(), ConfigError> {
    match range {
        RangeSetting::Fixed(value) if !value.is_finite() || value <= 0.0 => {
            Err(ConfigError::ValidationError(format!(
                "Invalid {} {}. Must be a positive number or 'auto'",
                key, value
            )))
        }
        RangeSetting::Auto if !autorange => Err(ConfigError::ValidationError(format!(
            "{} must be a number when AutoRange{} is OFF",
            key,
            key.trim_start_matches("Range")
        ))),
        _ => Ok(()),
    }
}

// ============================================================================
// Serialization layout
// ============================================================================

#[derive(Serialize)]
struct DocumentRef<'a> {
    #[serde(rename = "Device")]
    device: DeviceRef<'a>,
}

#[derive(Serialize)]
struct DeviceRef<'a> {
    #[serde(rename = "Configuration")]
    configuration: &'a SmuConfig,
}

// ============================================================================
// Raw (unvalidated) layout
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(rename = "Device", alias = "device", default)]
    device: Option<RawDevice>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(rename = "Configuration", alias = "configuration", default)]
    configuration: Option<RawConfiguration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfiguration {
    port: Option<String>,
    #[serde(rename = "Baudrate")]
    baud_rate: Option<u32>,
    source: Option<String>,
    measure: Option<String>,
    trigger_count: Option<u32>,
    trigger_delay: Option<f64>,
    range_source: Option<RawRange>,
    auto_range_source: Option<RawSwitch>,
    compliance_source: Option<f64>,
    range_measure: Option<RawRange>,
    auto_range_measure: Option<RawSwitch>,
    compliance_measure: Option<f64>,
    settling_time: Option<f64>,
    wait_read: Option<f64>,
    read_timeout: Option<f64>,
}

/// Autorange flags appear as YAML booleans or as the SCPI words ON/OFF.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSwitch {
    Flag(bool),
    Word(String),
}

impl RawSwitch {
    fn resolve(self, key: &str) -> Result<bool, ConfigError> {
        match self {
            RawSwitch::Flag(flag) => Ok(flag),
            RawSwitch::Word(word) => match word.trim().to_ascii_uppercase().as_str() {
                "ON" | "TRUE" | "1" => Ok(true),
                "OFF" | "FALSE" | "0" => Ok(false),
                _ => Err(ConfigError::ValidationError(format!(
                    "Invalid {} '{}'. Must be ON or OFF",
                    key, word
                ))),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRange {
    Number(f64),
    Word(String),
}

impl RawRange {
    fn resolve(self, key: &str) -> Result<RangeSetting, ConfigError> {
        match self {
            RawRange::Number(value) => Ok(RangeSetting::Fixed(value)),
            RawRange::Word(word) if word.trim().eq_ignore_ascii_case("auto") => {
                Ok(RangeSetting::Auto)
            }
            RawRange::Word(word) => word
                .trim()
                .parse::<f64>()
                .map(RangeSetting::Fixed)
                .map_err(|_| {
                    ConfigError::ValidationError(format!(
                        "Invalid {} '{}'. Must be a number or 'auto'",
                        key, word
                    ))
                }),
        }
    }
}

impl RawConfiguration {
    fn missing_keys(&self) -> Vec<String> {
        [
            ("Port", self.port.is_some()),
            ("Baudrate", self.baud_rate.is_some()),
            ("Source", self.source.is_some()),
            ("Measure", self.measure.is_some()),
            ("TriggerCount", self.trigger_count.is_some()),
            ("TriggerDelay", self.trigger_delay.is_some()),
            ("RangeSource", self.range_source.is_some()),
            ("AutoRangeSource", self.auto_range_source.is_some()),
            ("ComplianceSource", self.compliance_source.is_some()),
            ("RangeMeasure", self.range_measure.is_some()),
            ("AutoRangeMeasure", self.auto_range_measure.is_some()),
            ("ComplianceMeasure", self.compliance_measure.is_some()),
            ("SettlingTime", self.settling_time.is_some()),
            ("WaitRead", self.wait_read.is_some()),
        ]
        .into_iter()
        .filter(|(_, present)| !present)
        .map(|(key, _)| key.to_string())
        .collect()
    }

    fn into_config(self) -> Result<SmuConfig, ConfigError> {
        let missing = self.missing_keys();
        let (
            Some(port),
            Some(baud_rate),
            Some(source),
            Some(measure),
            Some(trigger_count),
            Some(trigger_delay),
            Some(range_source),
            Some(auto_range_source),
            Some(compliance_source),
            Some(range_measure),
            Some(auto_range_measure),
            Some(compliance_measure),
            Some(settling_time),
            Some(wait_read),
        ) = (
            self.port,
            self.baud_rate,
            self.source,
            self.measure,
            self.trigger_count,
            self.trigger_delay,
            self.range_source,
            self.auto_range_source,
            self.compliance_source,
            self.range_measure,
            self.auto_range_measure,
            self.compliance_measure,
            self.settling_time,
            self.wait_read,
        )
        else {
            return Err(ConfigError::MissingKeys(missing));
        };

        let source = mode_code(Role::Source, source.trim())
            .map_err(|e| ConfigError::ValidationError(format!("Source: {}", e)))?;
        let measure = mode_code(Role::Measure, measure.trim())
            .map_err(|e| ConfigError::ValidationError(format!("Measure: {}", e)))?;

        Ok(SmuConfig {
            port,
            baud_rate,
            source,
            measure,
            trigger_count,
            trigger_delay,
            range_source: range_source.resolve("RangeSource")?,
            auto_range_source: auto_range_source.resolve("AutoRangeSource")?,
            compliance_source,
            range_measure: range_measure.resolve("RangeMeasure")?,
            auto_range_measure: auto_range_measure.resolve("AutoRangeMeasure")?,
            compliance_measure,
            settling_time,
            wait_read,
            read_timeout: self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT_S),
        })
    }
}
