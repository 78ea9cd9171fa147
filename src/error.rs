//! Custom error types for the SMU driver.
//!
//! `SmuError` is the single error type returned by the library. It is built
//! with `thiserror` so every layer (transport, configuration, controller,
//! ramp, lifecycle adapter) can propagate with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: the serial port could not be opened. Fatal, never
//!   retried.
//! - **`Configuration` / `Setup`**: a missing or invalid configuration key, or
//!   a failed setup command while bringing the instrument to its configured
//!   state. Fatal at construction.
//! - **`ComplianceViolation` / `OutOfBounds`**: a requested source value was
//!   rejected before anything was sent. Correctable by the caller.
//! - **`RampFailed`**: a ramp step was rejected; the source has already been
//!   commanded to zero when this is returned.
//! - **`MalformedResponse` / `Timeout`**: a read failed. Not retried, since
//!   re-reading a mis-synchronised buffer makes things worse.
//! - **`UnknownUnit` / `UnknownMode`**: a lookup in the unit tables failed.

use crate::config::ConfigError;
use crate::units::{Quantity, Role};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type SmuResult<T> = std::result::Result<T, SmuError>;

/// Errors produced while driving the source-measure unit.
#[derive(Error, Debug)]
pub enum SmuError {
    /// The serial port could not be opened.
    #[error("Connection error: cannot open serial port '{port}': {reason}")]
    Connection {
        /// Port identifier from the configuration.
        port: String,
        /// Message reported by the serial backend.
        reason: String,
    },

    /// The configuration source is missing keys or holds invalid values.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A command of the setup sequence could not be delivered.
    #[error("Configuration error: instrument setup failed at '{command}'")]
    Setup {
        /// The setup command that failed.
        command: String,
        /// Underlying transport failure.
        #[source]
        source: Box<SmuError>,
    },

    /// A raw source value lies beyond the source compliance limit.
    #[error("Source value {value} exceeds compliance limit {limit}")]
    ComplianceViolation {
        /// Rejected value, as given by the caller.
        value: f64,
        /// Configured source compliance.
        limit: f64,
    },

    /// A voltage has the wrong polarity or reaches the compliance limit.
    #[error("Parameter out of bounds: {value} V is outside the range allowed by compliance {compliance} V")]
    OutOfBounds {
        /// Rejected value in volts.
        value: f64,
        /// Configured source compliance.
        compliance: f64,
    },

    /// A ramp was aborted; the source was set to zero first.
    #[error("Voltage ramp to {target} failed, source set to 0")]
    RampFailed {
        /// Ramp target in the caller's unit.
        target: f64,
        /// The error that aborted the ramp.
        #[source]
        source: Box<SmuError>,
    },

    /// Ramp step size is not a positive finite number.
    #[error("Invalid ramp step {0}: must be a positive, finite number")]
    InvalidRampStep(f64),

    /// The instrument answered with text that is not the expected record.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Unit symbol not tabulated for the quantity.
    #[error("Unknown unit '{unit}' for {quantity}")]
    UnknownUnit {
        /// Quantity the unit was looked up for.
        quantity: Quantity,
        /// Offending unit symbol.
        unit: String,
    },

    /// Mode letter not tabulated for the role.
    #[error("Unknown {role} mode '{letter}' (expected V or A)")]
    UnknownMode {
        /// Source or measure.
        role: Role,
        /// Offending letter.
        letter: String,
    },

    /// The instrument did not deliver enough bytes in time.
    #[error("Timed out after {waited:?} waiting for {min_bytes} bytes from the instrument")]
    Timeout {
        /// Byte count that was waited for.
        min_bytes: usize,
        /// Time spent polling.
        waited: Duration,
    },

    /// The transport has been closed.
    #[error("Serial port not connected")]
    NotConnected,

    /// A lifecycle call arrived before `initialise`.
    #[error("SMU not initialised")]
    NotInitialised,

    /// A lifecycle call arrived before `configure`.
    #[error("SMU run settings not configured")]
    NotConfigured,

    /// Raw I/O failure on the link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SmuError {
    /// True for the two set-point rejections a ramp rolls back on.
    pub fn is_setpoint_rejection(&self) -> bool {
        matches!(
            self,
            SmuError::ComplianceViolation { .. } | SmuError::OutOfBounds { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SmuError::OutOfBounds {
            value: 15.0,
            compliance: 10.0,
        };
        assert_eq!(
            err.to_string(),
            "Parameter out of bounds: 15 V is outside the range allowed by compliance 10 V"
        );
    }

    #[test]
    fn test_setup_error_keeps_source() {
        let err = SmuError::Setup {
            command: "*RST".to_string(),
            source: Box::new(SmuError::NotConnected),
        };
        assert!(err.to_string().starts_with("Configuration error"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Serial port not connected"));
    }

    #[test]
    fn test_setpoint_rejection_classification() {
        assert!(SmuError::ComplianceViolation {
            value: 2.0,
            limit: 1.0
        }
        .is_setpoint_rejection());
        assert!(!SmuError::NotConnected.is_setpoint_rejection());
    }
}
