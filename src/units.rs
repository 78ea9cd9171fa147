//! Unit and mode lookup tables.
//!
//! Maps human unit symbols to SI multipliers and the single-letter mode codes
//! used in the configuration file to SCPI function names. Everything here is
//! pure; no state is kept.

use crate::error::{SmuError, SmuResult};
use serde::{Serialize, Serializer};
use std::fmt;

/// Factor applied to current readings to report them in microamps.
pub const MICRO: f64 = 1e-6;

const VOLTAGE_UNITS: &[(&str, f64)] = &[("mV", 1e-3), ("V", 1.0)];

const CURRENT_UNITS: &[(&str, f64)] = &[("nA", 1e-9), ("uA", 1e-6), ("mA", 1e-3), ("A", 1.0)];

/// Physical quantity handled by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    /// Volts.
    Voltage,
    /// Amperes.
    Current,
}

impl Quantity {
    fn table(self) -> &'static [(&'static str, f64)] {
        match self {
            Quantity::Voltage => VOLTAGE_UNITS,
            Quantity::Current => CURRENT_UNITS,
        }
    }

    /// Unit symbols accepted for this quantity.
    pub fn units(self) -> impl Iterator<Item = &'static str> {
        self.table().iter().map(|(symbol, _)| *symbol)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Voltage => f.write_str("voltage"),
            Quantity::Current => f.write_str("current"),
        }
    }
}

/// Which side of the instrument a mode letter configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Source function.
    Source,
    /// Sense function.
    Measure,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => f.write_str("source"),
            Role::Measure => f.write_str("measure"),
        }
    }
}

/// Instrument function selected for sourcing or sensing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `VOLT`
    Voltage,
    /// `CURR`
    Current,
}

impl Function {
    /// SCPI mnemonic used in command paths.
    pub fn scpi(self) -> &'static str {
        match self {
            Function::Voltage => "VOLT",
            Function::Current => "CURR",
        }
    }

    /// Letter used in configuration files.
    pub fn letter(self) -> &'static str {
        match self {
            Function::Voltage => "V",
            Function::Current => "A",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scpi())
    }
}

impl Serialize for Function {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.letter())
    }
}

/// SI multiplier for `unit` of `quantity`.
pub fn multiplier(quantity: Quantity, unit: &str) -> SmuResult<f64> {
    quantity
        .table()
        .iter()
        .find(|(symbol, _)| *symbol == unit)
        .map(|(_, factor)| *factor)
        .ok_or_else(|| SmuError::UnknownUnit {
            quantity,
            unit: unit.to_string(),
        })
}

/// Convert `value` expressed in `unit` to SI.
pub fn to_si(quantity: Quantity, unit: &str, value: f64) -> SmuResult<f64> {
    Ok(value * multiplier(quantity, unit)?)
}

/// Resolve a mode letter (`V`/`v` or `A`/`a`) to an instrument function.
pub fn mode_code(role: Role, letter: &str) -> SmuResult<Function> {
    match letter {
        "V" | "v" => Ok(Function::Voltage),
        "A" | "a" => Ok(Function::Current),
        _ => Err(SmuError::UnknownMode {
            role,
            letter: letter.to_string(),
        }),
    }
}
