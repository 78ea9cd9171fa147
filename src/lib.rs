//! Core library for keithley-daq.
//!
//! Serial control of Keithley 2400-series source-measure units: typed device
//! configuration, a blocking instrument transport, the SMU controller with
//! compliance-checked set-points and stepped ramps, and a lifecycle adapter
//! for data-acquisition run control.

pub mod adapters;
pub mod config;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod producer;
pub mod units;
