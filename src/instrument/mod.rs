//! Keithley 2400-series instrument driver.
//!
//! - [`commands`]: SCPI strings sent to the instrument
//! - [`response`]: parser for the comma-separated data records it returns
//! - [`keithley_2400`]: the [`SmuController`] state machine
//! - [`ramp`]: stepped voltage ramps with rollback to zero

pub mod commands;
pub mod keithley_2400;
pub mod ramp;
pub mod response;

pub use keithley_2400::{Measurement, OutputState, Reading, SmuController, Status};
pub use ramp::RAMP_STEP_DWELL;
