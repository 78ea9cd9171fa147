//! Stepped source ramps.
//!
//! A ramp walks the source from its measured level toward a target in fixed
//! steps, settling and re-measuring after each one, then sets the target
//! exactly. The direction is picked once per call and every commanded value
//! moves strictly in that direction, even when a noisy reading lands behind
//! the previous set-point.
//!
//! Each step moves at least one full step past the previous set-point, so a
//! ramp ends after at most `ceil(|target - start| / step)` steps.
//!
//! Any failure leaves the source at zero: a rejected set-point is reported as
//! [`SmuError::RampFailed`], anything else is returned unchanged after a
//! best-effort zero.

use crate::adapters::Transport;
use crate::error::{SmuError, SmuResult};
use crate::instrument::SmuController;
use crate::units::{self, Quantity};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Dwell after each intermediate step before re-measuring.
pub const RAMP_STEP_DWELL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Direction needed to get from `present` to within one step of `target`.
    fn towards(present: f64, target: f64, step: f64) -> Option<Self> {
        if present - step > target {
            Some(Direction::Down)
        } else if present + step < target {
            Some(Direction::Up)
        } else {
            None
        }
    }

    /// Next set-point, or `None` once it would reach or pass `target`.
    fn next(self, measured: f64, last: Option<f64>, step: f64, target: f64) -> Option<f64> {
        match self {
            Direction::Up => {
                let anchor = last.map_or(measured, |l| l.max(measured));
                Some(anchor + step).filter(|&next| next < target)
            }
            Direction::Down => {
                let anchor = last.map_or(measured, |l| l.min(measured));
                Some(anchor - step).filter(|&next| next > target)
            }
        }
    }
}

impl<T: Transport> SmuController<T> {
    /// Ramp the source voltage to `target` in steps of `step`, both in `unit`.
    ///
    /// # Errors
    /// - [`SmuError::InvalidRampStep`] if `step` is not positive and finite;
    ///   nothing is sent
    /// - [`SmuError::UnknownUnit`] for a unit other than `V`/`mV`
    /// - [`SmuError::RampFailed`] if a step or the final set is rejected; the
    ///   source is at zero
    /// - any read or transport error, after a best-effort zero
    pub fn ramp(&mut self, target: f64, step: f64, unit: &str) -> SmuResult<()> {
        if !step.is_finite() || step <= 0.0 {
            return Err(SmuError::InvalidRampStep(step));
        }
        let multiplier = units::multiplier(Quantity::Voltage, unit)?;

        match self.ramp_steps(target, step, unit, multiplier) {
            Ok(()) => Ok(()),
            Err(e) if e.is_setpoint_rejection() => {
                warn!("Ramp to {} {} aborted ({}), setting source to 0", target, unit, e);
                self.zero_after_failure();
                Err(SmuError::RampFailed {
                    target,
                    source: Box::new(e),
                })
            }
            Err(e) => {
                warn!("Ramp to {} {} interrupted ({}), setting source to 0", target, unit, e);
                self.zero_after_failure();
                Err(e)
            }
        }
    }

    fn ramp_steps(&mut self, target: f64, step: f64, unit: &str, multiplier: f64) -> SmuResult<()> {
        let present = self.measured_level(multiplier)?;
        info!("Ramping from {} {} to {} {} in steps of {}", present, unit, target, unit, step);

        if let Some(direction) = Direction::towards(present, target, step) {
            let mut measured = present;
            let mut last = None;
            let mut steps = 0;
            while let Some(next) = direction.next(measured, last, step, target) {
                self.set_voltage(next, unit)?;
                steps += 1;
                last = Some(next);

                thread::sleep(RAMP_STEP_DWELL);
                measured = self.measured_level(multiplier)?;
                debug!("Ramp step {}: set {} {}, read {} {}", steps, next, unit, measured, unit);
            }
        }

        self.set_voltage(target, unit)?;
        info!("Ramp finished at {} {}", target, unit);
        Ok(())
    }

    fn measured_level(&mut self, multiplier: f64) -> SmuResult<f64> {
        self.sample()?;
        Ok(self.read_mean(Quantity::Voltage)? / multiplier)
    }

    fn zero_after_failure(&mut self) {
        if let Err(e) = self.force_zero() {
            warn!("Could not set source to 0 after ramp failure: {}", e);
        }
    }
}
