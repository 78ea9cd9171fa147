//! Run-control lifecycle adapter.
//!
//! [`SmuProducer`] maps the five lifecycle transitions of a data-acquisition
//! run control (initialise, configure, start, stop, reset) onto an
//! [`SmuController`]. It owns the controller between `initialise` and
//! `reset`; the transport is produced by a connector so the same lifecycle
//! runs against real hardware or [`MockTransport`](crate::adapters::MockTransport).
//!
//! ```text
//! initialise(path) -> configure(settings) -> start_run() -> stop_run() -> reset()
//!                          ^                                   |
//!                          +-----------------------------------+
//! ```

use crate::adapters::Transport;
use crate::config::SmuConfig;
use crate::error::{SmuError, SmuResult};
use crate::instrument::SmuController;
use std::path::Path;
use tracing::{info, warn};

/// Unit of all run voltages.
const RUN_UNIT: &str = "V";

/// Opens the transport for a freshly loaded configuration.
pub type Connector<T> = Box<dyn FnMut(&SmuConfig) -> SmuResult<T> + Send>;

/// Voltages applied by `configure` and `stop_run`, in volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSettings {
    /// Level set before the output is enabled and restored at run stop.
    pub v_start: f64,
    /// Level held during the run.
    pub v_set: f64,
    /// Ramp step.
    pub v_step: f64,
}

/// Lifecycle adapter around one SMU.
pub struct SmuProducer<T: Transport> {
    name: String,
    connector: Connector<T>,
    controller: Option<SmuController<T>>,
    run: Option<RunSettings>,
    is_running: bool,
}

#[cfg(feature = "instrument_serial")]
impl SmuProducer<crate::adapters::SerialTransport> {
    /// Producer that opens the serial port named in the configuration.
    pub fn serial(name: impl Into<String>) -> Self {
        use crate::adapters::{SerialSettings, SerialTransport};

        Self::new(name, |config: &SmuConfig| {
            SerialTransport::open(SerialSettings::from_config(config))
        })
    }
}

impl<T: Transport> SmuProducer<T> {
    /// Create an idle producer.
    pub fn new<F>(name: impl Into<String>, connector: F) -> Self
    where
        F: FnMut(&SmuConfig) -> SmuResult<T> + Send + 'static,
    {
        let name = name.into();
        info!("New producer instance '{}'", name);
        Self {
            name,
            connector: Box::new(connector),
            controller: None,
            run: None,
            is_running: false,
        }
    }

    /// Producer name used in log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True between `start_run` and `stop_run`/`reset`.
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// True between `initialise` and `reset`.
    pub fn is_initialised(&self) -> bool {
        self.controller.is_some()
    }

    /// Settings of the last `configure`.
    pub fn run_settings(&self) -> Option<RunSettings> {
        self.run
    }

    /// The controller, once initialised.
    pub fn controller_mut(&mut self) -> SmuResult<&mut SmuController<T>> {
        self.controller.as_mut().ok_or(SmuError::NotInitialised)
    }

    /// Load the configuration, connect and bring the instrument up with its
    /// output disabled.
    ///
    /// A controller left over from an earlier initialise is released first.
    pub fn initialise<P: AsRef<Path>>(&mut self, config_path: P) -> SmuResult<()> {
        info!("[{}] Initialise from {}", self.name, config_path.as_ref().display());
        self.release()?;

        let config = SmuConfig::load_from(config_path)?;
        let transport = (self.connector)(&config)?;
        let mut controller = SmuController::new(config, transport)?;
        controller.disable_output()?;

        self.controller = Some(controller);
        Ok(())
    }

    /// Set the start voltage, switch the output on and ramp to the run
    /// voltage.
    pub fn configure(&mut self, settings: RunSettings) -> SmuResult<()> {
        info!("[{}] Configure {:?}", self.name, settings);
        if !settings.v_step.is_finite() || settings.v_step <= 0.0 {
            return Err(SmuError::InvalidRampStep(settings.v_step));
        }

        let controller = self.controller.as_mut().ok_or(SmuError::NotInitialised)?;
        self.run = Some(settings);

        controller.disable_output()?;
        controller.set_voltage(settings.v_start, RUN_UNIT)?;
        controller.enable_output()?;
        controller.ramp(settings.v_set, settings.v_step, RUN_UNIT)
    }

    /// Switch the output on and mark the run as started.
    pub fn start_run(&mut self) -> SmuResult<()> {
        info!("[{}] Start run", self.name);
        let controller = self.controller.as_mut().ok_or(SmuError::NotInitialised)?;
        controller.enable_output()?;
        self.is_running = true;
        Ok(())
    }

    /// Ramp back to the start voltage and switch the output off.
    ///
    /// The output is switched off even when the ramp fails; the ramp error is
    /// returned in that case.
    pub fn stop_run(&mut self) -> SmuResult<()> {
        info!("[{}] Stop run", self.name);
        let controller = self.controller.as_mut().ok_or(SmuError::NotInitialised)?;
        let settings = self.run.ok_or(SmuError::NotConfigured)?;
        self.is_running = false;

        let ramped = controller.ramp(settings.v_start, settings.v_step, RUN_UNIT);
        if let Err(e) = &ramped {
            warn!("[{}] Ramp to start voltage failed: {}", self.name, e);
        }
        let disabled = controller.disable_output();

        ramped.and(disabled)
    }

    /// Switch the output off and release the controller.
    ///
    /// Resetting an uninitialised producer does nothing.
    pub fn reset(&mut self) -> SmuResult<()> {
        info!("[{}] Reset", self.name);
        self.is_running = false;
        self.run = None;
        self.release()
    }

    fn release(&mut self) -> SmuResult<()> {
        let Some(mut controller) = self.controller.take() else {
            return Ok(());
        };

        let disabled = controller.disable_output();
        if let Err(e) = &disabled {
            warn!("[{}] Could not disable output before release: {}", self.name, e);
        }
        let closed = controller.close();

        disabled.and(closed)
    }
}
