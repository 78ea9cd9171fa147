//! Keithley 2400/2410 source-measure unit driver
//!
//! [`SmuController`] owns one [`Transport`] and one [`SmuConfig`]. Creating it
//! sends the full setup sequence; afterwards the source can be switched,
//! set within compliance, and sampled through the trace buffer and the
//! statistics channel.
//!
//! ## States
//!
//! ```text
//! (new) -> Configured -> OutputEnabled <-> OutputDisabled -> (close)
//! ```
//!
//! All calls block: level changes wait for the settling time, reads poll the
//! input buffer until the answer arrives or the read timeout expires.

use crate::adapters::Transport;
use crate::config::SmuConfig;
use crate::error::{SmuError, SmuResult};
use crate::instrument::commands::{self, Statistic};
use crate::instrument::response::Record;
use crate::units::{self, Function, Quantity, MICRO};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Smallest answer accepted as the start of a response.
pub const MIN_RESPONSE_BYTES: usize = 3;

/// Pause between the two sends of [`SmuController::on`] / [`SmuController::off`].
pub const OUTPUT_REPEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Output state of a configured instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Setup sent, output never switched.
    Configured,
    /// Output on.
    OutputEnabled,
    /// Output off.
    OutputDisabled,
}

/// Mean and standard deviation of one quantity.
///
/// Voltage is reported in volts, current in microamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Mean over the trace buffer.
    pub mean: f64,
    /// Standard deviation over the trace buffer.
    pub std_dev: f64,
}

/// One raw record in SI units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Volts.
    pub voltage: f64,
    /// Amperes.
    pub current: f64,
}

impl Reading {
    fn from_record(record: &Record) -> SmuResult<Self> {
        Ok(Self {
            voltage: record.value(0)?,
            current: record.value(1)?,
        })
    }
}

/// Voltage and current measured by [`SmuController::status`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Status {
    /// Volts.
    pub voltage: Measurement,
    /// Microamps.
    pub current: Measurement,
}

/// Driver for a 2400-series SMU on an exclusively owned transport.
pub struct SmuController<T: Transport> {
    config: SmuConfig,
    transport: T,
    state: OutputState,
}

impl<T: Transport> SmuController<T> {
    /// Bring the instrument to the configured state.
    ///
    /// # Errors
    /// - [`SmuError::Configuration`] if `config` does not validate
    /// - [`SmuError::Setup`] if a setup command cannot be sent; the
    ///   instrument is then partially configured and the transport is
    ///   dropped with the failed constructor
    pub fn new(config: SmuConfig, transport: T) -> SmuResult<Self> {
        config.validate()?;

        let mut controller = Self {
            config,
            transport,
            state: OutputState::Configured,
        };
        controller.send_setup()?;

        info!(
            "Device at port '{}' configured (source {}, measure {}, compliance {})",
            controller.config.port,
            controller.config.source,
            controller.config.measure,
            controller.config.compliance_source
        );
        Ok(controller)
    }

    fn send_setup(&mut self) -> SmuResult<()> {
        for command in commands::setup_sequence(&self.config) {
            if let Err(e) = self.transport.send_command(&command) {
                warn!("Setup stopped at '{}': {}", command, e);
                return Err(SmuError::Setup {
                    command,
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }

    /// Configuration the controller was created with.
    pub fn config(&self) -> &SmuConfig {
        &self.config
    }

    /// Source function, fixed at construction.
    pub fn source_function(&self) -> Function {
        self.config.source
    }

    /// Sense function, fixed at construction.
    pub fn measure_function(&self) -> Function {
        self.config.measure
    }

    /// Current output state.
    pub fn state(&self) -> OutputState {
        self.state
    }

    /// True while the output is on.
    pub fn is_output_enabled(&self) -> bool {
        self.state == OutputState::OutputEnabled
    }

    fn send(&mut self, command: &str) -> SmuResult<()> {
        debug!("SMU command: {}", command);
        self.transport.send_command(command)
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Switch the output on. Sending it twice is harmless.
    pub fn enable_output(&mut self) -> SmuResult<()> {
        self.send(commands::output(true))?;
        self.state = OutputState::OutputEnabled;
        info!("Output on");
        Ok(())
    }

    /// Switch the output off. Sending it twice is harmless.
    pub fn disable_output(&mut self) -> SmuResult<()> {
        self.send(commands::output(false))?;
        self.state = OutputState::OutputDisabled;
        info!("Output off");
        Ok(())
    }

    /// Switch the output on, sending the command twice 0.5 s apart.
    pub fn on(&mut self) -> SmuResult<()> {
        self.repeat_output(true)
    }

    /// Switch the output off, sending the command twice 0.5 s apart.
    pub fn off(&mut self) -> SmuResult<()> {
        self.repeat_output(false)
    }

    fn repeat_output(&mut self, on: bool) -> SmuResult<()> {
        for _ in 0..2 {
            if on {
                self.enable_output()?;
            } else {
                self.disable_output()?;
            }
            thread::sleep(OUTPUT_REPEAT_INTERVAL);
        }
        Ok(())
    }

    // ========================================================================
    // Source
    // ========================================================================

    /// Set the source level to `value` as given, checked against the raw
    /// compliance limit.
    ///
    /// # Errors
    /// [`SmuError::ComplianceViolation`] if `value` has the opposite polarity
    /// to the limit or exceeds it in magnitude. Zero is always accepted.
    pub fn set_source_value(&mut self, value: f64) -> SmuResult<()> {
        let limit = self.config.compliance_source;
        let wrong_polarity = if limit >= 0.0 { value < 0.0 } else { value > 0.0 };
        if wrong_polarity || value.abs() > limit.abs() || !value.is_finite() {
            return Err(SmuError::ComplianceViolation { value, limit });
        }

        self.apply_level(value)
    }

    /// Set the source to `value` in `unit` (`V` or `mV`).
    ///
    /// With compliance `C ≥ 0` the converted value must lie in `[0, C)`, with
    /// `C ≤ 0` in `(C, 0]`.
    ///
    /// # Errors
    /// - [`SmuError::UnknownUnit`] for a unit other than `V`/`mV`
    /// - [`SmuError::OutOfBounds`] for the wrong polarity or a value at or
    ///   beyond compliance
    pub fn set_voltage(&mut self, value: f64, unit: &str) -> SmuResult<()> {
        let volts = units::to_si(Quantity::Voltage, unit, value)?;
        let compliance = self.config.compliance_source;

        let allowed = if compliance >= 0.0 {
            (0.0..compliance).contains(&volts)
        } else {
            volts <= 0.0 && volts > compliance
        };
        if !allowed {
            return Err(SmuError::OutOfBounds {
                value: volts,
                compliance,
            });
        }

        if self.config.source != Function::Voltage {
            warn!("Setting a voltage level while sourcing {}", self.config.source);
        }
        self.apply_level(volts)?;
        info!("Output voltage set to {} V", volts);
        Ok(())
    }

    /// Command the source to zero without validation.
    pub(crate) fn force_zero(&mut self) -> SmuResult<()> {
        let command = commands::source_level(self.config.source, 0.0);
        self.send(&command)
    }

    fn apply_level(&mut self, value: f64) -> SmuResult<()> {
        let command = commands::source_level(self.config.source, value);
        self.send(&command)?;
        thread::sleep(self.config.settling_time());
        Ok(())
    }

    /// Set the upper end of the sense range for the source function.
    pub fn set_source_upper_range(&mut self, value: f64) -> SmuResult<()> {
        let command = commands::source_upper_range(self.config.source, value);
        self.send(&command)
    }

    /// Switch sense autoranging.
    pub fn set_measure_autorange(&mut self, on: bool) -> SmuResult<()> {
        let command = commands::measure_autorange(on);
        self.send(&command)
    }

    /// Reset the instrument and apply the configuration again.
    ///
    /// `*RST` turns the output off, so the state becomes
    /// [`OutputState::OutputDisabled`].
    pub fn reset_instrument(&mut self) -> SmuResult<()> {
        self.send_setup()?;
        self.state = OutputState::OutputDisabled;
        info!("Instrument reset and reconfigured");
        Ok(())
    }

    // ========================================================================
    // Measurement
    // ========================================================================

    /// Clear the trace buffer, re-arm it and trigger a new acquisition.
    ///
    /// Must precede every read.
    pub fn sample(&mut self) -> SmuResult<()> {
        for command in commands::SAMPLE {
            self.send(command)?;
        }
        Ok(())
    }

    fn query_statistic(&mut self, statistic: Statistic) -> SmuResult<Record> {
        let select = commands::select_statistic(statistic);
        self.send(&select)?;
        self.send(commands::CALC_DATA_QUERY)?;
        self.read_record()
    }

    fn read_record(&mut self) -> SmuResult<Record> {
        let raw = self.transport.read_available(
            MIN_RESPONSE_BYTES,
            self.config.wait_read(),
            self.config.read_timeout(),
        )?;
        debug!("SMU response: {}", String::from_utf8_lossy(&raw).trim());
        Record::parse(&raw)
    }

    fn field(record: &Record, quantity: Quantity) -> SmuResult<f64> {
        match quantity {
            Quantity::Voltage => record.value(0),
            Quantity::Current => Ok(record.value(1)? / MICRO),
        }
    }

    /// Mean of `quantity` over the last acquisition (V or µA).
    pub fn read_mean(&mut self, quantity: Quantity) -> SmuResult<f64> {
        let record = self.query_statistic(Statistic::Mean)?;
        Self::field(&record, quantity)
    }

    /// Standard deviation of `quantity` over the last acquisition (V or µA).
    pub fn read_std_dev(&mut self, quantity: Quantity) -> SmuResult<f64> {
        let record = self.query_statistic(Statistic::StdDev)?;
        Self::field(&record, quantity)
    }

    /// Acquire and return the mean record.
    pub fn read_value(&mut self) -> SmuResult<Reading> {
        self.sample()?;
        let mean = self.query_statistic(Statistic::Mean)?;
        Reading::from_record(&mean)
    }

    /// Acquire and return the mean record with its standard deviation.
    pub fn read_value_with_error(&mut self) -> SmuResult<(Reading, Reading)> {
        self.sample()?;
        let mean = self.query_statistic(Statistic::Mean)?;
        let mean = Reading::from_record(&mean)?;
        let std_dev = self.query_statistic(Statistic::StdDev)?;
        Ok((mean, Reading::from_record(&std_dev)?))
    }

    /// Raw contents of the trace buffer, one reading per trigger.
    pub fn read_buffer(&mut self) -> SmuResult<Vec<Reading>> {
        self.send(commands::TRACE_DATA_QUERY)?;
        let values = self.read_record()?.values()?;
        if values.len() % 2 != 0 {
            return Err(SmuError::MalformedResponse(format!(
                "trace buffer holds {} values, expected voltage/current pairs",
                values.len()
            )));
        }

        Ok(values
            .chunks_exact(2)
            .map(|pair| Reading {
                voltage: pair[0],
                current: pair[1],
            })
            .collect())
    }

    /// Acquire and return mean and standard deviation of `quantity`.
    pub fn measure(&mut self, quantity: Quantity) -> SmuResult<Measurement> {
        self.sample()?;
        let mean = self.read_mean(quantity)?;
        let std_dev = self.read_std_dev(quantity)?;
        Ok(Measurement { mean, std_dev })
    }

    /// Voltage in volts.
    pub fn voltage(&mut self) -> SmuResult<Measurement> {
        self.measure(Quantity::Voltage)
    }

    /// Current in microamps.
    pub fn current(&mut self) -> SmuResult<Measurement> {
        self.measure(Quantity::Current)
    }

    /// Measure voltage and current and log them.
    pub fn status(&mut self) -> SmuResult<Status> {
        let voltage = self.voltage()?;
        let current = self.current()?;
        info!(
            "Output voltage: {} V +/- {} V, output current: {} uA +/- {} uA",
            voltage.mean, voltage.std_dev, current.mean, current.std_dev
        );
        Ok(Status { voltage, current })
    }

    /// Close the transport and drop the controller.
    pub fn close(mut self) -> SmuResult<()> {
        self.transport.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use tracing_test::traced_test;

    fn config(compliance: f64) -> SmuConfig {
        SmuConfig::from_yaml_str(&format!(
            r#"
Device:
  Configuration:
    Port: /dev/ttyUSB0
    Baudrate: 9600
    Source: V
    Measure: A
    TriggerCount: 10
    TriggerDelay: 0
    RangeSource: auto
    AutoRangeSource: "ON"
    ComplianceSource: {compliance}
    RangeMeasure: auto
    AutoRangeMeasure: "ON"
    ComplianceMeasure: 0.0001
    SettlingTime: 0
    WaitRead: 0
    ReadTimeout: 0.2
"#
        ))
        .unwrap()
    }

    fn controller(compliance: f64) -> (SmuController<MockTransport>, MockTransport) {
        let link = MockTransport::new();
        let smu = SmuController::new(config(compliance), link.clone()).unwrap();
        link.clear_log();
        (smu, link)
    }

    #[test]
    fn test_new_sends_setup_sequence() {
        let link = MockTransport::new();
        let cfg = config(10.0);
        let smu = SmuController::new(cfg.clone(), link.clone()).unwrap();
        assert_eq!(smu.state(), OutputState::Configured);
        assert_eq!(link.sent_commands(), commands::setup_sequence(&cfg));
    }

    #[test]
    fn test_setup_failure_is_configuration_error() {
        let link = MockTransport::new();
        link.inject_next_failure();
        let err = SmuController::new(config(10.0), link).err().unwrap();
        match err {
            SmuError::Setup { command, .. } => assert_eq!(command, "*RST"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_output_state_transitions() {
        let (mut smu, link) = controller(10.0);
        smu.enable_output().unwrap();
        assert!(smu.is_output_enabled());
        smu.enable_output().unwrap();
        smu.disable_output().unwrap();
        assert_eq!(smu.state(), OutputState::OutputDisabled);
        assert_eq!(link.sent_commands(), vec![":OUTPUT ON", ":OUTPUT ON", ":OUTPUT OFF"]);
    }

    #[test]
    fn test_set_source_value_compliance() {
        let (mut smu, link) = controller(10.0);
        smu.set_source_value(10.0).unwrap();
        assert_eq!(link.level(), 10.0);
        let err = smu.set_source_value(10.5).unwrap_err();
        assert!(matches!(err, SmuError::ComplianceViolation { .. }));
        assert_eq!(link.sent_commands().len(), 1);

        let (mut smu, _) = controller(-5.0);
        assert!(smu.set_source_value(-4.0).is_ok());
        assert!(matches!(
            smu.set_source_value(-6.0),
            Err(SmuError::ComplianceViolation { .. })
        ));
    }

    #[test]
    fn test_set_source_value_rejects_opposite_polarity() {
        let (mut smu, link) = controller(10.0);
        assert!(matches!(
            smu.set_source_value(-1000.0),
            Err(SmuError::ComplianceViolation { .. })
        ));
        assert!(matches!(
            smu.set_source_value(-0.5),
            Err(SmuError::ComplianceViolation { .. })
        ));
        smu.set_source_value(0.0).unwrap();

        let (mut smu, negative) = controller(-5.0);
        assert!(matches!(
            smu.set_source_value(400.0),
            Err(SmuError::ComplianceViolation { .. })
        ));
        smu.set_source_value(0.0).unwrap();
        smu.set_source_value(-5.0).unwrap();

        assert_eq!(link.sent_commands(), vec![":SOUR:VOLT:LEV 0"]);
        assert_eq!(negative.sent_commands(), vec![":SOUR:VOLT:LEV 0", ":SOUR:VOLT:LEV -5"]);
    }

    #[test]
    fn test_set_voltage_converts_units() {
        let (mut smu, link) = controller(10.0);
        smu.set_voltage(500.0, "mV").unwrap();
        assert!(link.last_command().unwrap().starts_with(":SOUR:VOLT:LEV 0.5"));
        assert!((link.level() - 0.5).abs() < 1e-12);
        assert!(matches!(
            smu.set_voltage(1.0, "kV"),
            Err(SmuError::UnknownUnit { .. })
        ));
    }

    #[test]
    fn test_set_voltage_bounds_zero_compliance() {
        let (mut smu, link) = controller(0.0);
        assert!(matches!(smu.set_voltage(0.0, "V"), Err(SmuError::OutOfBounds { .. })));
        assert!(link.sent_commands().is_empty());
    }

    #[test]
    fn test_read_mean_and_std_dev() {
        let (mut smu, link) = controller(10.0);
        link.push_response("1.234,0.0005,+0");
        link.push_response("0.001,0.000002");

        smu.sample().unwrap();
        let current = smu.read_mean(Quantity::Current).unwrap();
        assert!((current - 500.0).abs() < 1e-9);
        let sdev = smu.read_std_dev(Quantity::Voltage).unwrap();
        assert!((sdev - 0.001).abs() < 1e-12);

        assert_eq!(
            link.sent_commands(),
            vec![
                ":TRAC:FEED:CONT NEV",
                ":TRAC:CLE",
                ":TRAC:FEED:CONT NEXT",
                ":INIT",
                ":CALC3:FORM MEAN",
                ":CALC3:DATA?",
                ":CALC3:FORM SDEV",
                ":CALC3:DATA?",
            ]
        );
    }

    #[test]
    fn test_read_value_with_error() {
        let link = MockTransport::new().with_level(2.0).with_noise(0.01, 1e-9);
        let mut smu = SmuController::new(config(10.0), link).unwrap();
        let (mean, err) = smu.read_value_with_error().unwrap();
        assert_eq!(mean.voltage, 2.0);
        assert!((mean.current - 2.0e-6).abs() < 1e-15);
        assert_eq!(err.voltage, 0.01);
        assert_eq!(err.current, 1e-9);
    }

    #[test]
    fn test_malformed_response() {
        let (mut smu, link) = controller(10.0);
        link.push_response("OVERFLOW");
        assert!(matches!(
            smu.read_mean(Quantity::Voltage),
            Err(SmuError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_silent_instrument_times_out() {
        let (mut smu, link) = controller(10.0);
        link.set_muted(true);
        assert!(matches!(smu.read_value(), Err(SmuError::Timeout { .. })));
    }

    #[test]
    fn test_read_buffer_pairs() {
        let (mut smu, link) = controller(10.0);
        link.push_response("1.0,1e-6,1.1,1.1e-6");
        let readings = smu.read_buffer().unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].voltage, 1.1);

        link.push_response("1.0,1e-6,1.1");
        assert!(smu.read_buffer().is_err());
    }

    #[test]
    fn test_reset_instrument_reapplies_setup() {
        let (mut smu, link) = controller(10.0);
        smu.enable_output().unwrap();
        smu.reset_instrument().unwrap();
        assert_eq!(smu.state(), OutputState::OutputDisabled);
        let sent = link.sent_commands();
        assert_eq!(sent[1], "*RST");
        assert_eq!(sent.last().map(String::as_str), Some(":TRIG:DEL 0"));
    }

    #[test]
    #[traced_test]
    fn test_status_logs_readings() {
        let link = MockTransport::new().with_level(3.0);
        let mut smu = SmuController::new(config(10.0), link).unwrap();
        let status = smu.status().unwrap();
        assert_eq!(status.voltage.mean, 3.0);
        assert!((status.current.mean - 3.0).abs() < 1e-9);
        assert!(logs_contain("Output voltage: 3 V"));
    }

    #[test]
    #[traced_test]
    fn test_close_releases_transport() {
        let (smu, link) = controller(10.0);
        smu.close().unwrap();
        assert!(!link.is_open());
        // Closing is logged by the transport, not the controller
        assert!(!logs_contain("Device closed"));
    }
}
