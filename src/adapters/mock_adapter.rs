//! Simulated SMU for testing
//!
//! [`MockTransport`] behaves like a 2400-series instrument on the far end of
//! the serial line, without requiring physical hardware. It provides:
//! - A source level and output flag driven by the commands it receives
//! - `:CALC3:DATA?` and `:TRAC:DATA?` answers computed from that state
//! - Scripted raw responses that take precedence over the simulation
//! - Controllable failure injection and a muted mode (no answers at all)
//! - Call logging for test verification

use crate::adapters::Transport;
use crate::error::{SmuError, SmuResult};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default load seen by the simulated source, in ohms.
pub const DEFAULT_LOAD_OHMS: f64 = 1.0e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CalcForm {
    Mean,
    StdDev,
}

#[derive(Debug)]
struct MockState {
    open: bool,
    level: f64,
    output: bool,
    calc_form: CalcForm,
    buffer_points: usize,
    load_ohms: f64,
    noise: (f64, f64),
    muted: bool,
    fail_next: bool,
    scripted: VecDeque<String>,
    pending: Vec<u8>,
    call_log: Vec<String>,
}

/// Simulated instrument transport
///
/// Clones share one instrument, so a test can keep a handle while the
/// controller owns another.
///
/// # Example
///
/// ```
/// use keithley_daq::adapters::{MockTransport, Transport};
///
/// let mut link = MockTransport::new();
/// link.send_command(":SOUR:VOLT:LEV 2.5").unwrap();
/// assert_eq!(link.level(), 2.5);
/// assert_eq!(link.sent_commands(), vec![":SOUR:VOLT:LEV 2.5"]);
/// ```
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create an open link to an idle instrument (0 V, output off)
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                open: true,
                level: 0.0,
                output: false,
                calc_form: CalcForm::Mean,
                buffer_points: 1,
                load_ohms: DEFAULT_LOAD_OHMS,
                noise: (0.0, 0.0),
                muted: false,
                fail_next: false,
                scripted: VecDeque::new(),
                pending: Vec::new(),
                call_log: Vec::new(),
            })),
        }
    }

    /// Start from a non-zero source level
    pub fn with_level(self, level: f64) -> Self {
        self.state().level = level;
        self
    }

    /// Set the simulated load resistance
    pub fn with_load_resistance(self, ohms: f64) -> Self {
        self.state().load_ohms = ohms;
        self
    }

    /// Standard deviations reported for voltage and current
    pub fn with_noise(self, voltage: f64, current: f64) -> Self {
        self.state().noise = (voltage, current);
        self
    }

    /// Queue a raw answer for the next query, bypassing the simulation
    pub fn push_response(&self, response: &str) {
        self.state().scripted.push_back(response.to_string());
    }

    /// Inject a failure for the next command
    pub fn inject_next_failure(&self) {
        self.state().fail_next = true;
    }

    /// Stop answering queries (simulates an unplugged instrument)
    pub fn set_muted(&self, muted: bool) {
        self.state().muted = muted;
    }

    /// Commands received so far, without terminators
    pub fn sent_commands(&self) -> Vec<String> {
        self.state().call_log.clone()
    }

    /// Most recent command
    pub fn last_command(&self) -> Option<String> {
        self.state().call_log.last().cloned()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        self.state().call_log.clear();
    }

    /// Present source level
    pub fn level(&self) -> f64 {
        self.state().level
    }

    /// Present output state
    pub fn output_enabled(&self) -> bool {
        self.state().output
    }

    /// False once the link has been closed
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MockState {
    fn apply(&mut self, command: &str) {
        let upper = command.trim().to_ascii_uppercase();

        if upper == "*RST" {
            self.level = 0.0;
            self.output = false;
            self.calc_form = CalcForm::Mean;
            self.buffer_points = 1;
        } else if let Some(state) = upper.strip_prefix(":OUTPUT ") {
            self.output = state.trim() == "ON";
        } else if upper.starts_with(":SOUR:") && upper.contains(":LEV ") {
            if let Some(level) = last_number(&upper) {
                self.level = level;
            }
        } else if let Some(form) = upper.strip_prefix(":CALC3:FORM ") {
            self.calc_form = if form.trim() == "SDEV" {
                CalcForm::StdDev
            } else {
                CalcForm::Mean
            };
        } else if let Some(points) = upper.strip_prefix(":TRAC:POIN ") {
            if let Ok(points) = points.trim().parse() {
                self.buffer_points = points;
            }
        } else if upper == ":CALC3:DATA?" {
            let record = match self.calc_form {
                CalcForm::Mean => self.reading(),
                CalcForm::StdDev => format!("{:E},{:E}", self.noise.0, self.noise.1),
            };
            self.respond(record);
        } else if upper == ":TRAC:DATA?" {
            let record = vec![self.reading(); self.buffer_points.max(1)].join(",");
            self.respond(record);
        }
    }

    fn reading(&self) -> String {
        format!("{:E},{:E}", self.level, self.level / self.load_ohms)
    }

    fn respond(&mut self, simulated: String) {
        if self.muted {
            return;
        }
        let answer = self.scripted.pop_front().unwrap_or(simulated);
        self.pending.extend_from_slice(answer.as_bytes());
        self.pending.push(b'\r');
    }
}

fn last_number(command: &str) -> Option<f64> {
    command.rsplit(' ').next()?.parse().ok()
}

impl Transport for MockTransport {
    fn send_command(&mut self, command: &str) -> SmuResult<()> {
        let mut state = self.state();
        if !state.open {
            return Err(SmuError::NotConnected);
        }
        if std::mem::take(&mut state.fail_next) {
            return Err(SmuError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "Injected failure",
            )));
        }

        state.call_log.push(command.to_string());
        state.apply(command);
        Ok(())
    }

    fn bytes_to_read(&mut self) -> SmuResult<usize> {
        let state = self.state();
        if !state.open {
            return Err(SmuError::NotConnected);
        }
        Ok(state.pending.len())
    }

    fn read_pending(&mut self) -> SmuResult<Vec<u8>> {
        let mut state = self.state();
        if !state.open {
            return Err(SmuError::NotConnected);
        }
        Ok(std::mem::take(&mut state.pending))
    }

    fn close(&mut self) -> SmuResult<()> {
        self.state().open = false;
        Ok(())
    }
}
