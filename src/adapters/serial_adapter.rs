//! RS-232 transport built on the `serialport` crate.

use crate::config::SmuConfig;
use crate::error::{SmuError, SmuResult};
use crate::adapters::Transport;
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info};

/// Transport-level timeout applied when the port is opened.
pub const DEFAULT_SERIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Serial line settings for the SMU
///
/// Defaults match the 2400-series RS-232 setup: even parity, 8 data bits,
/// 1 stop bit, CRLF command terminator and a 2 s timeout.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use keithley_daq::adapters::{SerialSettings, SerialTransport};
///
/// let settings = SerialSettings::new("/dev/ttyUSB0".to_string(), 57600)
///     .with_timeout(Duration::from_millis(500));
/// let transport = SerialTransport::open(settings)?;
/// # Ok::<(), keithley_daq::error::SmuError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SerialSettings {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600, 57600)
    baud_rate: u32,

    /// Parity bit
    parity: Parity,

    /// Read/write timeout
    timeout: Duration,

    /// Line terminator for commands (e.g., "\r\n")
    line_terminator: String,
}

impl SerialSettings {
    /// Create settings with the instrument defaults
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 9600, 57600)
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            parity: Parity::Even,
            timeout: DEFAULT_SERIAL_TIMEOUT,
            line_terminator: "\r\n".to_string(),
        }
    }

    /// Port and baud rate from the device configuration
    pub fn from_config(config: &SmuConfig) -> Self {
        Self::new(config.port.clone(), config.baud_rate)
    }

    /// Set the port timeout
    ///
    /// Default: 2 seconds
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the parity bit
    ///
    /// Default: even
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the line terminator string for commands
    ///
    /// Default: "\r\n" (CRLF)
    pub fn with_line_terminator(mut self, terminator: String) -> Self {
        self.line_terminator = terminator;
        self
    }

    /// Port name
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

/// RS-232 link to the instrument
///
/// Wraps the `serialport` crate. The port is closed when the transport is
/// dropped or [`Transport::close`] is called.
pub struct SerialTransport {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open the serial port described by `settings`
    ///
    /// # Errors
    /// [`SmuError::Connection`] if the port cannot be opened. No retry is
    /// attempted.
    pub fn open(settings: SerialSettings) -> SmuResult<Self> {
        let port = serialport::new(&settings.port_name, settings.baud_rate)
            .parity(settings.parity)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .timeout(settings.timeout)
            .open()
            .map_err(|e| SmuError::Connection {
                port: settings.port_name.clone(),
                reason: e.to_string(),
            })?;

        info!(
            "Device ready at port '{}' ({} baud)",
            settings.port_name, settings.baud_rate
        );

        Ok(Self {
            settings,
            port: Some(port),
        })
    }

    /// Settings the port was opened with
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Check if the port is still open
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn port(&mut self) -> SmuResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(SmuError::NotConnected)
    }
}

impl Transport for SerialTransport {
    fn send_command(&mut self, command: &str) -> SmuResult<()> {
        let line = format!("{}{}", command, self.settings.line_terminator);
        let port = self.port()?;
        port.write_all(line.as_bytes())?;
        port.flush()?;
        debug!("Sent serial command: {}", command);
        Ok(())
    }

    fn bytes_to_read(&mut self) -> SmuResult<usize> {
        let pending = self
            .port()?
            .bytes_to_read()
            .map_err(std::io::Error::from)?;
        Ok(pending as usize)
    }

    fn read_pending(&mut self) -> SmuResult<Vec<u8>> {
        let pending = self.bytes_to_read()?;
        let mut buffer = vec![0u8; pending];
        self.port()?.read_exact(&mut buffer)?;
        debug!(
            "Received serial response: {}",
            String::from_utf8_lossy(&buffer).trim()
        );
        Ok(buffer)
    }

    fn close(&mut self) -> SmuResult<()> {
        if self.port.take().is_some() {
            info!("Device closed at port '{}'", self.settings.port_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_settings_defaults() {
        let settings = SerialSettings::new("/dev/ttyUSB0".to_string(), 9600);
        assert_eq!(settings.port_name(), "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate(), 9600);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.timeout, DEFAULT_SERIAL_TIMEOUT);
        assert_eq!(settings.line_terminator, "\r\n");
    }

    #[test]
    fn test_serial_settings_builder() {
        let settings = SerialSettings::new("COM3".to_string(), 57600)
            .with_timeout(Duration::from_millis(500))
            .with_parity(Parity::None)
            .with_line_terminator("\n".to_string());
        assert_eq!(settings.timeout, Duration::from_millis(500));
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.line_terminator, "\n");
    }

    #[test]
    fn test_open_missing_port_is_connection_error() {
        let settings = SerialSettings::new("/dev/does-not-exist-smu".to_string(), 9600);
        match SerialTransport::open(settings) {
            Err(SmuError::Connection { port, .. }) => assert_eq!(port, "/dev/does-not-exist-smu"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("port should not open"),
        }
    }
}
