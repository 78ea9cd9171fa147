//! Instrument transports.
//!
//! A [`Transport`] moves ASCII commands to the instrument and raw response
//! bytes back. Commands are fire-and-forget; responses are collected with the
//! two-phase [`Transport::read_available`] (poll for the first bytes, let the
//! rest of the packet arrive, drain).

use crate::error::{SmuError, SmuResult};
use std::thread;
use std::time::{Duration, Instant};

pub mod mock_adapter;
pub use mock_adapter::MockTransport;

#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::{SerialSettings, SerialTransport};

/// Interval between buffer checks while waiting for a response.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Blocking byte-stream link to one instrument.
///
/// A transport is owned by exactly one controller; none of the methods are
/// meant to be called concurrently.
pub trait Transport: Send {
    /// Write `command` followed by the line terminator.
    fn send_command(&mut self, command: &str) -> SmuResult<()>;

    /// Number of bytes waiting in the input buffer.
    fn bytes_to_read(&mut self) -> SmuResult<usize>;

    /// Read everything currently buffered without waiting.
    fn read_pending(&mut self) -> SmuResult<Vec<u8>>;

    /// Release the link. Later calls fail with [`SmuError::NotConnected`].
    fn close(&mut self) -> SmuResult<()>;

    /// Wait for at least `min_bytes`, sleep `settle`, then drain the buffer.
    ///
    /// The wait is bounded by `timeout`; a silent instrument yields
    /// [`SmuError::Timeout`] instead of a stall.
    fn read_available(
        &mut self,
        min_bytes: usize,
        settle: Duration,
        timeout: Duration,
    ) -> SmuResult<Vec<u8>> {
        let start = Instant::now();
        while self.bytes_to_read()? < min_bytes {
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(SmuError::Timeout { min_bytes, waited });
            }
            thread::sleep(POLL_INTERVAL);
        }

        if !settle.is_zero() {
            thread::sleep(settle);
        }
        self.read_pending()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_command(&mut self, command: &str) -> SmuResult<()> {
        (**self).send_command(command)
    }

    fn bytes_to_read(&mut self) -> SmuResult<usize> {
        (**self).bytes_to_read()
    }

    fn read_pending(&mut self) -> SmuResult<Vec<u8>> {
        (**self).read_pending()
    }

    fn close(&mut self) -> SmuResult<()> {
        (**self).close()
    }
}
