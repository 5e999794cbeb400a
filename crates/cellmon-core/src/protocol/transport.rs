//! Transport abstraction
//!
//! The protocol engine only needs a handful of operations from a serial line.
//! Everything that can carry AT traffic (a real tty, the simulated modem, test
//! doubles) implements [`Transport`], and is produced by a [`SerialBackend`].

use std::io;
use std::time::Duration;

use super::{ModemError, PortInfo};

/// An open, line-oriented serial connection.
///
/// Dropping the transport closes the underlying connection.
pub trait Transport: Send {
    /// Write every byte of `data` to the line
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read one line, waiting at most `timeout`.
    ///
    /// Returns the raw bytes of the line without requiring a trailing newline
    /// (a partial line is returned if the timeout expires mid-line), or
    /// `None` if nothing arrived in time.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Discard anything already sitting in the receive buffer
    fn reset_input_buffer(&mut self) -> io::Result<()>;
}

/// Enumerates serial devices and opens connections to them.
pub trait SerialBackend: Send + Sync {
    /// List the devices currently exposed by the host, in enumeration order
    fn list_ports(&self) -> Vec<PortInfo>;

    /// Open `port` at `baud_rate` with `timeout` as the default read timeout
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>, ModemError>;
}
