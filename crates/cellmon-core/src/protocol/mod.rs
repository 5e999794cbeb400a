//! AT Command Protocol
//!
//! Line-oriented request/response protocol spoken by cellular modems over a
//! serial line. Requests are ASCII lines terminated by `\r\n`; a response is
//! zero or more information lines followed by `OK` or an `ERROR` line.

mod error;
pub mod scanner;
pub mod serial;
pub mod session;
mod transport;

pub use error::ModemError;
pub use scanner::{PortScanner, ProbeFailure, ScanReport};
pub use serial::{list_ports, PortInfo, SystemSerial};
pub use session::{AtSession, CommandResponse, ResponseStatus};
pub use transport::{SerialBackend, Transport};

/// Default baud rate for AT ports
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default deadline for collecting a command response in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Deadline for the `AT` probe during port scanning in milliseconds
pub const PROBE_TIMEOUT_MS: u64 = 1000;
