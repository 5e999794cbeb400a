//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the modem
#[derive(Error, Debug)]
pub enum ModemError {
    /// No candidate port answered the `AT` probe
    #[error("No AT module found")]
    NotFound,

    /// No session is open
    #[error("Device not connected")]
    NotConnected,

    /// The deadline passed without an `OK` or `ERROR` line
    #[error("No terminator received before timeout ({} partial lines)", lines.len())]
    Timeout {
        /// Lines received before the deadline
        lines: Vec<String>,
    },

    /// The modem answered with an `ERROR` line
    #[error("Modem returned an error: {}", lines.join(" | "))]
    Protocol {
        /// Full response, including the `ERROR` line
        lines: Vec<String>,
    },

    /// I/O failure on the serial line; the session has been closed
    #[error("Communication error: {0}")]
    CommError(String),

    /// The chosen port could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Error reported by the serial driver
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Rejected or unreadable configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// File or device I/O outside a session
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
