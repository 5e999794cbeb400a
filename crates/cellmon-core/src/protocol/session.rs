//! AT command session
//!
//! One open serial line and the request/response exchange on top of it.
//! A command is written as `command\r\n`; response lines are collected until
//! a terminator (`OK` or any line containing `ERROR`) arrives or the deadline
//! passes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{ModemError, SerialBackend, Transport};
use crate::config::ModemConfig;

/// Final-result token for a successful command
pub const OK_TERMINATOR: &str = "OK";

/// Any line containing this token ends the exchange as an error
/// (`ERROR`, `+CME ERROR: 10`, `+CMS ERROR: 500`, ...)
pub const ERROR_TERMINATOR: &str = "ERROR";

/// Outcome class of one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// An `OK` line was received
    Success,
    /// A line containing `ERROR` was received
    Error,
    /// Neither terminator arrived before the deadline
    Timeout,
    /// The serial line failed; the session is no longer usable
    CommError,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseStatus::Success => "success",
            ResponseStatus::Error => "error",
            ResponseStatus::Timeout => "timeout",
            ResponseStatus::CommError => "comm_error",
        };
        f.write_str(s)
    }
}

/// Result of one request/response exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// How the exchange ended
    pub status: ResponseStatus,
    /// Non-empty response lines in arrival order, echo excluded
    #[serde(rename = "data")]
    pub lines: Vec<String>,
}

impl CommandResponse {
    /// Create a response from its parts
    pub fn new(status: ResponseStatus, lines: Vec<String>) -> Self {
        Self { status, lines }
    }

    /// Response describing an I/O failure
    pub fn comm_error(err: impl fmt::Display) -> Self {
        Self::new(ResponseStatus::CommError, vec![err.to_string()])
    }

    /// True if the exchange ended with `OK`
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// First line containing `needle`
    pub fn find_line(&self, needle: &str) -> Option<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .find(|line| line.contains(needle))
    }

    /// Lines with the final `OK` stripped, for display
    pub fn payload(&self) -> Vec<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .filter(|line| *line != OK_TERMINATOR)
            .collect()
    }

    /// Convert into a `Result`, mapping each failure status onto [`ModemError`]
    pub fn into_result(self) -> Result<Vec<String>, ModemError> {
        match self.status {
            ResponseStatus::Success => Ok(self.lines),
            ResponseStatus::Error => Err(ModemError::Protocol { lines: self.lines }),
            ResponseStatus::Timeout => Err(ModemError::Timeout { lines: self.lines }),
            ResponseStatus::CommError => Err(ModemError::CommError(self.lines.join("; "))),
        }
    }
}

/// Terminal state signalled by a single accepted line, if any
pub fn terminal_status(line: &str) -> Option<ResponseStatus> {
    if line == OK_TERMINATOR {
        Some(ResponseStatus::Success)
    } else if line.contains(ERROR_TERMINATOR) {
        Some(ResponseStatus::Error)
    } else {
        None
    }
}

/// Decode a raw line and decide whether it belongs in the response.
///
/// Invalid UTF-8 is replaced rather than rejected. Blank lines and the echo
/// of `command` yield `None`.
pub fn accept_line(raw: &[u8], command: &str) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() || line == command.trim() {
        return None;
    }
    Some(line.to_string())
}

/// An open AT session on one serial line.
///
/// `send` takes `&mut self`, so a session can only have one command in flight.
pub struct AtSession {
    transport: Box<dyn Transport>,
    port: String,
    /// Upper bound for a single `read_line` call
    line_timeout: Duration,
    /// Deadline used by [`AtSession::command`]
    command_timeout: Duration,
}

impl fmt::Debug for AtSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtSession")
            .field("port", &self.port)
            .field("line_timeout", &self.line_timeout)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl AtSession {
    /// Wrap an already open transport
    pub fn new(
        port: impl Into<String>,
        transport: Box<dyn Transport>,
        line_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            port: port.into(),
            line_timeout,
            command_timeout,
        }
    }

    /// Open `port` through `backend` using the session timeouts from `config`
    pub fn open(
        backend: &dyn SerialBackend,
        port: &str,
        config: &ModemConfig,
    ) -> Result<Self, ModemError> {
        let timeout = config.command_timeout();
        let transport = backend.open(port, config.baud_rate, timeout)?;
        Ok(Self::new(port, transport, timeout, timeout))
    }

    /// Port this session is attached to
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Standard deadline for a command on this session
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Send `command` with the standard deadline
    pub fn command(&mut self, command: &str) -> CommandResponse {
        self.send(command, self.command_timeout)
    }

    /// Send `command` and collect its response until a terminator or `timeout`.
    ///
    /// Never returns early without a terminator; I/O failures come back as
    /// [`ResponseStatus::CommError`] and are never reported as timeouts.
    pub fn send(&mut self, command: &str, timeout: Duration) -> CommandResponse {
        // Stale URCs would otherwise be attributed to this command
        if let Err(e) = self.transport.reset_input_buffer() {
            warn!(port = %self.port, command, "input reset failed: {}", e);
            return CommandResponse::comm_error(e);
        }

        let frame = format!("{}\r\n", command);
        debug!(port = %self.port, "-> {}", command);
        if let Err(e) = self.transport.write_all(frame.as_bytes()) {
            warn!(port = %self.port, command, "write failed: {}", e);
            return CommandResponse::comm_error(e);
        }

        let started = Instant::now();
        let mut lines = Vec::new();

        loop {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                break;
            }
            let wait = (timeout - elapsed).min(self.line_timeout);

            let raw = match self.transport.read_line(wait) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(port = %self.port, command, "read failed: {}", e);
                    return CommandResponse::comm_error(e);
                }
            };

            let Some(line) = accept_line(&raw, command) else {
                continue;
            };
            debug!(port = %self.port, "<- {}", line);
            let terminal = terminal_status(&line);
            lines.push(line);

            if let Some(status) = terminal {
                return CommandResponse::new(status, lines);
            }
        }

        debug!(
            port = %self.port,
            command,
            partial = lines.len(),
            "no terminator within {}ms",
            timeout.as_millis()
        );
        CommandResponse::new(ResponseStatus::Timeout, lines)
    }
}
