//! AT port discovery
//!
//! Modems usually expose several serial interfaces (diagnostics, NMEA, AT,
//! modem data). The scanner probes each plausible one with a bare `AT` and
//! picks the first that answers `OK`.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{session::accept_line, ModemError, SerialBackend, Transport};

/// Substrings that mark a device name as a plausible modem port
const CANDIDATE_MARKERS: [&str; 3] = ["USB", "ACM", "COM"];

const PROBE_COMMAND: &str = "AT";

/// True if `name` looks like a USB serial adapter or a COM port
pub fn is_candidate(name: &str) -> bool {
    CANDIDATE_MARKERS.iter().any(|marker| name.contains(marker))
}

/// A candidate that could not be probed or did not answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeFailure {
    /// Port name
    pub port: String,
    /// Why the probe failed
    pub reason: String,
}

/// Outcome of a full scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// Port that answered `OK`, if any
    pub found: Option<String>,
    /// Candidates in the order they were tried
    pub candidates: Vec<String>,
    /// Candidates tried before `found` that failed
    pub failures: Vec<ProbeFailure>,
}

/// Scans the host's serial ports for an AT-responsive device
pub struct PortScanner<'a> {
    backend: &'a dyn SerialBackend,
    baud_rate: u32,
    probe_timeout: Duration,
}

impl<'a> PortScanner<'a> {
    /// Create a scanner probing at `baud_rate` for at most `probe_timeout` per port
    pub fn new(backend: &'a dyn SerialBackend, baud_rate: u32, probe_timeout: Duration) -> Self {
        Self {
            backend,
            baud_rate,
            probe_timeout,
        }
    }

    /// Name of the first port that answers `AT` with `OK`
    pub fn find_at_port(&self) -> Option<String> {
        self.scan().found
    }

    /// Probe candidates in enumeration order, stopping at the first success
    pub fn scan(&self) -> ScanReport {
        let candidates: Vec<String> = self
            .backend
            .list_ports()
            .into_iter()
            .map(|p| p.name)
            .filter(|name| is_candidate(name))
            .collect();

        info!("Scanning {} candidate port(s) for AT responder", candidates.len());

        let mut report = ScanReport {
            candidates: candidates.clone(),
            ..Default::default()
        };

        for port in candidates {
            debug!(port = %port, "probing");
            match self.probe(&port) {
                Ok(()) => {
                    info!(port = %port, "found AT responder");
                    report.found = Some(port);
                    return report;
                }
                Err(e) => {
                    warn!(port = %port, "probe failed: {}", e);
                    report.failures.push(ProbeFailure {
                        port,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("No port answered the AT probe");
        report
    }

    /// Send `AT` on `port` and wait for a line containing `OK`.
    ///
    /// The probe connection is dropped (closed) before this returns.
    fn probe(&self, port: &str) -> Result<(), ModemError> {
        let mut transport = self
            .backend
            .open(port, self.baud_rate, self.probe_timeout)?;
        probe_transport(transport.as_mut(), self.probe_timeout)
    }
}

fn probe_transport(transport: &mut dyn Transport, window: Duration) -> Result<(), ModemError> {
    transport.reset_input_buffer()?;
    transport.write_all(format!("{}\r\n", PROBE_COMMAND).as_bytes())?;

    let started = Instant::now();
    let mut heard = Vec::new();
    loop {
        let elapsed = started.elapsed();
        if elapsed >= window {
            break;
        }
        let Some(raw) = transport.read_line(window - elapsed)? else {
            continue;
        };
        let Some(line) = accept_line(&raw, PROBE_COMMAND) else {
            continue;
        };
        if line.contains("OK") {
            return Ok(());
        }
        heard.push(line);
    }

    if heard.is_empty() {
        Err(ModemError::Timeout { lines: heard })
    } else {
        Err(ModemError::Protocol { lines: heard })
    }
}
