//! Simulation Mode - Synthetic AT modem for testing without hardware
//!
//! Implements the same [`SerialBackend`]/[`Transport`] pair as the real serial
//! backend, so the protocol engine runs unchanged on top of it. The simulated
//! module behaves like an EC200U: it echoes commands until `ATE0`, reports a
//! ready SIM, and its signal strength drifts a little on every `AT+CSQ`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tracing::debug;

use crate::protocol::{ModemError, PortInfo, SerialBackend, Transport};

/// Ports the simulated host exposes
pub const SIMULATED_PORTS: [&str; 3] = ["COM3", "/dev/ttyUSB0", "/dev/ttyACM0"];

/// RSSI code range the simulated signal stays within
const RSSI_MIN: i16 = 5;
const RSSI_MAX: i16 = 31;
const INITIAL_RSSI: u8 = 20;

/// Backend that hands out [`SimulatedModem`] transports
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    ports: Vec<String>,
    seed: Option<u64>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    /// Backend exposing [`SIMULATED_PORTS`] with an entropy-seeded modem
    pub fn new() -> Self {
        Self {
            ports: SIMULATED_PORTS.iter().map(|p| p.to_string()).collect(),
            seed: None,
        }
    }

    /// Deterministic variant for tests
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::new()
        }
    }
}

impl SerialBackend for SimulatedBackend {
    fn list_ports(&self) -> Vec<PortInfo> {
        self.ports.iter().map(PortInfo::named).collect()
    }

    fn open(
        &self,
        port: &str,
        _baud_rate: u32,
        _timeout: Duration,
    ) -> Result<Box<dyn Transport>, ModemError> {
        if !self.ports.iter().any(|p| p == port) {
            return Err(ModemError::SerialError(format!(
                "no simulated device at {}",
                port
            )));
        }
        debug!(port, "simulated modem opened");
        let modem = match self.seed {
            Some(seed) => SimulatedModem::with_seed(seed),
            None => SimulatedModem::new(),
        };
        Ok(Box::new(modem))
    }
}

/// An in-memory modem that answers AT commands
pub struct SimulatedModem {
    /// Local echo, on until `ATE0`
    echo: bool,
    /// Current RSSI code
    rssi: u8,
    /// Bytes written but not yet terminated by CR/LF
    rx: Vec<u8>,
    /// Lines waiting to be read, each with its line ending
    tx: VecDeque<Vec<u8>>,
    rng: StdRng,
}

impl Default for SimulatedModem {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedModem {
    /// Create a new simulated modem
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a simulated modem with a fixed random sequence
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            echo: true,
            rssi: INITIAL_RSSI,
            rx: Vec::new(),
            tx: VecDeque::new(),
            rng,
        }
    }

    /// Current RSSI code
    pub fn rssi(&self) -> u8 {
        self.rssi
    }

    fn push_line(&mut self, line: &str) {
        self.tx.push_back(format!("{}\r\n", line).into_bytes());
    }

    /// Queue the reply to one command line
    fn respond(&mut self, command: &str) {
        if self.echo {
            self.push_line(command);
        }

        // Information text is framed by blank lines like on real modules
        match command.to_ascii_uppercase().as_str() {
            "AT" => {}
            "ATE0" => self.echo = false,
            "ATE1" => self.echo = true,
            "ATI" => {
                self.push_line("");
                self.push_line("EC200U");
                self.push_line("Revision: LTE_1.0");
            }
            "AT+CPIN?" => {
                self.push_line("");
                self.push_line("+CPIN: READY");
            }
            "AT+CSQ" => {
                self.drift_signal();
                let ber: u8 = self.rng.gen_range(0..=2);
                let report = format!("+CSQ: {},{}", self.rssi, ber);
                self.push_line("");
                self.push_line(&report);
            }
            _ => {
                self.push_line("");
                self.push_line("ERROR");
                return;
            }
        }

        self.push_line("");
        self.push_line("OK");
    }

    fn drift_signal(&mut self) {
        let step: i16 = self.rng.gen_range(-2..=2);
        let next = (i16::from(self.rssi) + step).clamp(RSSI_MIN, RSSI_MAX);
        self.rssi = next as u8;
    }
}

impl Transport for SimulatedModem {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.rx.extend_from_slice(data);
        while let Some(pos) = self.rx.iter().position(|&b| b == b'\r' || b == b'\n') {
            let raw: Vec<u8> = self.rx.drain(..=pos).collect();
            let command = String::from_utf8_lossy(&raw).trim().to_string();
            if !command.is_empty() {
                self.respond(&command);
            }
        }
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        match self.tx.pop_front() {
            Some(line) => Ok(Some(line)),
            None => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        self.tx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(modem: &mut SimulatedModem) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(raw) = modem.tx.pop_front() {
            lines.push(String::from_utf8(raw).unwrap().trim().to_string());
        }
        lines
    }

    #[test]
    fn test_echo_until_disabled() {
        let mut modem = SimulatedModem::with_seed(1);
        modem.write_all(b"AT\r\n").unwrap();
        assert_eq!(drain(&mut modem), vec!["AT", "", "OK"]);

        modem.write_all(b"ATE0\r\n").unwrap();
        assert_eq!(drain(&mut modem), vec!["ATE0", "", "OK"]);

        modem.write_all(b"AT\r\n").unwrap();
        assert_eq!(drain(&mut modem), vec!["", "OK"]);
    }

    #[test]
    fn test_module_info_and_sim() {
        let mut modem = SimulatedModem::with_seed(1);
        modem.write_all(b"ATE0\r\n").unwrap();
        drain(&mut modem);

        modem.write_all(b"ATI\r\n").unwrap();
        assert_eq!(
            drain(&mut modem),
            vec!["", "EC200U", "Revision: LTE_1.0", "", "OK"]
        );

        modem.write_all(b"AT+CPIN?\r\n").unwrap();
        assert_eq!(drain(&mut modem), vec!["", "+CPIN: READY", "", "OK"]);
    }

    #[test]
    fn test_signal_stays_in_range() {
        let mut modem = SimulatedModem::with_seed(42);
        for _ in 0..500 {
            modem.write_all(b"AT+CSQ\r\n").unwrap();
            let rssi = modem.rssi();
            assert!((5..=31).contains(&rssi), "RSSI {} out of range", rssi);
        }
    }

    #[test]
    fn test_unknown_command_errors() {
        let mut modem = SimulatedModem::with_seed(1);
        modem.write_all(b"AT+QENG=\"servingcell\"\r\n").unwrap();
        let lines = drain(&mut modem);
        assert_eq!(lines.last().map(String::as_str), Some("ERROR"));
    }

    #[test]
    fn test_command_split_across_writes() {
        let mut modem = SimulatedModem::with_seed(1);
        modem.write_all(b"A").unwrap();
        assert!(modem.tx.is_empty());
        modem.write_all(b"T\r\n").unwrap();
        assert_eq!(drain(&mut modem), vec!["AT", "", "OK"]);
    }

    #[test]
    fn test_backend_rejects_unknown_port() {
        let backend = SimulatedBackend::with_seed(7);
        assert_eq!(backend.list_ports().len(), 3);
        assert!(backend
            .open("/dev/ttyS9", 115200, Duration::from_secs(1))
            .is_err());
        assert!(backend
            .open("COM3", 115200, Duration::from_secs(1))
            .is_ok());
    }
}
