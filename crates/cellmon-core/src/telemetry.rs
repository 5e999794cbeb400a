//! Modem Telemetry
//!
//! Turns AT responses into structured readings: module identity (`ATI`),
//! SIM readiness (`AT+CPIN?`) and signal quality (`AT+CSQ`).
//!
//! Nothing here schedules anything. Callers decide how often to call
//! [`poll_once`]; [`DEFAULT_POLL_INTERVAL_MS`] is the usual cadence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::protocol::{AtSession, CommandResponse, ResponseStatus};

/// Usual signal polling cadence in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Disable command echo
pub const CMD_ECHO_OFF: &str = "ATE0";
/// Module identification
pub const CMD_MODULE_INFO: &str = "ATI";
/// SIM PIN status
pub const CMD_SIM_STATUS: &str = "AT+CPIN?";
/// Signal quality report
pub const CMD_SIGNAL_QUALITY: &str = "AT+CSQ";

const CSQ_PREFIX: &str = "+CSQ:";
const CPIN_PREFIX: &str = "+CPIN:";

/// Code reported for both RSSI and BER when the value is not known
pub const UNKNOWN_CODE: u8 = 99;

/// Signal quality as reported by `+CSQ: <rssi>,<ber>`.
///
/// Both values are modem codes, not physical units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalQuality {
    /// RSSI code: 0..=31, or 99 when unknown
    pub rssi: u8,
    /// Bit error rate code: 0..=7, or 99 when unknown
    pub ber: u8,
}

impl SignalQuality {
    /// True if the modem could not measure signal strength
    pub fn is_rssi_unknown(&self) -> bool {
        self.rssi == UNKNOWN_CODE
    }

    /// True if the modem could not measure the bit error rate
    pub fn is_ber_unknown(&self) -> bool {
        self.ber == UNKNOWN_CODE
    }

    /// Received signal strength in dBm (`-113 + 2 * rssi`), if the code is in 0..=31
    pub fn rssi_dbm(&self) -> Option<i32> {
        (self.rssi <= 31).then(|| -113 + 2 * i32::from(self.rssi))
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rssi={} ber={}", self.rssi, self.ber)?;
        if let Some(dbm) = self.rssi_dbm() {
            write!(f, " ({} dBm)", dbm)?;
        }
        Ok(())
    }
}

/// Error returned when a `+CSQ:` line cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSignalError(String);

impl fmt::Display for ParseSignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed signal report: {:?}", self.0)
    }
}

impl std::error::Error for ParseSignalError {}

impl FromStr for SignalQuality {
    type Err = ParseSignalError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let err = || ParseSignalError(line.to_string());
        let (_, values) = line.split_once(':').ok_or_else(err)?;
        let (rssi, ber) = values.split_once(',').ok_or_else(err)?;
        Ok(Self {
            rssi: rssi.trim().parse().map_err(|_| err())?,
            ber: ber.trim().parse().map_err(|_| err())?,
        })
    }
}

/// SIM readiness from `+CPIN: <code>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimState {
    /// No PIN pending
    Ready,
    /// Waiting for SIM PIN
    PinRequired,
    /// Waiting for SIM PUK
    PukRequired,
    /// Any other code, verbatim
    Other(String),
}

impl SimState {
    /// Parse the first `+CPIN:` line of a response
    pub fn from_response(response: &CommandResponse) -> Option<Self> {
        let line = response.find_line(CPIN_PREFIX)?;
        let (_, code) = line.split_once(':')?;
        Some(match code.trim() {
            "READY" => SimState::Ready,
            "SIM PIN" => SimState::PinRequired,
            "SIM PUK" => SimState::PukRequired,
            other => SimState::Other(other.to_string()),
        })
    }
}

/// What a successful `AT+CSQ` yielded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SignalReading {
    /// A well-formed `+CSQ:` line
    Parsed(SignalQuality),
    /// A `+CSQ:` line that could not be parsed, verbatim
    Raw(String),
    /// The command succeeded without a `+CSQ:` line
    NoData,
}

impl SignalReading {
    /// Extract the reading from a successful response
    pub fn from_response(response: &CommandResponse) -> Self {
        match response.find_line(CSQ_PREFIX) {
            Some(line) => match line.parse::<SignalQuality>() {
                Ok(quality) => SignalReading::Parsed(quality),
                Err(e) => {
                    debug!("{}", e);
                    SignalReading::Raw(line.to_string())
                }
            },
            None => SignalReading::NoData,
        }
    }

    /// Parsed values, if any
    pub fn quality(&self) -> Option<SignalQuality> {
        match self {
            SignalReading::Parsed(q) => Some(*q),
            _ => None,
        }
    }
}

/// Result of one signal poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TelemetryOutcome {
    /// `AT+CSQ` completed with `OK`
    Signal {
        /// What the response contained
        reading: SignalReading,
    },
    /// Any non-success status; a warning, not a fatal error
    Failed {
        /// The response as received, partial lines included
        response: CommandResponse,
    },
}

impl TelemetryOutcome {
    /// Classify an `AT+CSQ` response
    pub fn from_response(response: CommandResponse) -> Self {
        if response.is_success() {
            TelemetryOutcome::Signal {
                reading: SignalReading::from_response(&response),
            }
        } else {
            warn!(
                "signal query failed ({}): {:?}",
                response.status, response.lines
            );
            TelemetryOutcome::Failed { response }
        }
    }

    /// True if the serial line failed during the poll
    pub fn is_comm_error(&self) -> bool {
        matches!(
            self,
            TelemetryOutcome::Failed { response } if response.status == ResponseStatus::CommError
        )
    }
}

/// Issue one signal-quality query
pub fn poll_once(session: &mut AtSession) -> TelemetryOutcome {
    TelemetryOutcome::from_response(session.command(CMD_SIGNAL_QUALITY))
}

/// Responses gathered while bringing up a fresh connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitReport {
    /// `ATE0`
    pub echo_off: CommandResponse,
    /// `ATI`; `None` if it was not sent because the line failed earlier
    pub module_info: Option<CommandResponse>,
    /// `AT+CPIN?`; `None` if it was not sent because the line failed earlier
    pub sim: Option<CommandResponse>,
}

impl InitReport {
    /// The response that hit an I/O failure, if any
    pub fn comm_error(&self) -> Option<&CommandResponse> {
        [Some(&self.echo_off), self.module_info.as_ref(), self.sim.as_ref()]
            .into_iter()
            .flatten()
            .find(|r| r.status == ResponseStatus::CommError)
    }

    /// Parsed SIM state, if the SIM query succeeded
    pub fn sim_state(&self) -> Option<SimState> {
        self.sim.as_ref().and_then(SimState::from_response)
    }
}

/// Run the once-per-connection setup: echo off, then module and SIM queries.
///
/// Failures of the informational queries are reported, not fatal. After an
/// I/O failure no further commands are attempted.
pub fn initialize(session: &mut AtSession) -> InitReport {
    let echo_off = session.command(CMD_ECHO_OFF);
    match echo_off.status {
        ResponseStatus::Success => {}
        ResponseStatus::CommError => {
            return InitReport {
                echo_off,
                module_info: None,
                sim: None,
            };
        }
        status => warn!("echo disable returned {}", status),
    }

    let module_info = session.command(CMD_MODULE_INFO);
    let sim = (module_info.status != ResponseStatus::CommError)
        .then(|| session.command(CMD_SIM_STATUS));

    InitReport {
        echo_off,
        module_info: Some(module_info),
        sim,
    }
}

/// Point-in-time view of module identity, SIM and signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Port the modem is attached to
    pub port: String,
    /// `ATI` response
    pub info: CommandResponse,
    /// `AT+CPIN?` response
    pub sim: CommandResponse,
    /// `AT+CSQ` response
    pub signal: CommandResponse,
    /// Parsed SIM state, when available
    pub sim_state: Option<SimState>,
    /// Parsed signal reading, when `AT+CSQ` succeeded
    pub signal_reading: Option<SignalReading>,
}

impl TelemetrySnapshot {
    /// Query identity, SIM and signal in that order, stopping after an I/O failure
    pub fn collect(session: &mut AtSession) -> Self {
        let info = session.command(CMD_MODULE_INFO);
        let sim = match info.status {
            ResponseStatus::CommError => info.clone(),
            _ => session.command(CMD_SIM_STATUS),
        };
        let signal = match sim.status {
            ResponseStatus::CommError => sim.clone(),
            _ => session.command(CMD_SIGNAL_QUALITY),
        };

        Self {
            timestamp: Utc::now(),
            port: session.port().to_string(),
            sim_state: SimState::from_response(&sim),
            signal_reading: signal
                .is_success()
                .then(|| SignalReading::from_response(&signal)),
            info,
            sim,
            signal,
        }
    }

    /// The first response that hit an I/O failure
    pub fn comm_error(&self) -> Option<&CommandResponse> {
        [&self.info, &self.sim, &self.signal]
            .into_iter()
            .find(|r| r.status == ResponseStatus::CommError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ok(lines: &[&str]) -> CommandResponse {
        CommandResponse::new(
            ResponseStatus::Success,
            lines.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_parse_csq() {
        let q: SignalQuality = "+CSQ: 17,2".parse().unwrap();
        assert_eq!(q, SignalQuality { rssi: 17, ber: 2 });
        assert_eq!(q.rssi_dbm(), Some(-79));
    }

    #[test]
    fn test_parse_csq_unknown_sentinels() {
        let q: SignalQuality = "+CSQ: 99,99".parse().unwrap();
        assert!(q.is_rssi_unknown());
        assert!(q.is_ber_unknown());
        assert_eq!(q.rssi_dbm(), None);
    }

    #[test]
    fn test_parse_csq_rejects_garbage() {
        assert!("+CSQ: ,".parse::<SignalQuality>().is_err());
        assert!("+CSQ: 17".parse::<SignalQuality>().is_err());
        assert!("+CSQ 17,2".parse::<SignalQuality>().is_err());
        assert!("+CSQ: 300,2".parse::<SignalQuality>().is_err());
    }

    #[test]
    fn test_rssi_dbm_bounds() {
        assert_eq!(SignalQuality { rssi: 0, ber: 0 }.rssi_dbm(), Some(-113));
        assert_eq!(SignalQuality { rssi: 31, ber: 0 }.rssi_dbm(), Some(-51));
        assert_eq!(SignalQuality { rssi: 32, ber: 0 }.rssi_dbm(), None);
    }

    #[test]
    fn test_reading_from_success() {
        let reading = SignalReading::from_response(&ok(&["+CSQ: 5,99", "OK"]));
        assert_eq!(reading, SignalReading::Parsed(SignalQuality { rssi: 5, ber: 99 }));
    }

    #[test]
    fn test_reading_raw_when_unparsable() {
        let reading = SignalReading::from_response(&ok(&["+CSQ: weak", "OK"]));
        assert_eq!(reading, SignalReading::Raw("+CSQ: weak".to_string()));
    }

    #[test]
    fn test_reading_no_data() {
        let reading = SignalReading::from_response(&ok(&["OK"]));
        assert_eq!(reading, SignalReading::NoData);
    }

    #[test]
    fn test_outcome_failed_keeps_partial_lines() {
        let response = CommandResponse::new(
            ResponseStatus::Timeout,
            vec!["+CSQ: 12,0".to_string()],
        );
        let outcome = TelemetryOutcome::from_response(response.clone());
        assert_eq!(outcome, TelemetryOutcome::Failed { response });
        assert!(!outcome.is_comm_error());
    }

    #[test]
    fn test_sim_state_parsing() {
        assert_eq!(
            SimState::from_response(&ok(&["+CPIN: READY", "OK"])),
            Some(SimState::Ready)
        );
        assert_eq!(
            SimState::from_response(&ok(&["+CPIN: SIM PIN", "OK"])),
            Some(SimState::PinRequired)
        );
        assert_eq!(
            SimState::from_response(&ok(&["+CPIN: PH-SIM PIN", "OK"])),
            Some(SimState::Other("PH-SIM PIN".to_string()))
        );
        assert_eq!(
            SimState::from_response(&CommandResponse::new(
                ResponseStatus::Error,
                vec!["+CME ERROR: 10".to_string()]
            )),
            None
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = TelemetryOutcome::Signal {
            reading: SignalReading::Parsed(SignalQuality { rssi: 17, ber: 2 }),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "outcome": "signal",
                "reading": { "kind": "parsed", "value": { "rssi": 17, "ber": 2 } }
            })
        );
    }
}
