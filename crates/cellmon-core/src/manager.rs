//! Connection management
//!
//! Owns the single AT session for one modem and serializes every exchange on
//! it. Callers share a [`ModemManager`] (it is `Send + Sync`) and never touch
//! the session directly.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::config::ModemConfig;
use crate::protocol::{
    AtSession, CommandResponse, ModemError, PortScanner, ResponseStatus, ScanReport,
    SerialBackend, SystemSerial,
};
use crate::simulation::SimulatedBackend;
use crate::telemetry::{self, InitReport, TelemetryOutcome, TelemetrySnapshot, CMD_ECHO_OFF};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session open
    Disconnected,
    /// Scanning, opening and initializing
    Connecting,
    /// Session open and ready
    Connected,
}

/// How `connect` was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectStatus {
    /// A new session was opened
    Connected,
    /// A session was already open; nothing was done
    AlreadyConnected,
}

/// Result of [`ModemManager::connect`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectInfo {
    /// Whether a new session was opened
    pub status: ConnectStatus,
    /// Port the session is attached to
    pub port: String,
}

/// Result of [`ModemManager::disconnect`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisconnectInfo {
    /// Always `disconnected`
    pub status: ConnectionState,
    /// Port that was closed, if a session was open
    pub closed_port: Option<String>,
}

struct Inner {
    state: ConnectionState,
    port: Option<String>,
    session: Option<AtSession>,
}

impl Inner {
    fn session_mut(&mut self) -> Result<&mut AtSession, ModemError> {
        match (self.state, self.session.as_mut()) {
            (ConnectionState::Connected, Some(session)) => Ok(session),
            _ => Err(ModemError::NotConnected),
        }
    }

    /// Close the session (dropping it closes the port) and forget the port
    fn teardown(&mut self) -> Option<String> {
        self.session = None;
        self.state = ConnectionState::Disconnected;
        self.port.take()
    }

    fn teardown_after(&mut self, response: &CommandResponse) {
        if response.status == ResponseStatus::CommError {
            let port = self.teardown();
            warn!(
                port = port.as_deref().unwrap_or("?"),
                "session closed after communication error: {}",
                response.lines.join("; ")
            );
        }
    }
}

/// Lifecycle manager for one modem
pub struct ModemManager {
    backend: Box<dyn SerialBackend>,
    config: ModemConfig,
    inner: Mutex<Inner>,
    /// Held for a whole connect attempt; `inner` is released while scanning
    connecting: Mutex<()>,
}

impl ModemManager {
    /// Create a manager on `backend` (not yet connected)
    pub fn new<B: SerialBackend + 'static>(backend: B, config: ModemConfig) -> Self {
        Self::with_backend(Box::new(backend), config)
    }

    /// Create a manager on an already boxed backend
    pub fn with_backend(backend: Box<dyn SerialBackend>, config: ModemConfig) -> Self {
        Self {
            backend,
            config,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                port: None,
                session: None,
            }),
            connecting: Mutex::new(()),
        }
    }

    /// Pick the real or simulated backend according to `config.simulation`
    pub fn from_config(config: ModemConfig) -> Result<Self, ModemError> {
        config.validate()?;
        let backend: Box<dyn SerialBackend> = if config.simulation {
            info!("Using simulated modem");
            Box::new(SimulatedBackend::new())
        } else {
            Box::new(SystemSerial)
        };
        Ok(Self::with_backend(backend, config))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Active configuration
    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Port of the open session, if any
    pub fn port(&self) -> Option<String> {
        self.lock().port.clone()
    }

    /// Probe all candidate ports without opening a session
    pub fn scan(&self) -> ScanReport {
        self.scanner().scan()
    }

    fn scanner(&self) -> PortScanner<'_> {
        PortScanner::new(
            self.backend.as_ref(),
            self.config.baud_rate,
            self.config.probe_timeout(),
        )
    }

    /// Discover the modem, open a session on it and disable echo.
    ///
    /// Idempotent: when already connected no scan is performed and the
    /// current port is returned. While the attempt runs `state()` reports
    /// `Connecting` and other operations fail with `NotConnected`; a
    /// `disconnect()` in that window abandons the attempt.
    pub fn connect(&self) -> Result<ConnectInfo, ModemError> {
        let _attempt = self
            .connecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        {
            let mut inner = self.lock();
            if inner.state == ConnectionState::Connected {
                if let Some(port) = inner.port.clone() {
                    return Ok(ConnectInfo {
                        status: ConnectStatus::AlreadyConnected,
                        port,
                    });
                }
            }
            inner.state = ConnectionState::Connecting;
        }

        let established = self.establish();

        let mut inner = self.lock();
        if inner.state != ConnectionState::Connecting {
            // Dropping the new session closes its port
            drop(established?);
            return Err(ModemError::ConnectionFailed(
                "connect abandoned by disconnect".into(),
            ));
        }
        match established {
            Ok(session) => {
                let port = session.port().to_string();
                inner.session = Some(session);
                inner.port = Some(port.clone());
                inner.state = ConnectionState::Connected;
                info!(port = %port, "Connected");
                Ok(ConnectInfo {
                    status: ConnectStatus::Connected,
                    port,
                })
            }
            Err(e) => {
                inner.teardown();
                Err(e)
            }
        }
    }

    fn establish(&self) -> Result<AtSession, ModemError> {
        let port = match &self.config.port {
            Some(port) => port.clone(),
            None => self.scanner().find_at_port().ok_or(ModemError::NotFound)?,
        };

        info!(port = %port, "Connecting");
        let mut session = AtSession::open(self.backend.as_ref(), &port, &self.config)
            .map_err(|e| ModemError::ConnectionFailed(format!("{}: {}", port, e)))?;

        let echo_off = session.command(CMD_ECHO_OFF);
        match echo_off.status {
            ResponseStatus::Success => {}
            ResponseStatus::CommError => {
                return Err(ModemError::CommError(echo_off.lines.join("; ")));
            }
            status => warn!(port = %port, "{} returned {}, continuing", CMD_ECHO_OFF, status),
        }

        Ok(session)
    }

    /// Close the session; idempotent
    pub fn disconnect(&self) -> DisconnectInfo {
        let closed_port = self.lock().teardown();
        if let Some(port) = &closed_port {
            info!(port = %port, "Disconnected");
        }
        DisconnectInfo {
            status: ConnectionState::Disconnected,
            closed_port,
        }
    }

    /// Send a command with the configured deadline.
    ///
    /// Fails with [`ModemError::NotConnected`] without any I/O when no session
    /// is open. A `comm_error` response closes the session before returning.
    pub fn send(&self, command: &str) -> Result<CommandResponse, ModemError> {
        let mut inner = self.lock();
        let response = inner.session_mut()?.command(command);
        inner.teardown_after(&response);
        Ok(response)
    }

    /// Run the once-per-connection setup and report module and SIM details
    pub fn initialize(&self) -> Result<InitReport, ModemError> {
        let mut inner = self.lock();
        let report = telemetry::initialize(inner.session_mut()?);
        if let Some(failed) = report.comm_error().cloned() {
            inner.teardown_after(&failed);
        }
        Ok(report)
    }

    /// Issue one signal-quality query
    pub fn poll_signal(&self) -> Result<TelemetryOutcome, ModemError> {
        let mut inner = self.lock();
        let outcome = telemetry::poll_once(inner.session_mut()?);
        if let TelemetryOutcome::Failed { response } = &outcome {
            inner.teardown_after(response);
        }
        Ok(outcome)
    }

    /// Query module info, SIM status and signal in one go
    pub fn get_status(&self) -> Result<TelemetrySnapshot, ModemError> {
        let mut inner = self.lock();
        let snapshot = TelemetrySnapshot::collect(inner.session_mut()?);
        if let Some(failed) = snapshot.comm_error().cloned() {
            inner.teardown_after(&failed);
            return Err(ModemError::CommError(failed.lines.join("; ")));
        }
        Ok(snapshot)
    }
}

impl Drop for ModemManager {
    fn drop(&mut self) {
        let inner = self
            .inner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        inner.teardown();
    }
}
