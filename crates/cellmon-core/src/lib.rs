//! # cellmon Core Library
//!
//! Host-side control of cellular modems over their AT command port.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Discovery of the AT-responsive serial port among a modem's interfaces
//! - An AT session engine (framing, echo suppression, OK/ERROR/timeout detection)
//! - Signal quality, SIM and module identity telemetry
//! - A connection lifecycle manager that serializes access to the modem
//! - A simulated modem for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use cellmon_core::{ModemConfig, ModemManager};
//!
//! let manager = ModemManager::from_config(ModemConfig::default())?;
//! let info = manager.connect()?;
//! println!("Connected on {}", info.port);
//!
//! let status = manager.get_status()?;
//! println!("Signal: {:?}", status.signal_reading);
//! ```

pub mod config;
pub mod manager;
pub mod protocol;
pub mod simulation;
pub mod telemetry;

pub use config::ModemConfig;
pub use manager::{ConnectInfo, ConnectStatus, ConnectionState, DisconnectInfo, ModemManager};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ModemConfig;
    pub use crate::manager::{ConnectionState, ModemManager};
    pub use crate::protocol::{
        AtSession, CommandResponse, ModemError, PortScanner, ResponseStatus, SerialBackend,
        Transport,
    };
    pub use crate::simulation::SimulatedBackend;
    pub use crate::telemetry::{
        InitReport, SignalQuality, SignalReading, SimState, TelemetryOutcome, TelemetrySnapshot,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
