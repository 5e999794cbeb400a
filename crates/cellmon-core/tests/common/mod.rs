//! Scripted serial devices for integration tests

#![allow(dead_code)]

use cellmon_core::protocol::{AtSession, ModemError, PortInfo, SerialBackend, Transport};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Something that happened on the fake wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(String),
    Write(String, Vec<u8>),
    Close(String),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// Behaviour of one fake device
#[derive(Clone, Default)]
pub struct FakeDevice {
    /// Lines sent back for each command (matched on the trimmed command text)
    pub replies: HashMap<String, Vec<String>>,
    /// Echo each command before replying
    pub echo: bool,
    /// Opening the port fails as if another process held it
    pub busy: bool,
    /// When set, every write and read fails with an I/O error
    pub unplugged: Arc<AtomicBool>,
    /// Writes succeed but every read fails
    pub fail_reads: bool,
    /// Input reset succeeds but every write fails
    pub fail_writes: bool,
}

impl FakeDevice {
    /// A device that answers `AT` and `ATE0` with `OK`
    pub fn modem() -> Self {
        Self::default().reply("AT", &["OK"]).reply("ATE0", &["OK"])
    }

    /// A device that never answers
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn busy() -> Self {
        Self {
            busy: true,
            ..Self::default()
        }
    }

    pub fn reply(mut self, command: &str, lines: &[&str]) -> Self {
        self.replies.insert(
            command.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn unplug(&self) {
        self.unplugged.store(true, Ordering::SeqCst);
    }
}

/// Route `tracing` output through the test harness; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cellmon_core=debug")
        .with_test_writer()
        .try_init();
}

/// Backend exposing a fixed list of fake devices
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub devices: Vec<(String, FakeDevice)>,
    pub events: EventLog,
}

impl FakeBackend {
    pub fn new(devices: Vec<(&str, FakeDevice)>) -> Self {
        init_tracing();
        Self {
            devices: devices
                .into_iter()
                .map(|(name, device)| (name.to_string(), device))
                .collect(),
            events: EventLog::default(),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Number of times `port` was opened
    pub fn open_count(&self, port: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Open(p) if p == port))
            .count()
    }

    /// Everything written to `port`, concatenated
    pub fn written(&self, port: &str) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(p, bytes) if p == port => Some(bytes),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl SerialBackend for FakeBackend {
    fn list_ports(&self) -> Vec<PortInfo> {
        self.devices
            .iter()
            .map(|(name, _)| PortInfo::named(name.clone()))
            .collect()
    }

    fn open(
        &self,
        port: &str,
        _baud_rate: u32,
        _timeout: Duration,
    ) -> Result<Box<dyn Transport>, ModemError> {
        let device = self
            .devices
            .iter()
            .find(|(name, _)| name == port)
            .map(|(_, device)| device.clone())
            .ok_or_else(|| ModemError::SerialError(format!("{}: no such device", port)))?;

        if device.busy {
            return Err(ModemError::SerialError(format!("{}: Device or resource busy", port)));
        }

        self.events.lock().unwrap().push(Event::Open(port.to_string()));
        Ok(Box::new(FakeTransport::new(port, device, self.events.clone())))
    }
}

/// Transport that replays [`FakeDevice::replies`]
pub struct FakeTransport {
    port: String,
    device: FakeDevice,
    outbox: VecDeque<Vec<u8>>,
    events: EventLog,
}

impl FakeTransport {
    pub fn new(port: &str, device: FakeDevice, events: EventLog) -> Self {
        Self {
            port: port.to_string(),
            device,
            outbox: VecDeque::new(),
            events,
        }
    }

    fn check_plugged(&self) -> io::Result<()> {
        if self.device.unplugged.load(Ordering::SeqCst) {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"))
        } else {
            Ok(())
        }
    }
}

impl Transport for FakeTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.check_plugged()?;
        if self.device.fail_writes {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"));
        }
        self.events
            .lock()
            .unwrap()
            .push(Event::Write(self.port.clone(), data.to_vec()));

        let command = String::from_utf8_lossy(data).trim().to_string();
        if self.device.echo {
            self.outbox.push_back(format!("{}\r\n", command).into_bytes());
        }
        if let Some(lines) = self.device.replies.get(&command) {
            for line in lines {
                self.outbox.push_back(format!("{}\r\n", line).into_bytes());
            }
        }
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        self.check_plugged()?;
        if self.device.fail_reads {
            return Err(io::Error::new(io::ErrorKind::Other, "read failed: I/O error"));
        }
        match self.outbox.pop_front() {
            Some(line) => Ok(Some(line)),
            None => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        self.check_plugged()?;
        self.outbox.clear();
        Ok(())
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        if let Ok(mut events) = self.events.lock() {
            events.push(Event::Close(self.port.clone()));
        }
    }
}

/// A session on a fresh fake device, with its event log
pub fn session_on(device: FakeDevice, timeout: Duration) -> (AtSession, EventLog) {
    init_tracing();
    let events = EventLog::default();
    let transport = FakeTransport::new("/dev/ttyUSB2", device, events.clone());
    let session = AtSession::new(
        "/dev/ttyUSB2",
        Box::new(transport),
        timeout,
        timeout,
    );
    (session, events)
}
