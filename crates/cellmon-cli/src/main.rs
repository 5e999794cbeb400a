//! Console signal monitor
//!
//! Finds the modem's AT port, prints module and SIM details, then reports
//! signal quality on a fixed interval until interrupted.

use anyhow::{anyhow, Context, Result};
use cellmon_core::protocol::ModemError;
use cellmon_core::telemetry::{SignalReading, TelemetryOutcome};
use cellmon_core::{ModemConfig, ModemManager};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cellmon", version, about = "AT-command cellular modem monitor")]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "CELLMON_CONFIG")]
    config: Option<PathBuf>,

    /// Use this port instead of scanning
    #[arg(long)]
    port: Option<String>,

    /// Talk to a simulated modem instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// Signal polling interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Print one JSON status snapshot and exit
    #[arg(long, conflicts_with = "scan")]
    once: bool,

    /// Probe all candidate ports, print the scan report and exit
    #[arg(long)]
    scan: bool,

    /// Log filter, e.g. `info` or `cellmon_core=debug`
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

impl Args {
    fn load_config(&self) -> Result<ModemConfig> {
        let mut config = match &self.config {
            Some(path) => ModemConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ModemConfig::default(),
        };
        if let Some(port) = &self.port {
            config.port = Some(port.clone());
        }
        if self.simulate {
            config.simulation = true;
        }
        if let Some(ms) = self.interval_ms {
            config.poll_interval_ms = ms;
        }
        Ok(config)
    }
}

/// Run a blocking manager call off the async runtime
async fn blocking<T, F>(manager: &Arc<ModemManager>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&ModemManager) -> T + Send + 'static,
{
    let manager = Arc::clone(manager);
    tokio::task::spawn_blocking(move || f(&manager))
        .await
        .context("modem task panicked")
}

fn print_signal(outcome: &TelemetryOutcome) {
    match outcome {
        TelemetryOutcome::Signal { reading } => match reading {
            SignalReading::Parsed(quality) => println!("Signal: {}", quality),
            SignalReading::Raw(line) => println!("Signal: {}", line),
            SignalReading::NoData => println!("Signal: OK (No data)"),
        },
        TelemetryOutcome::Failed { response } => {
            warn!("Command failed ({}): {:?}", response.status, response.lines);
        }
    }
}

async fn initialize(manager: &Arc<ModemManager>) -> Result<()> {
    println!("\n--- Initialization ---");
    let report = blocking(manager, |m| m.initialize()).await??;
    match &report.module_info {
        Some(info) => println!("Module Info: {:?}", info.payload()),
        None => println!("Module Info: (not queried)"),
    }
    match (report.sim_state(), &report.sim) {
        (Some(state), _) => println!("SIM Status: {:?}", state),
        (None, Some(sim)) => println!("SIM Status: {:?}", sim.lines),
        (None, None) => println!("SIM Status: (not queried)"),
    }
    Ok(())
}

async fn poll(manager: &Arc<ModemManager>) -> Result<()> {
    match blocking(manager, |m| m.poll_signal()).await? {
        Ok(outcome) => print_signal(&outcome),
        Err(ModemError::NotConnected) => {
            // The session was closed by a communication error
            warn!("Modem lost, reconnecting");
            match blocking(manager, |m| m.connect()).await? {
                Ok(info) => {
                    info!(port = %info.port, "Reconnected");
                    initialize(manager).await?;
                }
                Err(e) => warn!("Reconnect failed: {}", e),
            }
        }
        Err(e) => warn!("Poll failed: {}", e),
    }
    Ok(())
}

/// Poll until `shutdown` resolves, then close the session
async fn monitor<S>(manager: Arc<ModemManager>, shutdown: S) -> Result<()>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    initialize(&manager).await?;

    println!("\n--- Starting Signal Monitor (Ctrl+C to stop) ---");
    let mut ticker = tokio::time::interval(manager.config().poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }
        // A poll in flight keeps running on its blocking thread; the session
        // lock is released when it finishes
        tokio::select! {
            _ = &mut shutdown => break,
            polled = poll(&manager) => polled?,
        }
    }

    println!("\nStopping...");
    blocking(&manager, |m| m.disconnect()).await?;
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl+C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .with_context(|| format!("invalid log filter {:?}", args.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.load_config()?;
    let manager = Arc::new(ModemManager::from_config(config)?);

    if args.scan {
        let report = blocking(&manager, |m| m.scan()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Scanning for AT command port...");
    let info = match blocking(&manager, |m| m.connect()).await? {
        Ok(info) => info,
        Err(ModemError::NotFound) => {
            return Err(anyhow!(
                "Could not find a module responding to AT commands. \
                 Check your USB connection and power supply."
            ));
        }
        Err(e) => return Err(e).context("connecting to modem"),
    };
    println!("Connected to {}", info.port);

    if args.once {
        let snapshot = blocking(&manager, |m| m.get_status()).await??;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        blocking(&manager, |m| m.disconnect()).await?;
        return Ok(());
    }

    monitor(manager, ctrl_c()).await
}
