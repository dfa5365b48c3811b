use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use recorder_client::{
    command::{dispatch, Command},
    config::{ConfigPaths, RuntimeSettings, Topology},
    registry::Registry,
    session::LoggingConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "recorder-client")]
#[command(about = "Mirrors calls, radio legs and briefings to ED-137 voice recorders")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Recorder channel configuration
    #[arg(long, default_value = "config/rec-config/rec.cfg")]
    pub rec_cfg: PathBuf,

    /// Fallback for --rec-cfg
    #[arg(long, default_value = "/home/cwp/opconsole/config/rec-config/rec.cfg")]
    pub alt_rec_cfg: PathBuf,

    /// Device/system topology configuration
    #[arg(long, default_value = "config/system/device_system.cfg")]
    pub device_system: PathBuf,

    /// Fallback for --device-system
    #[arg(long, default_value = "/home/cwp/opconsole/config/system/device_system.cfg")]
    pub alt_device_system: PathBuf,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Audio forwarding cadence in milliseconds
    #[arg(long, default_value = "200")]
    pub poll_interval: u64,

    /// Capture read window in milliseconds
    #[arg(long, default_value = "30")]
    pub read_window: u64,

    /// Hold/radio-off debounce delay in milliseconds
    #[arg(long, default_value = "5000")]
    pub dormancy_delay: u64,

    /// Upper bound on draining entities during reload, in milliseconds
    #[arg(long, default_value = "4000")]
    pub reload_timeout: u64,

    /// Entity mailbox depth (radio entities get twice this)
    #[arg(long, default_value = "10")]
    pub mailbox_capacity: usize,

    /// Address the audio capture sockets bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub listen_host: String,

    /// Statistics report interval in seconds
    #[arg(long, default_value = "60")]
    pub stats_interval: u64,
}

impl Args {
    fn paths(&self) -> ConfigPaths {
        ConfigPaths {
            rec_cfg: self.rec_cfg.clone(),
            alt_rec_cfg: self.alt_rec_cfg.clone(),
            device_system: self.device_system.clone(),
            alt_device_system: self.alt_device_system.clone(),
        }
    }

    fn settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            poll_interval: Duration::from_millis(self.poll_interval),
            read_window: Duration::from_millis(self.read_window),
            dormancy_delay: Duration::from_millis(self.dormancy_delay),
            reload_timeout: Duration::from_millis(self.reload_timeout),
            mailbox_capacity: self.mailbox_capacity.max(1),
            listen_host: self.listen_host.clone(),
            ..RuntimeSettings::default()
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Recorder client driven by JSON commands on stdin
pub struct RecorderService {
    registry: Arc<Registry>,
    paths: ConfigPaths,
    stats_interval: Duration,
}

impl RecorderService {
    pub async fn new(args: &Args) -> Result<Self> {
        let paths = args.paths();
        let topology = match paths.load().await {
            Some(topology) => topology,
            None => {
                warn!("No configuration source readable, starting without recording channels");
                Topology::default()
            }
        };
        info!("{}", topology);

        let registry = Registry::new(topology, Arc::new(LoggingConnector), args.settings());
        Ok(Self {
            registry,
            paths,
            stats_interval: Duration::from_secs(args.stats_interval.max(1)),
        })
    }

    /// Run until Ctrl+C or SIGTERM, then stop every live entity.
    pub async fn start(&self) -> Result<()> {
        let command_handle = self.spawn_command_reader();
        let stats_handle = self.spawn_stats_reporter();

        info!("Recorder client started");

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C signal");
            }
            _ = wait_for_term_signal() => {
                info!("Received TERM signal");
            }
        }

        command_handle.abort();
        stats_handle.abort();

        if !self.registry.stop_all_calls().await {
            warn!("Some entities did not finish before shutdown");
        }
        info!("Recorder client stopped");
        Ok(())
    }

    fn spawn_command_reader(&self) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let paths = self.paths.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Error reading commands: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match Command::parse(&line) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!("Skipping command line: {}", e);
                        continue;
                    }
                };
                debug!("Command: {:?}", command);
                match dispatch(&registry, &paths, command).await {
                    Ok(Some(output)) => println!("{}", output),
                    Ok(None) => {}
                    Err(e) => error!("Command failed: {}", e),
                }
            }
            info!("Command input closed");
        })
    }

    fn spawn_stats_reporter(&self) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let period = self.stats_interval;

        tokio::spawn(async move {
            let mut interval = interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let stats = registry.stats();
                let processed: u64 = stats.iter().map(|s| s.events_processed).sum();
                let dropped: u64 = stats.iter().map(|s| s.events_dropped).sum();
                let packets: u64 = stats.iter().map(|s| s.packets_forwarded).sum();
                info!(
                    "Service stats: entities={}, sessions={}, events_processed={}, events_dropped={}, packets_forwarded={}",
                    stats.len(),
                    registry.session_count(),
                    processed,
                    dropped,
                    packets
                );
            }
        })
    }
}

/// Wait for TERM signal (Unix only)
#[cfg(unix)]
async fn wait_for_term_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    if let Ok(mut stream) = signal(SignalKind::terminate()) {
        stream.recv().await;
    }
}

#[cfg(not(unix))]
async fn wait_for_term_signal() {
    futures::future::pending::<()>().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level: tracing::Level = args.log_level.into();
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    info!("Starting Recorder Client v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Recorder config: {} (fallback {})", args.rec_cfg.display(), args.alt_rec_cfg.display());
    info!(
        "  Device system: {} (fallback {})",
        args.device_system.display(),
        args.alt_device_system.display()
    );
    info!("  Dormancy delay: {}ms", args.dormancy_delay);
    info!("  Log level: {:?}", args.log_level);

    let service = RecorderService::new(&args)
        .await
        .context("Failed to create recorder service")?;

    if let Err(e) = service.start().await {
        error!("Service error: {}", e);
        return Err(e);
    }

    Ok(())
}
