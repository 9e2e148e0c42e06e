//! LibreSense command-line interface
//!
//! Thin front-end over [`libresense_core`]: argument parsing and output
//! formatting only, no protocol logic.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use libresense_core::channel::channel_info;
use libresense_core::discovery::{discover, DiscoveryConfig};
use libresense_core::fakedevice::FakeDeviceServer;
use libresense_core::protocol::{DeviceSession, SessionConfig, DEFAULT_PORT};
use libresense_core::store::{JsonStore, LogStore};

#[derive(Parser)]
#[command(name = "libresense", version)]
#[command(about = "Talk to L2P environmental measurement instruments")]
struct Cli {
    /// Hostname or address of the device (broadcast address for `discover`,
    /// bind address for `fake-server`)
    host: String,

    /// TCP port of the device
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Timeout for socket operations in seconds
    #[arg(short, long, default_value_t = 5.0)]
    timeout: f64,

    /// Log filter, e.g. `debug` or `libresense_core=trace`
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all possible measurement channels
    List,
    /// Get the value(s) of specific channel(s)
    Get {
        /// The selected channel(s), decimal or 0x-hex
        #[arg(required = true, value_parser = parse_channel)]
        channels: Vec<u16>,
    },
    /// Download the device logs and store them locally
    Download {
        /// File to store the logs in
        store_file: PathBuf,
    },
    /// Change or query global logging settings
    Logging {
        #[command(subcommand)]
        action: LoggingAction,
    },
    /// Enable logging for specific channel(s)
    Enable {
        #[arg(required = true, value_parser = parse_channel)]
        channels: Vec<u16>,
    },
    /// Disable logging for specific channel(s)
    Disable {
        #[arg(required = true, value_parser = parse_channel)]
        channels: Vec<u16>,
    },
    /// Broadcast a discovery request and list answering devices
    Discover,
    /// Serve recorded device traffic for protocol testing
    FakeServer {
        /// Communication log to replay
        log_file: PathBuf,
    },
}

#[derive(Subcommand)]
enum LoggingAction {
    /// Query the current logging status of the device
    Status,
    /// Start logging altogether on the device
    Start,
    /// Stop logging altogether on the device
    Stop,
    /// Clear the log history on the device
    Clear,
}

fn parse_channel(arg: &str) -> Result<u16, String> {
    let parsed = match arg.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => arg.parse(),
    };
    parsed.map_err(|_| format!("not a channel number: {arg}"))
}

fn open_session(cli: &Cli) -> Result<DeviceSession> {
    let mut config = SessionConfig::new(cli.host.clone());
    config.port = cli.port;
    config.timeout_ms = (cli.timeout * 1000.0) as u64;
    DeviceSession::open(config).context("could not open device session")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    match &cli.command {
        Command::List => {
            let mut session = open_session(&cli)?;
            for channel in session.available_channels().to_vec() {
                let enabled = session.get_channel_logging_state(channel)?;
                let info = channel_info(channel)
                    .with_context(|| format!("channel {channel} missing from channel table"))?;
                println!(
                    "Channel {:5} (0x{:04X}): {:22}  unit: {:4}  offset: {:5}  logging: {}",
                    channel,
                    channel,
                    info.name,
                    info.unit,
                    info.offset_range,
                    if enabled { "yes" } else { "no" }
                );
            }
        }
        Command::Get { channels } => {
            let mut session = open_session(&cli)?;
            if channels.len() > 1 {
                for value in session.multi_channel_value(channels)? {
                    match value.value {
                        Some(v) => println!("{v:.3}"),
                        None => println!("n/a (status {:#04x})", value.status),
                    }
                }
            } else {
                println!("{:.3}", session.channel_value(channels[0])?);
            }
        }
        Command::Download { store_file } => {
            let mut session = open_session(&cli)?;
            let device_id = session
                .device_id()
                .context("device reported no identifier")?
                .to_string();
            let mut store = JsonStore::open(store_file)?;
            let since = store.max_timestamps().get(&device_id).copied();
            let records = session.download_logs(since)?;
            println!("downloaded {} records from {}", records.len(), device_id);
            store.append_records(&device_id, records);
            store.persist()?;
        }
        Command::Logging { action } => {
            let mut session = open_session(&cli)?;
            match action {
                LoggingAction::Status => {
                    let state = session.get_logging_state()?;
                    println!(
                        "Logging is currently {}.",
                        if state { "enabled" } else { "disabled" }
                    );
                }
                LoggingAction::Start => session.set_logging_state(true)?,
                LoggingAction::Stop => session.set_logging_state(false)?,
                LoggingAction::Clear => {
                    session.clear_log()?;
                    println!("Clearing the log now. This will take a couple of minutes.");
                    println!("You cannot make requests to the device during that time.");
                    session.disconnect();
                }
            }
        }
        Command::Enable { channels } | Command::Disable { channels } => {
            let enable = matches!(cli.command, Command::Enable { .. });
            let mut session = open_session(&cli)?;
            for &channel in channels {
                session.set_channel_logging_state(channel, enable)?;
                info!(channel, enable, "channel logging state set");
            }
        }
        Command::Discover => {
            let broadcast: Ipv4Addr = cli
                .host
                .parse()
                .context("discover needs an IPv4 broadcast address as host")?;
            let config = DiscoveryConfig {
                broadcast_addr: broadcast,
                ..DiscoveryConfig::default()
            };
            let devices = discover(&config)?;
            if devices.is_empty() {
                bail!("no devices answered");
            }
            for (device, source) in devices {
                println!(
                    "{}  {}  (network {}/{}, gateway {}, answered from {})",
                    device.device_id,
                    device.address,
                    device.network.0,
                    device.network.1,
                    device.gateway,
                    source
                );
            }
        }
        Command::FakeServer { log_file } => {
            let mut server = FakeDeviceServer::bind((cli.host.as_str(), cli.port))?;
            let loaded = server.feed_with_communication_log(log_file)?;
            println!(
                "serving {} recorded exchanges on {}",
                loaded,
                server.local_addr()?
            );
            server.serve_forever()?;
        }
    }

    Ok(())
}
