//! robot-channel command-line entry point.
//!
//! A thin front end over the library, mainly useful for checking that a robot
//! is reachable and answering.
//!
//! # Usage
//!
//! ```text
//! robot-channel [--config PATH] [--family FAMILY] <COMMAND>
//!
//! Commands:
//!   scan   List the robots of the configured family on the LAN
//!   find   Wait for one robot whose name ends with NAME
//!   send   Send one raw command to a robot and print the reply
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable               | Description                              |
//! |------------------------|------------------------------------------|
//! | `ROBOT_CHANNEL_CONFIG` | Path of the TOML config file             |
//! | `ROBOT_FAMILY`         | Robot family (`dedu`, `mini`, `edu`, `kor`) |
//! | `RUST_LOG`             | `tracing` filter, overrides `log_level`  |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use robot_channel::domain::config::default_config_path;
use robot_channel::{
    ChannelConfig, DeviceDiscovery, MdnsBrowser, RequestOutcome, RobotConnection,
};
use robot_core::{CommandId, RobotFamily};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Client for the robot command channel.
#[derive(Debug, Parser)]
#[command(
    name = "robot-channel",
    about = "Discover robots on the LAN and talk to their command channel",
    version
)]
struct Cli {
    /// Config file; defaults to the platform config directory.
    #[arg(long, env = "ROBOT_CHANNEL_CONFIG")]
    config: Option<PathBuf>,

    /// Robot family to scan for, overriding the config file.
    #[arg(long, env = "ROBOT_FAMILY")]
    family: Option<RobotFamily>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the robots of the configured family.
    Scan {
        /// Scan duration in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Print the devices as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Wait for a robot whose name ends with NAME.
    Find {
        name: String,
        /// Give up after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Send one command and print the reply payload as base64.
    Send {
        /// Robot address.
        #[arg(long)]
        host: String,
        /// Command channel port.
        #[arg(long)]
        port: Option<u16>,
        /// Numeric command identifier.
        #[arg(long)]
        command: CommandId,
        /// Request payload, base64-encoded.
        #[arg(long, default_value = "")]
        payload: String,
        /// Reply timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Send fire-and-forget and exit without waiting for a reply.
        #[arg(long)]
        no_reply: bool,
    },
}

impl Cli {
    /// Loads the config file and applies command-line overrides.
    fn resolve_config(&self) -> anyhow::Result<ChannelConfig> {
        let path = match &self.config {
            Some(path) => Some(path.clone()),
            None => default_config_path().ok(),
        };
        let mut config = match path {
            Some(path) => ChannelConfig::load(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ChannelConfig::default(),
        };
        if let Some(family) = self.family {
            config.robot_family = family;
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    match cli.command {
        Command::Scan { timeout, json } => {
            let timeout = timeout.map(Duration::from_secs).unwrap_or(config.scan_timeout());
            scan(&config, timeout, json).await
        }
        Command::Find { name, timeout } => {
            let timeout = timeout.map(Duration::from_secs).unwrap_or(config.scan_timeout());
            find(&config, &name, timeout).await
        }
        Command::Send {
            host,
            port,
            command,
            payload,
            timeout_ms,
            no_reply,
        } => {
            let payload = STANDARD
                .decode(payload.trim())
                .context("--payload is not valid base64")?;
            let port = port.unwrap_or(config.port);
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(config.request_timeout());
            send(&config, &host, port, command, &payload, (!no_reply).then_some(timeout)).await
        }
    }
}

fn discovery(config: &ChannelConfig) -> anyhow::Result<DeviceDiscovery> {
    let browser = MdnsBrowser::new().context("failed to start mDNS")?;
    Ok(DeviceDiscovery::new(Arc::new(browser), config.robot_family))
}

async fn scan(config: &ChannelConfig, timeout: Duration, json: bool) -> anyhow::Result<()> {
    info!(family = %config.robot_family, ?timeout, "scanning");
    let devices = discovery(config)?.list_all(timeout).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else if devices.is_empty() {
        println!("no {} robots found", config.robot_family);
    } else {
        for device in &devices {
            println!("{device}");
        }
    }
    Ok(())
}

async fn find(config: &ChannelConfig, name: &str, timeout: Duration) -> anyhow::Result<()> {
    match discovery(config)?.find_by_name(name, timeout).await {
        Some(device) => {
            println!("{device}");
            Ok(())
        }
        None => bail!("no {} robot matching '{name}' within {timeout:?}", config.robot_family),
    }
}

async fn send(
    config: &ChannelConfig,
    host: &str,
    port: u16,
    command: CommandId,
    payload: &[u8],
    reply_timeout: Option<Duration>,
) -> anyhow::Result<()> {
    let conn = RobotConnection::new();
    conn.connect(host, port, config.connect_timeout())
        .await
        .with_context(|| format!("failed to connect to {host}:{port}"))?;

    let result = match reply_timeout {
        None => conn
            .send_fire_and_forget(command, payload)
            .await
            .map_err(anyhow::Error::from),
        Some(timeout) => match conn.send_and_await(command, payload, timeout).await {
            Ok(RequestOutcome::Success(reply)) => {
                println!("{}", STANDARD.encode(reply));
                Ok(())
            }
            Ok(RequestOutcome::Unsupported) => Err(anyhow::anyhow!(
                "robot does not support command {command}"
            )),
            Ok(RequestOutcome::Timeout) => Err(anyhow::anyhow!("no reply within {timeout:?}")),
            Ok(RequestOutcome::ConnectionLost) => {
                Err(anyhow::anyhow!("connection lost before the reply arrived"))
            }
            Err(e) => Err(e.into()),
        },
    };

    conn.shutdown().await;
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
