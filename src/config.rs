//! Command-line configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::Error;
use crate::tail::{StartPosition, TailConfig};

/// Default server port.
pub const DEFAULT_PORT: u16 = 1212;

/// Default per-connection outbound queue length, in lines.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// What to do when a subscriber's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OverflowPolicy {
    /// Close the lagging subscriber.
    #[default]
    Disconnect,
    /// Skip the line for that subscriber only.
    DropNewest,
}

/// Stream newly appended lines of a log file to WebSocket subscribers
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to log file to watch
    #[arg(long, value_name = "PATH")]
    pub file: PathBuf,

    /// Port to run the WebSocket server on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind to
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Lines buffered per client before the overflow policy applies
    #[arg(long, value_name = "LINES", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Give up on a client whose socket write takes longer than this
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_SEND_TIMEOUT_MS)]
    pub send_timeout_ms: u64,

    /// How often to check the file for new data
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Policy for clients that fall behind
    #[arg(long, value_enum, default_value_t = OverflowPolicy::Disconnect)]
    pub on_overflow: OverflowPolicy,

    /// Only stream lines appended after startup
    #[arg(long)]
    pub skip_existing: bool,
}

/// Per-connection settings applied at accept time.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub queue_capacity: usize,
    pub send_timeout: Duration,
    pub overflow: OverflowPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub file: PathBuf,
    pub addr: SocketAddr,
    pub connection: ConnectionSettings,
    pub tail: TailConfig,
}

impl Config {
    /// Configuration with every option at its default.
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            connection: ConnectionSettings::default(),
            tail: TailConfig::default(),
        }
    }
}

impl TryFrom<Cli> for Config {
    type Error = Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        if cli.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "--queue-capacity must be at least 1".to_string(),
            ));
        }
        if cli.send_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "--send-timeout-ms must be at least 1".to_string(),
            ));
        }
        if cli.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "--poll-interval-ms must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            file: cli.file,
            addr: SocketAddr::new(cli.bind, cli.port),
            connection: ConnectionSettings {
                queue_capacity: cli.queue_capacity,
                send_timeout: Duration::from_millis(cli.send_timeout_ms),
                overflow: cli.on_overflow,
            },
            tail: TailConfig {
                poll_interval: Duration::from_millis(cli.poll_interval_ms),
                start: if cli.skip_existing {
                    StartPosition::End
                } else {
                    StartPosition::Beginning
                },
            },
        })
    }
}
