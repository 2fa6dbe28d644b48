use clap::{Parser, Subcommand};
use eyre::eyre;
use std::net::SocketAddr;
use std::time::Duration;

use procprobe::launcher::LaunchConfig;
use procprobe::scenario::{netcat_listener, ScenarioConfig, TerminationPoint, DEFAULT_PAYLOAD};

type Result<T> = color_eyre::eyre::Result<T>;

/// Exercises process and socket primitives of the host
#[derive(Parser)]
#[command(name = "procprobe")]
#[command(about = "Exercises process and socket primitives of the host")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command to completion and print its trimmed stdout
    Run {
        /// Fail unless the trimmed stdout equals this value
        #[arg(long)]
        expect: Option<String>,

        /// Kill the command after this many milliseconds
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,

        /// Command to execute
        program: String,

        /// Arguments for the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Resolve an executable on the search path
    Which {
        name: String,
    },

    /// Send a payload through a listener process and verify its stdout
    Netcat(NetcatArgs),

    /// Stream the stdout lines of a long-running command
    Stream {
        /// Command to execute
        program: String,

        /// Arguments for the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Accept connections and copy received bytes to stdout
    Listen {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: String,
    },
}

#[derive(clap::Args)]
pub struct NetcatArgs {
    /// Address the listener binds and the client connects to
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,

    /// Payload sent by the client
    #[arg(long, default_value = DEFAULT_PAYLOAD)]
    pub payload: String,

    /// Listener command (default: nc -lk <ip> <port>)
    #[arg(long)]
    pub listener: Option<String>,

    /// Argument for the listener command, repeatable
    #[arg(long = "listener-arg", allow_hyphen_values = true)]
    pub listener_args: Vec<String>,

    /// Readiness wait for the listener (ms)
    #[arg(long, default_value = "2000")]
    pub startup_timeout_ms: u64,

    /// Client connect timeout (ms)
    #[arg(long, default_value = "500")]
    pub connect_timeout_ms: u64,

    /// Wait for the payload to reach the listener's stdout (ms)
    #[arg(long, default_value = "1000")]
    pub propagation_timeout_ms: u64,

    /// Wait for the output drain after termination (ms)
    #[arg(long, default_value = "1000")]
    pub completion_timeout_ms: u64,
}

pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| eyre!("Invalid address '{}': {}", addr, e))
}

impl NetcatArgs {
    /// Converts the flags into a scenario configuration
    pub fn into_config(self) -> Result<ScenarioConfig> {
        let addr = parse_addr(&self.addr)?;

        let listener = match self.listener {
            Some(command) => LaunchConfig::new(command, self.listener_args),
            None => netcat_listener(addr),
        };

        Ok(ScenarioConfig {
            addr,
            payload: self.payload.into_bytes(),
            listener,
            startup_timeout: Duration::from_millis(self.startup_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            propagation_timeout: Duration::from_millis(self.propagation_timeout_ms),
            completion_timeout: Duration::from_millis(self.completion_timeout_ms),
            termination: TerminationPoint::AfterDelivery,
            ..Default::default()
        })
    }
}
