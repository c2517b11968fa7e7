use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod demo;
pub mod relay;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the signaling relay until interrupted.
    Relay(RelayArgs),
    /// Run a relay, a receiver and initiators in one process.
    Demo(DemoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Relay(args) => runtime()?.block_on(relay::run(args, format)),
        Command::Demo(args) => runtime()?.block_on(demo::run(args, format)),
        Command::Version(args) => version::run(args),
    }
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Address to listen on.
    #[arg(long, env = "SIGRELAY_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,
    /// Largest accepted frame payload in bytes.
    #[arg(long, env = "SIGRELAY_MAX_PAYLOAD", default_value_t = sigrelay_wire::DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Code the receiver registers. Generated when absent.
    #[arg(long)]
    pub code: Option<String>,
    /// Code the initiators join. Defaults to the registered code.
    #[arg(long)]
    pub join: Option<String>,
    /// Number of initiators to connect.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub initiators: u16,
    /// Receiver heartbeat interval (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub heartbeat: Duration,
    /// Time allowed for each signaling step (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub timeout: Duration,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
