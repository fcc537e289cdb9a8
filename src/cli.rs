//! Command-line interface for episode-organizer.
//!
//! One binary covers both sides:
//! - `daemon` runs the organizer and its configuration server
//! - `get` and `set` talk to a running daemon

use crate::config_client::ConfigClient;
use crate::daemon::{Daemon, parse_port, validate_address};
use crate::output::OutputFormatter;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "episode-organizer", version)]
#[command(about = "Move downloaded TV episodes into a season-structured library", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Watch the download directory and organize new episodes
    Daemon {
        /// Configuration file (default: ~/.config/episode_organizer/config.toml)
        #[arg(long, value_name = "FILE")]
        conf: Option<PathBuf>,

        /// Log filter directive, overrides RUST_LOG (e.g. "debug")
        #[arg(long, value_name = "DIRECTIVE")]
        log: Option<String>,
    },
    /// Print a configuration value of the running daemon
    Get {
        /// Configuration key, e.g. WatchDirectory
        key: String,

        #[command(flatten)]
        server: ServerArgs,
    },
    /// Change a directory of the running daemon
    Set {
        /// WatchDirectory or StorageDirectory
        key: String,

        /// New directory
        value: String,

        #[command(flatten)]
        server: ServerArgs,
    },
}

/// Where to find the daemon.
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Hostname or ip address of the daemon
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port the daemon is listening on
    #[arg(long, default_value = "35121")]
    pub port: String,

    /// Show what is being sent
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServerArgs {
    /// Validates the address and builds a client for it.
    pub fn client(&self) -> Result<ConfigClient, String> {
        validate_address(&self.host).map_err(|_| format!("Hostname '{}' is not valid", self.host))?;
        let port = parse_port(&self.port).map_err(|_| format!("Port '{}' is not valid", self.port))?;
        Ok(ConfigClient::new(self.host.clone(), port))
    }
}

/// Installs the log subscriber for the daemon. `directive` takes precedence
/// over `RUST_LOG`; the default level is `info`.
pub fn init_logging(directive: Option<&str>) {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Runs the parsed command.
///
/// # Errors
///
/// Returns the message to show the user when the command failed.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use episode_organizer::cli::{Cli, run_cli};
///
/// let cli = Cli::parse_from(["episode-organizer", "get", "WatchDirectory"]);
/// if let Err(e) = run_cli(cli) {
///     eprintln!("Error: {}", e);
/// }
/// ```
pub fn run_cli(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Daemon { conf, log } => run_daemon(conf, log.as_deref()),
        Command::Get { key, server } => get_config(&key, &server),
        Command::Set { key, value, server } => set_config(&key, &value, &server),
    }
}

fn run_daemon(conf: Option<PathBuf>, log: Option<&str>) -> Result<(), String> {
    init_logging(log);

    let daemon = Daemon::setup(conf.as_deref()).map_err(|e| error_chain(&e))?;
    match daemon.run() {
        Ok(true) => Ok(()),
        Ok(false) => Err("services did not stop cleanly".to_string()),
        Err(e) => Err(error_chain(&e)),
    }
}

fn get_config(key: &str, server: &ServerArgs) -> Result<(), String> {
    let client = server.client()?;
    if server.verbose {
        OutputFormatter::info(&format!("Obtaining value for key '{}'", key));
    }

    let value = client.get_config(key).map_err(|e| error_chain(&e))?;
    OutputFormatter::key_value(key, &value);
    Ok(())
}

fn set_config(key: &str, value: &str, server: &ServerArgs) -> Result<(), String> {
    let client = server.client()?;
    if server.verbose {
        OutputFormatter::info(&format!("Setting value '{}' for key '{}'", value, key));
    }

    client.set_config(key, value).map_err(|e| error_chain(&e))?;
    OutputFormatter::success(&OutputFormatter::set_message(key, value));
    Ok(())
}

/// Joins an error and its sources into one line.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
