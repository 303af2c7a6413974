//! CLI argument definitions for the gateway.

use crate::config::DEFAULT_ENV_PREFIX;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use log::LevelFilter;

/// Serve a hot-swappable artefact behind authenticated handler dispatch.
#[derive(Parser, Debug)]
#[command(name = "artefact-gateway")]
#[command(version, about)]
#[command(after_help = concat!(
    "ENVIRONMENT:\n",
    "  <PREFIX>CLIENT_ID        Client id callers must present (required)\n",
    "  <PREFIX>CLIENT_SECRET    Client secret callers must present (required)\n",
    "  <PREFIX>CONTROL_SECRET   Secret for /control routes (routes off if unset)\n",
    "  <PREFIX>STORAGE_TOKEN    Bearer token for the blob store\n",
    "  <PREFIX>STORAGE_KEY      Object key, overriding storage.key\n",
    "  RUST_LOG                 Overrides the -v/-q log level\n",
))]
pub struct Cli {
    /// What to do (default: serve).
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file.
    #[arg(short, long, value_name = "PATH", default_value = "gateway.toml")]
    pub config: Utf8PathBuf,

    /// Prefix for credential environment variables.
    #[arg(long, value_name = "PREFIX", default_value = DEFAULT_ENV_PREFIX)]
    pub env_prefix: String,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Install the artefact, then serve traffic.
    Serve,
    /// Install the artefact and exit.
    Fetch,
}

impl Cli {
    /// The subcommand to run, defaulting to [`Command::Serve`].
    #[must_use]
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }

    /// Log level selected by `-v`/`-q`.
    #[must_use]
    pub const fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Error;
        }
        match self.verbosity {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
