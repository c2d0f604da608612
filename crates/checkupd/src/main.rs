//! checkupd: the checkup daemon.
//!
//! One binary, four modes:
//! - `check`: run every configured checker once and print the results
//! - `serve`: keep checking on an interval, expose metrics and `/-/reload`
//! - `history`: read batches back from storage
//! - `hash-password`: hash a password read from stdin for `serve --password-hash`
//!
//! # Usage
//!
//! ```text
//! checkupd -c checkup.json check
//! checkupd -c checkup.json serve --listen :9193 --every 30s
//! checkupd -c checkup.json history --fetch 1718000000000000000-check.json
//! echo -n 's3cret' | checkupd hash-password
//! ```
//!
//! Exit status: 0 when every check is healthy, 1 when any is not, 2 on
//! configuration or runtime errors.

mod check;
mod serve;

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,checkupd=debug,checkup=info";

#[derive(Parser)]
#[command(name = "checkupd", version, about = "Continuous endpoint health checks")]
struct Cli {
    /// Checkup configuration file.
    #[arg(short, long, global = true, default_value = "checkup.json")]
    config: PathBuf,

    /// Log filter directive, e.g. `debug` or `info,checkup_engine=trace`.
    /// Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks once and print the results.
    Check {
        /// Store the results in the configured storage.
        #[arg(long)]
        store: bool,
    },

    /// Run checks continuously and serve metrics over HTTP.
    Serve(serve::ServeArgs),

    /// List stored batches, or print one.
    History {
        /// Name of a stored batch to print.
        #[arg(long)]
        fetch: Option<String>,
    },

    /// Read a password from stdin and print its argon2 hash.
    HashPassword,
}

/// How a command finished, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Healthy,
    Unhealthy,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Healthy => ExitCode::SUCCESS,
            Outcome::Unhealthy => ExitCode::from(1),
        }
    }
}

/// Clap value parser for duration flags.
fn parse_duration(s: &str) -> Result<Duration, String> {
    checkup_core::duration::parse(s).map_err(|e| e.to_string())
}

fn init_tracing(level: Option<&str>, format: LogFormat) -> anyhow::Result<()> {
    let filter = match level {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?,
    };

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}

/// One trailing newline is stripped so `echo` input hashes as typed.
fn hash_password(mut input: impl Read) -> anyhow::Result<Outcome> {
    let mut password = String::new();
    input
        .read_to_string(&mut password)
        .context("reading password from stdin")?;
    let password = password
        .strip_suffix('\n')
        .map(|p| p.strip_suffix('\r').unwrap_or(p))
        .unwrap_or(&password);
    if password.is_empty() {
        bail!("empty password on stdin");
    }
    let hash = checkup_api::hash_password(password).map_err(|e| anyhow!("hashing password: {e}"))?;
    println!("{hash}");
    Ok(Outcome::Healthy)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_deref(), cli.log_format) {
        eprintln!("checkupd: invalid log filter: {e}");
        return ExitCode::from(2);
    }

    let outcome = match cli.command {
        Command::Check { store } => check::run(&cli.config, store).await,
        Command::Serve(args) => serve::run(&cli.config, args).await,
        Command::History { fetch } => check::history(&cli.config, fetch.as_deref()),
        Command::HashPassword => hash_password(std::io::stdin().lock()),
    };

    match outcome {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            error!("checkupd failed: {e:#}");
            eprintln!("checkupd: {e:#}");
            ExitCode::from(2)
        }
    }
}
