//! Authloop CLI — obtain and maintain OAuth2 tokens from the terminal.
//!
//! Wraps the browser login flow, token refresh, and the on-disk token
//! store behind four subcommands.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Authloop: OAuth2 tokens for desktop and CLI apps
#[derive(Parser, Debug)]
#[command(name = "authloop", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Log in via the OAuth browser flow and store the token
    Login {
        /// Ignore any stored token and run the full browser flow
        #[arg(long)]
        force: bool,

        /// How long to wait for the provider's redirect, in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// TLS certificate file, for an https redirect URI
        #[arg(long)]
        cert: Option<PathBuf>,

        /// TLS private key file, for an https redirect URI
        #[arg(long)]
        key: Option<PathBuf>,
    },
    /// Remove the stored token
    Logout,
    /// Show whether a token is stored and when it expires
    Status,
    /// Refresh the stored token now and report the result
    Refresh,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "authloop", "authloop")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "authloop.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let token_file = default_token_path();
    commands::handle_command(cli.command, cli.config.as_deref(), &token_file).await
}

/// Where the token lives when no override is given.
fn default_token_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "authloop", "authloop")
        .map(|d| d.data_dir().join("token.json"))
        .unwrap_or_else(|| PathBuf::from("authloop-token.json"))
}
