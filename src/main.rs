use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::error;

use onionserve::config::{format_config, Config, Overrides};
use onionserve::control::TorConnector;
use onionserve::logging::{init_logging, LogConfig, Verbosity};
use onionserve::server::run_service;

#[derive(Parser)]
#[command(name = "onionserve")]
#[command(version)]
#[command(about = "Share files through an ephemeral Tor onion service")]
#[command(
    long_about = "Publishes each given file at an unguessable URL on a fresh onion address. \
                  Requires a running Tor daemon with its control socket and cookie \
                  authentication enabled. Every run uses a new address and new URLs."
)]
struct Cli {
    /// Files to publish
    files: Vec<PathBuf>,

    /// Path of Tor's control socket (default: /run/tor/control)
    #[arg(long)]
    control_socket: Option<PathBuf>,

    /// Path of Tor's control auth cookie (default: /run/tor/control.authcookie)
    #[arg(long)]
    auth_cookie: Option<PathBuf>,

    /// Port to publish on the onion address (default: 80)
    #[arg(long)]
    virtual_port: Option<u16>,

    /// Config file to read instead of ~/.config/onionserve/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write debug logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match cli.config {
        Some(ref path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };

    Ok(config.merged(Overrides {
        control_socket: cli.control_socket.clone(),
        auth_cookie: cli.auth_cookie.clone(),
        virtual_port: cli.virtual_port,
        log_file: cli.log_file.clone(),
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if cli.show_config {
        println!("{}", format_config(&config));
        return Ok(());
    }

    let guard = init_logging(&LogConfig {
        verbosity: Verbosity::from_flags(cli.verbose, cli.quiet),
        log_file: config.log_file.clone(),
    });

    let connector = TorConnector::new(config.effective_control_socket());
    let result = run_service(&connector, &config.bootstrap_config(), &cli.files).await;

    if let Err(e) = result {
        error!("{:#}", e);
        // Flush the log file before exiting
        drop(guard);
        std::process::exit(1);
    }

    Ok(())
}
