//! Rendezvous - serialized rendezvous coordinator
//!
//! CLI entry point for the coordinator and its bundled peers.

use std::fs;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rendezvous::cli::{Cli, Command};
use rendezvous::client;
use rendezvous::config::Config;
use rendezvous::server::Server;
use rendezvous::token::CorrelationToken;

fn parse_level(s: &str) -> tracing::Level {
    match s.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }
    }
}

fn setup_logging(level: Option<&str>, log_file: Option<&Path>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let level = level.map(parse_level).unwrap_or(tracing::Level::INFO);
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = fs::File::create(path).context("Failed to create log file")?;
            tracing_subscriber::fmt()
                .with_writer(file)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log settings from config early (before full config load)
    let log_settings = Config::load_log_settings(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    let level = cli.log_level.clone().or(log_settings.level);
    setup_logging(level.as_deref(), log_settings.file.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve {
            address,
            requester_port,
            holder_port,
            observer_port,
        } => {
            let mut config = config;
            config
                .server
                .override_endpoints(address, requester_port, holder_port, observer_port);
            cmd_serve(config).await
        }
        Command::Observe { address, port } => cmd_observe(&address, port).await,
        Command::Request { address, port, token } => cmd_request(&config, &address, port, token).await,
        Command::Hold {
            address,
            port,
            service_ms,
            sessions,
        } => cmd_hold(&config, &address, port, service_ms, sessions).await,
    }
}

/// Run the coordinator until a signal arrives or it fails
async fn cmd_serve(config: Config) -> Result<()> {
    debug!("cmd_serve: called");
    let server = Server::bind(config).context("Failed to start server")?;
    let addrs = server.local_addrs()?;
    info!(
        requester = %addrs.requester,
        holder = %addrs.holder,
        observer = ?addrs.observer,
        "Server bound, waiting for resource holder"
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let mut server_handle = tokio::spawn(server.run(shutdown_rx));

    debug!("cmd_serve: setting up signal handlers");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            res = &mut server_handle => {
                return res.context("Server task failed")?;
            }
            _ = sigint.recv() => {
                warn!("SIGINT received");
                let _ = shutdown_tx.send(()).await;
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received");
                let _ = shutdown_tx.send(()).await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            res = &mut server_handle => {
                return res.context("Server task failed")?;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl+C received");
                let _ = shutdown_tx.send(()).await;
            }
        }
    }

    server_handle.await.context("Server task failed")?
}

async fn cmd_observe(address: &str, port: u16) -> Result<()> {
    debug!(%address, port, "cmd_observe: called");
    println!("{}", "Observer is ready".green());
    let mut stdout = tokio::io::stdout();
    let total = client::observe((address, port), &mut stdout).await?;
    println!("{} ({} bytes received)", "disconnected".yellow(), total);
    Ok(())
}

async fn cmd_request(config: &Config, address: &str, port: u16, token: Option<i32>) -> Result<()> {
    let order = config.server.token_byte_order;
    let token = match token {
        Some(value) => CorrelationToken::from_value(value, order),
        None => CorrelationToken::from_pid(std::process::id(), order),
    };
    let value = token.value(order);
    debug!(%address, port, value, "cmd_request: called");

    println!("Requester {} is waiting", value.to_string().cyan());
    let completion = client::request((address, port), token).await?;
    println!(
        "{} Requester {} released (completion {})",
        "✓".green(),
        value.to_string().cyan(),
        completion.display(order)
    );
    Ok(())
}

async fn cmd_hold(config: &Config, address: &str, port: u16, service_ms: u64, sessions: Option<usize>) -> Result<()> {
    debug!(%address, port, service_ms, ?sessions, "cmd_hold: called");
    let order = config.server.token_byte_order;
    println!("{}", "Resource holder is ready".green());
    let served = client::hold((address, port), Duration::from_millis(service_ms), sessions, order).await?;
    println!("{} Served {} requesters", "✓".green(), served);
    Ok(())
}
