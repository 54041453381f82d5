//! Campusnet - keeps a campus network captive-portal login alive
//!
//! Probes real internet reachability, re-submits the configured portal login
//! form whenever the connection drops, and verifies success by matching the
//! gateway's response body.

mod config;
mod controller;
mod netcheck;
mod portal;
mod status;
mod wifi;

use anyhow::Result;
use clap::Parser;
use controller::Controller;
use status::StatusBoard;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "campusnet")]
#[command(about = "Campus Network Auto Login Client", long_about = None)]
struct Args {
    /// Run in daemon mode (continuous monitoring)
    #[arg(short, long)]
    daemon: bool,

    /// Log in immediately and exit, even if already online
    #[arg(long)]
    login: bool,

    /// Log out from the portal and exit
    #[arg(long)]
    logout: bool,

    /// Config file path (default: config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration once here for the log level; the controller reloads
    // it on every tick so edits apply without a restart
    let cfg = config::Config::load(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    tracing::info!("Campusnet - Campus Network Auto Login");

    let board = StatusBoard::new();
    let controller = Controller::new(args.config.clone(), board)?;

    if args.logout {
        let status = controller.logout_now().await;
        tracing::info!("Logout result: {}", status.message);
        return Ok(());
    }

    if args.login {
        let status = controller.login_now().await;
        if status.online {
            return Ok(());
        }
        anyhow::bail!("{}", status.message);
    }

    if args.daemon {
        run_daemon(controller).await
    } else {
        let status = controller.check_once().await;
        if status.online {
            Ok(())
        } else {
            anyhow::bail!("{}", status.message)
        }
    }
}

/// Run the control loop until Ctrl-C, then wait for it to acknowledge the
/// stop signal before returning
async fn run_daemon(controller: Controller) -> Result<()> {
    tracing::info!("Starting daemon mode...");

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let control_loop = tokio::spawn(async move { controller.run(stop_rx).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, shutting down");
    let _ = stop_tx.send(true);
    control_loop.await?;
    Ok(())
}
