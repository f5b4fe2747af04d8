#![cfg(feature = "daemon")]

//! deskpadd: the DeskPad display control listener.

use chrono::Utc;
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{error, info};

use deskpad::config::{DEFAULT_CONFIG_PATH, DaemonConfig};
use deskpad::display::DisplayRegistry;
use deskpad::error::{DaemonError, Result};
use deskpad::notify::DatagramBroadcaster;
use deskpad::server::listener::SHUTDOWN_POLL_INTERVAL;
use deskpad::server::{ControlListener, Dispatcher, ReplyFanout, ServerOptions, SocketServer};
use deskpad::utils::health::{HealthFile, HealthStatus};
use deskpad::utils::tracing::setup_tracing;

/// Host-side listener for DeskPad display requests
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Configuration file (missing file means defaults)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Socket path
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Serve only the broadcast control channel
    #[arg(long)]
    no_socket: bool,

    /// Log file path
    #[arg(long)]
    log_path: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<DaemonConfig> {
    let mut config = DaemonConfig::load(&cli.config)?;
    config.apply_env(|key| std::env::var(key).ok());

    if let Some(socket) = &cli.socket {
        config.socket_path = socket.clone();
    }
    if let Some(log_path) = &cli.log_path {
        config.log_path = log_path.clone();
    }
    if cli.no_socket {
        config.socket_enabled = false;
    }
    config.validate()?;
    Ok(config)
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // Held until exit so buffered log lines are flushed
    let _guard = setup_tracing(&config.log_path);

    if let Err(e) = run(config) {
        error!("{}", e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(config: DaemonConfig) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .map_err(|e| DaemonError::Signal(e.to_string()))?;
    }

    let started_at = Utc::now();
    let dispatcher = Arc::new(Dispatcher::new(DisplayRegistry::starting_at(
        config.first_display_id,
    )));
    let broadcaster = DatagramBroadcaster::new(&config.notify_dir);
    let fanout = ReplyFanout::new(Arc::new(broadcaster.clone()));

    let socket = if config.socket_enabled {
        Some(SocketServer::bind(
            &config.socket_path,
            dispatcher.clone(),
            fanout.clone(),
            ServerOptions::from(&config),
        )?)
    } else {
        info!("Socket transport disabled");
        None
    };

    let control = if config.broadcast_enabled {
        Some(ControlListener::bind(&broadcaster, dispatcher.clone(), fanout)?)
    } else {
        info!("Broadcast control channel disabled");
        None
    };

    let health = HealthFile::new(&config.health_path);
    let status = HealthStatus::new(
        started_at,
        socket.as_ref().map(|s| s.path().to_path_buf()),
        config.log_path.clone(),
    );
    if let Err(e) = health.write(&status) {
        // Not fatal: the listener works without it.
        error!("Failed to write health file {}: {}", health.path().display(), e);
    }

    info!("deskpadd {} started (pid {})", env!("CARGO_PKG_VERSION"), std::process::id());

    let flag: &AtomicBool = &shutdown;
    let result = thread::scope(|scope| {
        if let Some(control) = &control {
            scope.spawn(move || control.run(flag));
        }

        let result = match &socket {
            Some(server) => server.run(flag),
            None => {
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(SHUTDOWN_POLL_INTERVAL);
                }
                Ok(())
            }
        };
        // Stop the control listener too if the socket loop ended on its own.
        flag.store(true, Ordering::Relaxed);
        result
    });

    info!("Shutting down");
    drop(control);
    drop(socket);
    health.remove();
    result
}
