#![cfg(feature = "cli")]

//! deskpadctl: command-line control for DeskPad virtual displays.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use deskpad::client::{FallbackClient, SocketClient};
use deskpad::config::{
    ClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_SOCKET_PATH,
    positive_seconds,
};
use deskpad::protocol::{Command, CreateParams, Request, Response};
use deskpad::utils::tracing::setup_terminal_tracing;

/// Exit status when the fallback path got no answer in time
const EXIT_NO_RESPONSE: i32 = 2;

/// Global CLI arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Listener socket path
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Seconds to wait for the connection
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: f64,

    /// Seconds to wait for the response
    #[arg(long, default_value_t = DEFAULT_READ_TIMEOUT)]
    read_timeout: f64,

    /// Do not fall back to the broadcast channel when the socket is unreachable
    #[arg(long)]
    no_fallback: bool,

    /// Print the raw JSON response
    #[arg(long)]
    json: bool,

    /// Enable terminal logging
    #[arg(short, long)]
    log: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// List of available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a virtual display
    Create {
        #[arg(short, long)]
        width: Option<u32>,
        #[arg(short = 'H', long)]
        height: Option<u32>,
        /// Refresh rate in Hz
        #[arg(short, long)]
        refresh_rate: Option<f64>,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Remove a virtual display by id
    Remove { id: u32 },
    /// List virtual displays
    List,
    /// Check that the listener is alive
    Ping,
}

impl Commands {
    fn to_command(&self) -> Command {
        match self {
            Commands::Create {
                width,
                height,
                refresh_rate,
                name,
            } => Command::Create(CreateParams {
                width: *width,
                height: *height,
                refresh_rate: *refresh_rate,
                name: name.clone(),
            }),
            Commands::Remove { id } => Command::Remove { display_id: *id },
            Commands::List => Command::List,
            Commands::Ping => Command::Ping,
        }
    }
}

fn seconds(value: f64, flag: &str) -> Result<Duration, String> {
    positive_seconds(value)
        .ok_or_else(|| format!("--{flag} must be a positive number of seconds, got {value}"))
}

fn client_config(cli: &Cli) -> Result<ClientConfig, String> {
    Ok(ClientConfig::default()
        .with_socket_path(&cli.socket)
        .with_timeouts(
            seconds(cli.connect_timeout, "connect-timeout")?,
            seconds(cli.read_timeout, "read-timeout")?,
        ))
}

/// Entry point
#[async_std::main]
async fn main() {
    let cli = Cli::parse();

    if cli.log {
        setup_terminal_tracing();
    }

    match handle_command(&cli).await {
        Ok(Some(())) => {}
        Ok(None) => {
            eprintln!("Error: timed out waiting for a response");
            std::process::exit(EXIT_NO_RESPONSE);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Execute the selected subcommand. `Ok(None)` means nobody answered.
async fn handle_command(cli: &Cli) -> Result<Option<()>, String> {
    let config = client_config(cli)?;
    let request = Request::new(cli.command.to_command());

    let response = match SocketClient::new(config.clone()).request(&request) {
        Ok(response) => response,
        Err(e) if e.is_unreachable() && !cli.no_fallback => {
            info!("{}; falling back to the broadcast channel", e);
            match FallbackClient::new(config)
                .request(request)
                .await
                .map_err(|e| e.to_string())?
            {
                Some(reply) => {
                    debug!("Fallback answer via {:?}", reply.source);
                    reply.response
                }
                None => return Ok(None),
            }
        }
        Err(e) => return Err(e.to_string()),
    };

    print_response(cli, &response)?;
    Ok(Some(()))
}

fn print_response(cli: &Cli, response: &Response) -> Result<(), String> {
    if cli.json {
        let text = serde_json::to_string_pretty(response).map_err(|e| e.to_string())?;
        println!("{}", text);
        return response.error.as_ref().map_or(Ok(()), |e| Err(e.clone()));
    }

    let response = response.clone().into_result()?;

    match &cli.command {
        Commands::Create { .. } => {
            if let Some(d) = &response.display {
                println!(
                    "Created display {}: \"{}\" {}x{} @ {} Hz",
                    d.id, d.name, d.width, d.height, d.refresh_rate
                );
            }
        }
        Commands::Remove { id } => {
            println!("Removed display {}", response.display_id.unwrap_or(*id));
        }
        Commands::List => {
            let displays = response.displays.unwrap_or_default();
            if displays.is_empty() {
                println!("No displays");
            }
            for d in displays {
                println!(
                    "{}\t{}\t{}x{} @ {} Hz",
                    d.id, d.name, d.width, d.height, d.refresh_rate
                );
            }
        }
        Commands::Ping => match response.result {
            Some(result) => println!("{}", result),
            None => println!("pong"),
        },
    }
    Ok(())
}
