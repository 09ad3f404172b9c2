//! Command-line front end for scale_reader.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use scale_reader::{
    adapters::{list_ports, SerialPortTransport},
    app_actor::ScaleManager,
    config::{default_config_path, Settings},
    framing::FramingMode,
    logging,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    Ports,

    /// Stream weight changes until Ctrl-C
    Watch {
        #[command(flatten)]
        line: LineArgs,

        /// Force this many decimal places for frames without a decimal marker
        #[arg(short, long)]
        decimals: Option<u8>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Send the diagnostic command sequence (ENQ, Z, T, P) and exit
    Test {
        #[command(flatten)]
        line: LineArgs,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
struct LineArgs {
    /// Serial port, e.g. /dev/ttyUSB0 or COM4
    #[arg(short, long)]
    port: Option<String>,

    /// Framing mode: delimited_ascii, text_token or delimited_binary
    #[arg(short, long)]
    mode: Option<FramingMode>,
}

impl LineArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(port) = &self.port {
            settings.scale.port = port.clone();
        }
        if let Some(mode) = self.mode {
            settings.scale.mode = mode;
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Settings::load().with_context(|| match default_config_path() {
            Some(path) => format!("Failed to load configuration from {}", path.display()),
            None => "Failed to load configuration".to_string(),
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_ref())?;

    logging::init_from_settings(&settings.application)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("Failed to initialize logging")?;

    match cli.command {
        Command::Ports => {
            let ports = list_ports().context("Failed to enumerate serial ports")?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
        }

        Command::Watch {
            line,
            decimals,
            json,
        } => {
            line.apply(&mut settings);
            if decimals.is_some() {
                settings.scale.forced_decimal_places = decimals;
            }
            settings.validate().context("Invalid settings")?;
            watch(settings, json).await?;
        }

        Command::Test { line } => {
            line.apply(&mut settings);
            settings.validate().context("Invalid settings")?;
            run_test(settings).await?;
        }

        Command::Config => {
            let rendered = settings.to_toml().context("Failed to render configuration")?;
            print!("{}", rendered);
        }
    }

    Ok(())
}

async fn watch(settings: Settings, json: bool) -> Result<()> {
    let manager = ScaleManager::spawn(settings.scale, Arc::new(SerialPortTransport::new()));
    let mut events = manager.subscribe();

    let status = manager
        .start(None)
        .await
        .context("Failed to start scale session")?;
    info!(endpoint = %status.endpoint, line = %status.line, "Watching scale");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) if json => println!("{}", serde_json::to_string(&event)?),
                Ok(event) => println!("{}  {}", event.timestamp.format("%H:%M:%S%.3f"), event.weight()),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Output fell behind; skipped weight events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    for status in manager.stop().await? {
        if let Some(err) = status.last_error {
            warn!(endpoint = %status.endpoint, error = %err, "Session had failed before stop");
        }
    }
    manager.shutdown().await?;
    Ok(())
}

async fn run_test(settings: Settings) -> Result<()> {
    let delay = settings.scale.test_command_delay;
    let manager = ScaleManager::spawn(settings.scale, Arc::new(SerialPortTransport::new()));

    manager
        .start(None)
        .await
        .context("Failed to start scale session")?;
    let endpoints = manager.test().await.context("Failed to run diagnostics")?;
    info!(endpoints = ?endpoints, "Diagnostic sequence scheduled");

    // Let the whole sequence go out before closing the port.
    tokio::time::sleep(delay * 4).await;
    manager.shutdown().await?;
    Ok(())
}
