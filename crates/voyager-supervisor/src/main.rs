// Voyager supervisor - lite-client daemon host for the wallet UI
//
// The UI talks to this process over stdio:
// - stdin: one JSON command per line, e.g. {"command":"booted"}
// - stdout: one JSON event per line, e.g. {"event":"connected","payload":{...}}
//
// Diagnostics never go to stdout.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voyager_config::Config;
use voyager_supervisor::{
    init_logging, DataDirectory, LogSink, Supervisor, TracingCrashReporter, UiCommand, UiEvent,
};

#[derive(Parser, Debug)]
#[command(name = "voyager-supervisor", version, about = "Runs the Voyager lite-client daemon for the wallet UI")]
struct Args {
    /// TOML config file (overrides VOYAGER_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory (overrides COSMOS_HOME)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Daemon executable (overrides BINARY_PATH)
    #[arg(long)]
    binary: Option<PathBuf>,

    /// Log to stderr instead of the data directory's main.log
    #[arg(long)]
    console_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_env_with_file(path),
        None => Config::from_env(),
    }
    .context("Failed to load configuration")?;
    if let Some(home) = args.home {
        config.root = home;
    }
    if let Some(binary) = args.binary {
        config.binary_path = Some(binary);
    }

    // Must run before the log file is created inside the root
    let data_dir = DataDirectory::open(&config.root, &config.network_path);

    let sink = if args.console_log {
        LogSink::Console
    } else {
        LogSink::from_config(&config)
    };
    init_logging(&sink).context("Failed to initialize logging")?;

    info!(
        "Starting Voyager supervisor v{} (app {})",
        env!("CARGO_PKG_VERSION"),
        config.app_version
    );
    debug!(?config, "resolved configuration");

    let (supervisor, events) =
        Supervisor::new(config, data_dir, Arc::new(TracingCrashReporter))
            .context("Failed to create supervisor")?;
    supervisor.crash_handler().install_panic_hook();

    let commands = spawn_command_reader();
    let writer = tokio::spawn(write_events(events));

    supervisor.run(commands).await;

    // The bridge is detached by shutdown, so the event stream ends
    if let Err(e) = writer.await {
        warn!("event writer failed: {}", e);
    }
    Ok(())
}

fn spawn_command_reader() -> mpsc::UnboundedReceiver<UiCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<UiCommand>(line) {
                        Ok(command) => {
                            if tx.send(command).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring malformed UI command {:?}: {}", line, e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read UI commands: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

async fn write_events(mut events: mpsc::UnboundedReceiver<UiEvent>) {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        let mut line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode UI event: {}", e);
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            warn!("UI event stream closed: {}", e);
            break;
        }
        let _ = stdout.flush().await;
    }
}
