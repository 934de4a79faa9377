//! `triaxis`: headless console for the TriAxis controller.
//!
//! Wires the configuration, transports and use cases together and runs a
//! line-oriented prompt on stdin.  Events are printed as they happen, so a
//! scan that finishes or a link that drops shows up without asking.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load AppConfig (file, saved on first run, then CLI overrides)
//!  └─ init tracing   (RUST_LOG, then config log_level, then info)
//!  └─ AppState::from_config()
//!       ├─ DiscoveryService + scan acceptor (Tokio task)
//!       ├─ SessionManager   + writer task per session
//!       └─ CommandDispatcher
//!  └─ event printer (Tokio task)
//!  └─ prompt loop until quit / EOF / Ctrl-C
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use triaxis_controller::infrastructure::console::{self, ConsoleCommand, ParseCommandError};
use triaxis_controller::infrastructure::storage::config::{
    config_file_path, load_config_from, save_config_to, AppConfig, ConfigError,
};
use triaxis_controller::infrastructure::ui_bridge::AppState;

/// Command-line arguments for the console.
#[derive(Debug, Parser)]
#[command(
    name = "triaxis",
    about = "Console controller for TriAxis 3-axis stepper boards",
    version
)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, env = "TRIAXIS_CONFIG")]
    config: Option<PathBuf>,

    /// Use simulated boards regardless of the config file.
    #[arg(long, conflicts_with = "no_simulate")]
    simulate: bool,

    /// Use the real network transport regardless of the config file.
    #[arg(long)]
    no_simulate: bool,

    /// Log level used when `RUST_LOG` is unset (overrides the config file).
    #[arg(long, env = "TRIAXIS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print events as JSON lines instead of text.
    #[arg(long)]
    json_events: bool,
}

impl Cli {
    /// Folds the CLI overrides into `config`.
    fn apply_to(&self, config: &mut AppConfig) {
        if self.simulate {
            config.simulation.enabled = true;
        }
        if self.no_simulate {
            config.simulation.enabled = false;
        }
        if let Some(level) = &self.log_level {
            config.controller.log_level = level.clone();
        }
    }
}

/// What startup did with the config file.
#[derive(Debug)]
enum ConfigFile {
    Existing,
    Created,
    NotWritten(ConfigError),
}

/// Loads the config at `path` and folds in the CLI overrides.
///
/// On first run the defaults are written back before the overrides are
/// applied, so the generated controller id persists and one-off flags do not.
fn prepare_config(cli: &Cli, path: &Path) -> Result<(AppConfig, ConfigFile), ConfigError> {
    let first_run = !path.exists();
    let mut config = load_config_from(path)?;
    let file = if first_run {
        match save_config_to(&config, path) {
            Ok(()) => ConfigFile::Created,
            Err(e) => ConfigFile::NotWritten(e),
        }
    } else {
        ConfigFile::Existing
    };
    cli.apply_to(&mut config);
    Ok((config, file))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Configuration ─────────────────────────────────────────────────────────
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => config_file_path().context("locating the config file")?,
    };
    let (config, file) =
        prepare_config(&cli, &path).with_context(|| format!("loading {}", path.display()))?;

    // ── Logging ───────────────────────────────────────────────────────────────
    //
    // Logs go to stderr so they never interleave with prompt output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(&config.controller.log_level)
                .unwrap_or_else(|_| EnvFilter::new("info"))
        }))
        .init();

    match file {
        ConfigFile::Existing => {}
        ConfigFile::Created => info!("wrote default config to {}", path.display()),
        ConfigFile::NotWritten(e) => warn!("could not write default config: {e}"),
    }

    info!(
        controller = %config.controller.name,
        simulated = config.simulation.enabled,
        "TriAxis controller starting"
    );

    let state = AppState::from_config(config).context("building controller state")?;

    // ── Event printer ─────────────────────────────────────────────────────────
    let mut events = state.subscribe_events();
    let json_events = cli.json_events;
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if json_events => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("could not serialize event: {e}"),
                },
                Ok(event) => println!("{}", console::describe_event(&event)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event printer fell behind, skipped {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // ── Prompt loop ───────────────────────────────────────────────────────────
    println!("TriAxis console. Type help for commands.");
    run_prompt(&state).await?;

    if let Err(e) = state.session.disconnect().await {
        warn!("disconnect on exit failed: {e}");
    }
    info!("TriAxis controller stopped");
    Ok(())
}

/// Reads commands until `quit`, end of input or Ctrl-C.
async fn run_prompt(state: &Arc<AppState>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        match console::parse_command(&line) {
            Ok(ConsoleCommand::Quit) => return Ok(()),
            Ok(command) => println!("{}", console::execute(state, command).await),
            Err(ParseCommandError::Empty) => {}
            Err(e) => println!("error: {e}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
