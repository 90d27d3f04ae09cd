use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, warn};

use statusline_tail::app;
use statusline_tail::cli::{Cli, Commands};
use statusline_tail::config::TailConfig;
use statusline_tail::util::setup_tracing;

fn main() -> ExitCode {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        // A statusline must never break the host terminal: failures are
        // logged and the process exits cleanly with nothing on stdout.
        None => {
            if let Err(err) = run_statusline() {
                debug!(error = %format!("{err:#}"), "statusline refresh failed");
            }
            ExitCode::SUCCESS
        }
        Some(command) => match run_command(command) {
            Ok(code) => ExitCode::from(code),
            Err(err) => {
                eprintln!("statusline-tail error: {err:#}");
                ExitCode::from(1)
            }
        },
    }
}

fn run_statusline() -> Result<()> {
    let config = TailConfig::load().unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "falling back to default configuration");
        let mut cfg = TailConfig::default();
        cfg.apply_overrides(|name| std::env::var(name).ok());
        cfg
    });
    app::run_statusline(&config)
}

fn run_command(command: Commands) -> Result<u8> {
    match command {
        Commands::Inspect { session_id } => app::inspect(&TailConfig::load()?, &session_id),
        Commands::Doctor => app::doctor(TailConfig::load()),
    }
}
