//! cacheprog - build cache helper for the Go toolchain
//!
//! CLI entry point that dispatches to subcommands.

use cacheprog::cli::{Cli, Commands};
use cacheprog::config::schema::GeneralConfig;
use cacheprog::config::ConfigManager;
use cacheprog::error::ProxyResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ProxyResult<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::resolve(cli.config.clone());
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config.general);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    match cli.command {
        Commands::Run(args) => cacheprog::cli::commands::run(args, &config, shutdown).await,
        Commands::Serve(args) => cacheprog::cli::commands::serve(args, &config, shutdown).await,
        Commands::Config(args) => {
            cacheprog::cli::commands::config(args, &config_manager, &config).await
        }
    }
}

/// Logs go to stderr; stdout belongs to the protocol.
///
/// 0 = warn, 1 (or `general.verbose`) = info, 2+ = debug. `RUST_LOG` wins.
fn init_logging(verbosity: u8, general: &GeneralConfig) {
    let level = match verbosity {
        0 if general.verbose => "info",
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cacheprog={}", level)));

    if general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let Ok(mut term) = signal(SignalKind::terminate()) else {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
            return;
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Signal received, shutting down");
    shutdown.cancel();
}
