//! regmirror CLI - mirrors container images and Helm charts into a registry.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands, LogFormat};

/// Exit code for run-scoped errors.
const EXIT_RUN_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let result = match cli.command {
        Commands::Images(args) => commands::images::run(&args).await,
        Commands::Charts(args) => commands::charts::run(&args).await,
        Commands::Sync(args) => commands::sync::run(&args).await,
        Commands::Resolve(args) => commands::resolve::run(&args),
        Commands::Version => {
            println!("regmirror {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("Run aborted: {e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_RUN_ERROR)
        }
    }
}

fn init_tracing(format: LogFormat) {
    // Logs go to stderr; stdout carries the run summary.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "regmirror=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
