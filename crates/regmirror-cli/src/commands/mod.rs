//! CLI commands and argument parsing.

pub mod charts;
pub mod context;
pub mod images;
pub mod resolve;
pub mod sync;

use clap::{Parser, Subcommand, ValueEnum};

/// regmirror - mirror container images and Helm charts into a registry
#[derive(Parser)]
#[command(name = "regmirror")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "REGMIRROR_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Mirror the declared image list
    Images(images::ImagesArgs),

    /// Mirror the declared chart list
    Charts(charts::ChartsArgs),

    /// Copy every tag of the repositories in the daily list
    Sync(sync::SyncArgs),

    /// Print the destination of image references
    Resolve(resolve::ResolveArgs),

    /// Print version information
    Version,
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Output format for summaries and plans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
