//! Charts command: mirror the declared chart list.

use anyhow::{Context, Result};
use clap::Args;
use regmirror_core::{OutcomeLedger, RequiredList};

use super::context::{self, RunArgs};

/// Arguments for the charts command.
#[derive(Args)]
pub struct ChartsArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Runs the charts command.
pub async fn run(args: &ChartsArgs) -> Result<u8> {
    let config = context::load_config(&args.run)?;
    let list = RequiredList::load(
        config.path(&config.charts.required),
        Some(config.path(&config.charts.template)),
    )
    .context("Failed to load declared chart list")?;
    let engine = context::build_engine(&config, &args.run)?;
    let ledger = OutcomeLedger::open(
        &config.path(&config.charts.mirrored),
        &config.path(&config.charts.failed),
    )
    .context("Failed to open chart ledger")?;

    let summary = context::supervise(engine.control(), &args.run, engine.run_charts(&list, &ledger))
        .await
        .context("Chart run failed")?;

    context::emit(&summary, args.run.output)?;
    Ok(summary.exit_code())
}
