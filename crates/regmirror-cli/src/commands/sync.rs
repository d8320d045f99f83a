//! Sync command: copy every tag of the repositories in the daily list.

use anyhow::{Context, Result};
use clap::Args;
use regmirror_core::policy::read_list;
use regmirror_core::OutcomeLedger;

use super::context::{self, RunArgs};

/// Arguments for the sync command.
#[derive(Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Print the classification plan without touching the registry
    #[arg(long)]
    pub dry_run: bool,
}

/// Runs the sync command.
pub async fn run(args: &SyncArgs) -> Result<u8> {
    let config = context::load_config(&args.run)?;
    let daily = config.path(&config.images.daily);
    let entries = read_list(&daily)
        .with_context(|| format!("Failed to read repository list {}", daily.display()))?;
    let engine = context::build_engine(&config, &args.run)?;

    if args.dry_run {
        context::emit(&engine.plan_sync(&entries), args.run.output)?;
        return Ok(0);
    }

    let ledger = OutcomeLedger::open(
        &config.path(&config.images.mirrored),
        &config.path(&config.images.failed),
    )
    .context("Failed to open image ledger")?;

    let summary = context::supervise(
        engine.control(),
        &args.run,
        engine.sync_repositories(&entries, &ledger),
    )
    .await
    .context("Repository sync failed")?;

    context::emit(&summary, args.run.output)?;
    Ok(summary.exit_code())
}
