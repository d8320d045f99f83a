//! Images command: mirror the declared image list.

use anyhow::{Context, Result};
use clap::Args;
use regmirror_core::{OutcomeLedger, RequiredList};
use tracing::info;

use super::context::{self, RunArgs};

/// Arguments for the images command.
#[derive(Args)]
pub struct ImagesArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Print the classification plan without touching the registry
    #[arg(long)]
    pub dry_run: bool,
}

/// Runs the images command.
pub async fn run(args: &ImagesArgs) -> Result<u8> {
    let config = context::load_config(&args.run)?;
    let list = RequiredList::load(
        config.path(&config.images.required),
        Some(config.path(&config.images.template)),
    )
    .context("Failed to load declared image list")?;
    let engine = context::build_engine(&config, &args.run)?;

    if args.dry_run {
        info!(declared = list.entries().len(), "Dry run, nothing will be changed");
        context::emit(&engine.plan_images(list.entries()), args.run.output)?;
        return Ok(0);
    }

    let ledger = OutcomeLedger::open(
        &config.path(&config.images.mirrored),
        &config.path(&config.images.failed),
    )
    .context("Failed to open image ledger")?;

    let summary = context::supervise(engine.control(), &args.run, engine.run_images(&list, &ledger))
        .await
        .context("Image run failed")?;

    context::emit(&summary, args.run.output)?;
    Ok(summary.exit_code())
}
