//! Shared setup for run commands: configuration, clients, signals, output.

use std::fmt::Display;
use std::future::{self, Future};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use regmirror_core::{MirrorConfig, PolicyLists};
use regmirror_registry::{AccessKeys, AwsCli, AwsCliConfig, ChartClientConfig, ChartIndexClient};
use regmirror_sync::{EngineConfig, HelmCli, RunControl, Services, Skopeo, SyncEngine};
use serde::Serialize;
use tokio::time::Sleep;
use tracing::{info, warn};

use super::OutputFormat;

/// Configuration file looked up in the working directory when `--config`
/// is not given.
const DEFAULT_CONFIG: &str = "regmirror.yaml";

/// Arguments shared by every run command.
#[derive(Args)]
pub struct RunArgs {
    /// Configuration file (default: ./regmirror.yaml if present)
    #[arg(short, long, env = "REGMIRROR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Artifacts processed concurrently (overrides the configuration)
    #[arg(short, long, env = "REGMIRROR_WORKERS")]
    pub workers: Option<usize>,

    /// Stop dispatching new artifacts after this many seconds
    #[arg(long, env = "REGMIRROR_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Seconds in-flight work may take after a stop before it is killed
    #[arg(long, env = "REGMIRROR_GRACE", default_value = "300")]
    pub grace: u64,

    /// Summary format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Destination access key id (empty: ambient credentials)
    #[arg(long, env = "ecr_ak", hide_env_values = true)]
    pub access_key: Option<String>,

    /// Destination secret access key (empty: ambient credentials)
    #[arg(long, env = "ecr_sk", hide_env_values = true)]
    pub secret_key: Option<String>,
}

impl RunArgs {
    fn access_keys(&self) -> Option<AccessKeys> {
        match (self.access_key.as_deref(), self.secret_key.as_deref()) {
            (Some(ak), Some(sk)) if !ak.trim().is_empty() && !sk.trim().is_empty() => {
                Some(AccessKeys::new(ak.trim(), sk.trim()))
            }
            _ => None,
        }
    }
}

/// Loads the configuration, applying CLI overrides.
pub fn load_config(args: &RunArgs) -> Result<MirrorConfig> {
    load_config_from(args.config.as_deref(), args.workers)
}

/// Loads `path`, or `./regmirror.yaml` if present, or the defaults.
pub fn load_config_from(path: Option<&Path>, workers: Option<usize>) -> Result<MirrorConfig> {
    let mut config = match path {
        Some(path) => MirrorConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).is_file() => MirrorConfig::load(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("Failed to load configuration {DEFAULT_CONFIG}"))?,
        None => MirrorConfig::default(),
    };
    if let Some(workers) = workers {
        config.workers = workers;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Wires the production clients into an engine.
pub fn build_engine(config: &MirrorConfig, args: &RunArgs) -> Result<SyncEngine> {
    let resolver = config.resolver();
    let policy = PolicyLists::load(
        &config.path(&config.images.denied),
        &config.path(&config.images.ignored),
        &resolver,
    )
    .context("Failed to load deny/ignore lists")?;
    let policy_document = config
        .load_policy_document()
        .context("Failed to load repository access policy")?;

    let mut destination = AwsCliConfig::new(&config.destination.region);
    match args.access_keys() {
        Some(keys) => destination = destination.with_keys(keys),
        None => info!("No destination keys given, using ambient AWS credentials"),
    }
    let destination = Arc::new(AwsCli::new(destination));
    let origin = Arc::new(AwsCli::new(AwsCliConfig::new(&config.destination.region)));
    let tools = Arc::new(Skopeo::new());
    let chart_source = ChartIndexClient::new(&ChartClientConfig::default())
        .context("Failed to create chart index client")?;

    let services = Services {
        repositories: destination.clone(),
        origin_tokens: origin,
        destination_tokens: destination,
        images: tools,
        charts: Arc::new(HelmCli::new()),
        chart_source: Arc::new(chart_source),
    };

    let engine = SyncEngine::new(
        EngineConfig::from(config),
        resolver,
        policy,
        services,
        policy_document,
    )?;
    Ok(engine)
}

enum Event {
    Interrupt,
    Timeout,
    GraceExpired,
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => future::pending().await,
    }
}

/// Drives `run` to completion while translating Ctrl-C and deadlines into
/// stop and abort requests.
///
/// The first Ctrl-C or the `--timeout` deadline stops dispatch; a second
/// Ctrl-C or the end of the `--grace` period aborts in-flight transfers.
pub async fn supervise<F: Future>(control: &RunControl, args: &RunArgs, run: F) -> F::Output {
    tokio::pin!(run);
    let mut deadline = args
        .timeout
        .map(|secs| Box::pin(tokio::time::sleep(Duration::from_secs(secs))));
    let mut grace: Option<Pin<Box<Sleep>>> = None;

    loop {
        let event = tokio::select! {
            output = &mut run => return output,
            _ = tokio::signal::ctrl_c() => Event::Interrupt,
            () = expire(&mut deadline) => Event::Timeout,
            () = expire(&mut grace) => Event::GraceExpired,
        };

        match event {
            Event::Interrupt if control.is_stopped() => control.abort(),
            Event::Interrupt => {
                warn!(grace_secs = args.grace, "Interrupted, stopping");
                control.stop();
                grace = Some(Box::pin(tokio::time::sleep(Duration::from_secs(args.grace))));
            }
            Event::Timeout => {
                deadline = None;
                if !control.is_stopped() {
                    warn!(grace_secs = args.grace, "Run timeout reached, stopping");
                    control.stop();
                    grace = Some(Box::pin(tokio::time::sleep(Duration::from_secs(args.grace))));
                }
            }
            Event::GraceExpired => {
                grace = None;
                warn!("Grace period over");
                control.abort();
            }
        }
    }
}

/// Prints a summary or plan in the requested format.
pub fn emit<T: Serialize + Display>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{value}"),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to serialize output")?
        ),
    }
    Ok(())
}
