//! The mirroring engine.
//!
//! One [`SyncEngine`] drives the three flows: declared images, declared
//! charts and bulk repository sync. Each flow classifies its declared lines,
//! provisions destination repositories, transfers artifacts through a
//! bounded worker pool and appends every outcome to a ledger.

use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use regmirror_core::{
    ChartReference, MirrorConfig, NamespaceResolver, OutcomeSink, PolicyLists, RequiredList,
    RunOutcome,
};
use regmirror_registry::{
    ChartSource, Credential, CredentialBroker, RepositoryProvisioner, RepositoryService,
    TokenService,
};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::control::RunControl;
use crate::error::{ArtifactError, EngineError, Result};
use crate::plan::{Classified, Classifier, ImageJob, Plan, PlannedArtifact};
use crate::retry::RetryPolicy;
use crate::summary::{ArtifactOutcome, FailedArtifact, RunKind, RunSummary};
use crate::transfer::{ChartTransfer, CopyRequest, ImageTransfer};

/// Engine settings derived from [`MirrorConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Artifacts processed concurrently.
    pub workers: usize,

    /// Retry policy for provider calls and transfers.
    pub retry: RetryPolicy,

    /// Skip copies whose destination digest already matches.
    pub skip_existing_digest: bool,

    /// Destination registry host.
    pub registry_domain: String,

    /// Destination region.
    pub destination_region: String,

    /// Destination account id.
    pub destination_account: String,

    /// Destination namespace for chart repositories.
    pub chart_namespace: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&MirrorConfig::default())
    }
}

impl From<&MirrorConfig> for EngineConfig {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            workers: config.workers,
            retry: RetryPolicy::from(&config.retry),
            skip_existing_digest: config.skip_existing_digest,
            registry_domain: config.destination.registry_domain(),
            destination_region: config.destination.region.clone(),
            destination_account: config.destination.account.clone(),
            chart_namespace: config.charts.namespace.clone(),
        }
    }
}

impl EngineConfig {
    /// Overrides the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Overrides the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables the digest check.
    pub fn with_skip_existing_digest(mut self, enabled: bool) -> Self {
        self.skip_existing_digest = enabled;
        self
    }

    fn chart_repository(&self, name: &str) -> String {
        let namespace = self.chart_namespace.trim_matches('/');
        if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}/{name}")
        }
    }

    fn chart_target(&self) -> String {
        let namespace = self.chart_namespace.trim_matches('/');
        if namespace.is_empty() {
            format!("oci://{}", self.registry_domain)
        } else {
            format!("oci://{}/{namespace}", self.registry_domain)
        }
    }
}

/// External collaborators of the engine.
#[derive(Clone)]
pub struct Services {
    /// Destination repository API.
    pub repositories: Arc<dyn RepositoryService>,

    /// Token issuer for registry-native origin hosts (ambient credentials).
    pub origin_tokens: Arc<dyn TokenService>,

    /// Token issuer for the destination registry.
    pub destination_tokens: Arc<dyn TokenService>,

    /// Image copy tool.
    pub images: Arc<dyn ImageTransfer>,

    /// Chart push tool.
    pub charts: Arc<dyn ChartTransfer>,

    /// Chart index and archive source.
    pub chart_source: Arc<dyn ChartSource>,
}

/// A unit of work in the dispatch stream.
///
/// Lines rejected before dispatch stay in the stream so outcomes are
/// recorded in declaration order.
enum Work<J> {
    Job(J),
    Rejected {
        reference: String,
        error: ArtifactError,
    },
}

/// Drives mirroring runs.
pub struct SyncEngine {
    config: EngineConfig,
    resolver: NamespaceResolver,
    policy: PolicyLists,
    services: Services,
    provisioner: RepositoryProvisioner,
    control: RunControl,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Creates an engine.
    ///
    /// `policy_document` is attached to every repository the engine creates.
    pub fn new(
        config: EngineConfig,
        resolver: NamespaceResolver,
        policy: PolicyLists,
        services: Services,
        policy_document: impl Into<String>,
    ) -> Result<Self> {
        if config.workers == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "workers must be at least 1".to_string(),
            });
        }
        let provisioner =
            RepositoryProvisioner::new(Arc::clone(&services.repositories), policy_document);
        Ok(Self {
            config,
            resolver,
            policy,
            services,
            provisioner,
            control: RunControl::new(),
        })
    }

    /// Uses an externally owned control, e.g. one wired to signal handlers.
    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    /// The run control.
    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn classifier(&self) -> Classifier<'_> {
        Classifier {
            resolver: &self.resolver,
            policy: &self.policy,
        }
    }

    fn broker(&self) -> CredentialBroker {
        CredentialBroker::new(
            Arc::clone(&self.services.origin_tokens),
            Arc::clone(&self.services.destination_tokens),
            &self.config.destination_region,
        )
        .with_destination_account(&self.config.destination_account)
    }

    /// What an image run would do, without touching any registry.
    pub fn plan_images(&self, entries: &[String]) -> Plan {
        let classifier = self.classifier();
        Plan {
            deletions: self.deletion_targets(),
            artifacts: entries
                .iter()
                .map(|line| PlannedArtifact {
                    reference: line.clone(),
                    decision: classifier.image(line).decision(true),
                })
                .collect(),
        }
    }

    /// What a bulk sync would do, without touching any registry.
    pub fn plan_sync(&self, entries: &[String]) -> Plan {
        let classifier = self.classifier();
        Plan {
            deletions: Vec::new(),
            artifacts: entries
                .iter()
                .map(|line| PlannedArtifact {
                    reference: line.clone(),
                    decision: classifier.repository(line).decision(false),
                })
                .collect(),
        }
    }

    fn deletion_targets(&self) -> Vec<String> {
        self.policy
            .denied
            .deletion_targets()
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Mirrors every image in `list`, then resets it from its template.
    ///
    /// Only destination authentication and list reset failures end the run
    /// early; everything else is recorded per artifact.
    pub async fn run_images(
        &self,
        list: &RequiredList,
        ledger: &dyn OutcomeSink,
    ) -> Result<RunSummary> {
        let run_id = Uuid::now_v7();
        self.images_inner(run_id, list, ledger)
            .instrument(info_span!("run", %run_id, kind = %RunKind::Images))
            .await
    }

    async fn images_inner(
        &self,
        run_id: Uuid,
        list: &RequiredList,
        ledger: &dyn OutcomeSink,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::start(run_id, RunKind::Images);
        info!(
            declared = list.entries().len(),
            workers = self.config.workers,
            "Starting image run"
        );

        let broker = self.broker();
        let destination = broker
            .destination_credentials()
            .await
            .map_err(EngineError::DestinationAuth)?;

        self.delete_denied(&mut summary).await;

        let work = self.classify_all(list.entries(), &mut summary, |c, line| c.image(line));
        let outcomes: Vec<_> = stream::iter(work)
            .map(|work| self.dispatch_image(work, &broker, &destination, ledger))
            .buffer_unordered(self.config.workers)
            .collect()
            .await;
        Self::tally(&mut summary, outcomes);

        self.complete(summary, Some(list))
    }

    /// Copies every tag of each listed repository.
    ///
    /// Deny and ignore policy apply; there is no deletion pass and no list
    /// reset.
    pub async fn sync_repositories(
        &self,
        entries: &[String],
        ledger: &dyn OutcomeSink,
    ) -> Result<RunSummary> {
        let run_id = Uuid::now_v7();
        self.sync_inner(run_id, entries, ledger)
            .instrument(info_span!("run", %run_id, kind = %RunKind::Sync))
            .await
    }

    async fn sync_inner(
        &self,
        run_id: Uuid,
        entries: &[String],
        ledger: &dyn OutcomeSink,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::start(run_id, RunKind::Sync);
        info!(
            declared = entries.len(),
            workers = self.config.workers,
            "Starting repository sync"
        );

        let broker = self.broker();
        let destination = broker
            .destination_credentials()
            .await
            .map_err(EngineError::DestinationAuth)?;

        let work = self.classify_all(entries, &mut summary, |c, line| c.repository(line));
        let outcomes: Vec<_> = stream::iter(work)
            .map(|work| self.dispatch_repository(work, &broker, &destination, ledger))
            .buffer_unordered(self.config.workers)
            .collect()
            .await;
        Self::tally(&mut summary, outcomes);

        self.complete(summary, None)
    }

    /// Mirrors every chart in `list`, then resets it from its template.
    ///
    /// Entries are either direct `.tgz` URLs or repository base URLs, which
    /// expand to every version in the repository index.
    pub async fn run_charts(
        &self,
        list: &RequiredList,
        ledger: &dyn OutcomeSink,
    ) -> Result<RunSummary> {
        let run_id = Uuid::now_v7();
        self.charts_inner(run_id, list, ledger)
            .instrument(info_span!("run", %run_id, kind = %RunKind::Charts))
            .await
    }

    async fn charts_inner(
        &self,
        run_id: Uuid,
        list: &RequiredList,
        ledger: &dyn OutcomeSink,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::start(run_id, RunKind::Charts);
        info!(
            declared = list.entries().len(),
            workers = self.config.workers,
            "Starting chart run"
        );

        let broker = self.broker();
        let destination = broker
            .destination_credentials()
            .await
            .map_err(EngineError::DestinationAuth)?;

        let abort = self.control.abort_token();
        self.config
            .retry
            .run(abort, |_| {
                self.services
                    .charts
                    .login(&self.config.registry_domain, &destination)
            })
            .await
            .map_err(EngineError::ChartLogin)?;

        let workdir = tempfile::Builder::new()
            .prefix("regmirror-charts-")
            .tempdir()
            .map_err(EngineError::WorkDir)?;

        let mut work = Vec::new();
        for entry in list.entries() {
            if self.control.is_stopped() {
                summary.add(ArtifactOutcome::NotDispatched);
                continue;
            }
            match self
                .config
                .retry
                .run(abort, |_| self.services.chart_source.expand(entry))
                .await
            {
                Ok(charts) => {
                    debug!(entry = %entry, charts = charts.len(), "Expanded chart entry");
                    work.extend(charts.into_iter().map(Work::Job));
                }
                Err(e) => work.push(Work::Rejected {
                    reference: entry.clone(),
                    error: ArtifactError::ChartFetch(e),
                }),
            }
        }

        let outcomes: Vec<_> = stream::iter(work)
            .map(|work| self.dispatch_chart(work, workdir.path(), ledger))
            .buffer_unordered(self.config.workers)
            .collect()
            .await;
        Self::tally(&mut summary, outcomes);

        self.complete(summary, Some(list))
    }

    fn classify_all<F>(
        &self,
        entries: &[String],
        summary: &mut RunSummary,
        classify: F,
    ) -> Vec<Work<ImageJob>>
    where
        F: Fn(&Classifier<'_>, &str) -> Classified,
    {
        let classifier = self.classifier();
        let mut work = Vec::with_capacity(entries.len());
        for line in entries {
            match classify(&classifier, line) {
                Classified::Mirror(job) => work.push(Work::Job(job)),
                Classified::Denied(entry) => {
                    info!(reference = %line, denied_by = %entry, "Skipping denied artifact");
                    summary.skipped_denied += 1;
                }
                Classified::Ignored => {
                    info!(reference = %line, "Skipping ignored artifact");
                    summary.skipped_ignored += 1;
                }
                Classified::Invalid(e) => work.push(Work::Rejected {
                    reference: line.clone(),
                    error: ArtifactError::InvalidReference(e),
                }),
            }
        }
        work
    }

    /// Force-deletes the destination repository of every denylist entry.
    async fn delete_denied(&self, summary: &mut RunSummary) {
        for path in self.policy.denied.deletion_targets() {
            let result = self
                .config
                .retry
                .run(self.control.abort_token(), |_| self.provisioner.delete(path))
                .await;
            match result {
                Ok(true) => summary.deleted += 1,
                Ok(false) => debug!(destination = path, "Denied repository not present"),
                Err(e) => {
                    warn!(destination = path, error = %e, "Failed to delete denied repository");
                    summary.deletion_failed += 1;
                }
            }
        }
    }

    async fn dispatch_image(
        &self,
        work: Work<ImageJob>,
        broker: &CredentialBroker,
        destination: &Credential,
        ledger: &dyn OutcomeSink,
    ) -> (ArtifactOutcome, bool) {
        if self.control.is_stopped() {
            return (ArtifactOutcome::NotDispatched, true);
        }
        match work {
            Work::Rejected { reference, error } => Self::finish(ledger, &reference, None, Err(error)),
            Work::Job(job) => {
                let reference = job.image.to_string();
                let span = info_span!("artifact", %reference, destination = %job.destination.path);
                let result = self
                    .mirror_image(&job, broker, destination)
                    .instrument(span)
                    .await;
                Self::finish(ledger, &reference, Some(&job.destination.path), result)
            }
        }
    }

    /// Provisions, authenticates and copies one image.
    ///
    /// Returns `Ok(true)` when the copy was skipped because the destination
    /// already holds the same digest.
    async fn mirror_image(
        &self,
        job: &ImageJob,
        broker: &CredentialBroker,
        destination: &Credential,
    ) -> std::result::Result<bool, ArtifactError> {
        let abort = self.control.abort_token();
        let retry = &self.config.retry;

        let uri = retry
            .run(abort, |_| self.provisioner.ensure(&job.destination.path))
            .await
            .map_err(ArtifactError::Provision)?;
        let source_credentials = retry
            .run(abort, |_| broker.origin_credentials(&job.image))
            .await
            .map_err(ArtifactError::OriginAuth)?;

        let source = job.image.to_string();
        if self.config.skip_existing_digest
            && self
                .digest_matches(job, &source, source_credentials.as_ref())
                .await
        {
            info!("Destination already holds this digest, skipping copy");
            return Ok(true);
        }

        let target = format!("{uri}:{}", job.destination.tag);
        let request = CopyRequest {
            source: &source,
            destination: &target,
            source_credentials: source_credentials.as_ref(),
            destination_credentials: destination,
        };
        retry
            .run(abort, |attempt| {
                debug!(attempt, target = %target, "Copying image");
                self.services.images.copy(&request, abort)
            })
            .await
            .map_err(ArtifactError::Transfer)?;
        Ok(false)
    }

    /// Returns true only when both digests are known and equal.
    async fn digest_matches(
        &self,
        job: &ImageJob,
        source: &str,
        credentials: Option<&Credential>,
    ) -> bool {
        let existing = match self
            .services
            .repositories
            .image_digest(&job.destination.path, &job.destination.tag)
            .await
        {
            Ok(Some(digest)) => digest,
            Ok(None) => return false,
            Err(e) => {
                debug!(error = %e, "Destination digest lookup failed, copying");
                return false;
            }
        };
        match self.services.images.source_digest(source, credentials).await {
            Ok(digest) => digest == existing,
            Err(e) => {
                debug!(error = %e, "Source digest lookup failed, copying");
                false
            }
        }
    }

    async fn dispatch_repository(
        &self,
        work: Work<ImageJob>,
        broker: &CredentialBroker,
        destination: &Credential,
        ledger: &dyn OutcomeSink,
    ) -> (ArtifactOutcome, bool) {
        if self.control.is_stopped() {
            return (ArtifactOutcome::NotDispatched, true);
        }
        match work {
            Work::Rejected { reference, error } => Self::finish(ledger, &reference, None, Err(error)),
            Work::Job(job) => {
                let reference = job.image.repository().to_string();
                let span = info_span!("artifact", %reference, destination = %job.destination.path);
                let result = self
                    .sync_repository(&job, broker, destination)
                    .instrument(span)
                    .await;
                Self::finish(ledger, &reference, Some(&job.destination.path), result)
            }
        }
    }

    async fn sync_repository(
        &self,
        job: &ImageJob,
        broker: &CredentialBroker,
        destination: &Credential,
    ) -> std::result::Result<bool, ArtifactError> {
        let abort = self.control.abort_token();
        let retry = &self.config.retry;

        let uri = retry
            .run(abort, |_| self.provisioner.ensure(&job.destination.path))
            .await
            .map_err(ArtifactError::Provision)?;
        let source_credentials = retry
            .run(abort, |_| broker.origin_credentials(&job.image))
            .await
            .map_err(ArtifactError::OriginAuth)?;

        // skopeo sync appends the source repository name to the destination.
        let parent = uri
            .rsplit_once('/')
            .map_or(self.config.registry_domain.as_str(), |(parent, _)| parent);
        let request = CopyRequest {
            source: job.image.repository(),
            destination: parent,
            source_credentials: source_credentials.as_ref(),
            destination_credentials: destination,
        };
        retry
            .run(abort, |attempt| {
                debug!(attempt, target = %parent, "Syncing repository");
                self.services.images.sync_repository(&request, abort)
            })
            .await
            .map_err(ArtifactError::Transfer)?;
        Ok(false)
    }

    async fn dispatch_chart(
        &self,
        work: Work<ChartReference>,
        workdir: &Path,
        ledger: &dyn OutcomeSink,
    ) -> (ArtifactOutcome, bool) {
        if self.control.is_stopped() {
            return (ArtifactOutcome::NotDispatched, true);
        }
        match work {
            Work::Rejected { reference, error } => Self::finish(ledger, &reference, None, Err(error)),
            Work::Job(chart) => {
                let repository = self.config.chart_repository(&chart.name);
                let span = info_span!("artifact", reference = %chart.url, destination = %repository);
                let result = self
                    .mirror_chart(&chart, &repository, workdir)
                    .instrument(span)
                    .await;
                Self::finish(ledger, &chart.url, Some(&repository), result)
            }
        }
    }

    async fn mirror_chart(
        &self,
        chart: &ChartReference,
        repository: &str,
        workdir: &Path,
    ) -> std::result::Result<bool, ArtifactError> {
        let abort = self.control.abort_token();
        let retry = &self.config.retry;

        chart.archive_stem().map_err(ArtifactError::InvalidReference)?;
        retry
            .run(abort, |_| self.provisioner.ensure(repository))
            .await
            .map_err(ArtifactError::Provision)?;
        let archive = retry
            .run(abort, |_| self.services.chart_source.download(chart, workdir))
            .await
            .map_err(ArtifactError::ChartFetch)?;

        let target = self.config.chart_target();
        let pushed = retry
            .run(abort, |attempt| {
                debug!(attempt, target = %target, version = %chart.version, "Pushing chart");
                self.services.charts.push(&archive, &target, abort)
            })
            .await
            .map_err(ArtifactError::Transfer);

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            debug!(archive = %archive.display(), error = %e, "Failed to remove chart archive");
        }
        pushed.map(|()| false)
    }

    /// Logs and records one outcome. The flag is false if the ledger write
    /// failed.
    fn finish(
        ledger: &dyn OutcomeSink,
        reference: &str,
        destination: Option<&str>,
        result: std::result::Result<bool, ArtifactError>,
    ) -> (ArtifactOutcome, bool) {
        let (outcome, recorded) = match result {
            Ok(unchanged) => {
                info!(reference, ?destination, unchanged, "Mirrored");
                (
                    ArtifactOutcome::Mirrored { unchanged },
                    ledger.record(reference, RunOutcome::Mirrored),
                )
            }
            Err(e) => {
                error!(reference, ?destination, error = %e, "Failed to mirror");
                (
                    ArtifactOutcome::Failed(FailedArtifact {
                        reference: reference.to_string(),
                        destination: destination.map(ToString::to_string),
                        error: e.to_string(),
                    }),
                    ledger.record(reference, RunOutcome::Failed),
                )
            }
        };

        match recorded {
            Ok(()) => (outcome, true),
            Err(e) => {
                error!(reference, error = %e, "Failed to append outcome to ledger");
                (outcome, false)
            }
        }
    }

    fn tally(summary: &mut RunSummary, outcomes: Vec<(ArtifactOutcome, bool)>) {
        for (outcome, recorded) in outcomes {
            summary.add(outcome);
            if !recorded {
                summary.ledger_errors += 1;
            }
        }
    }

    /// Closes a run: decides cancellation and resets the list when the run
    /// completed.
    fn complete(&self, mut summary: RunSummary, list: Option<&RequiredList>) -> Result<RunSummary> {
        summary.cancelled = summary.not_dispatched > 0 || self.control.is_aborted();
        if summary.cancelled {
            warn!(
                not_dispatched = summary.not_dispatched,
                "Run cancelled, declared list left in place"
            );
        } else if let Some(list) = list {
            summary.list_reset = list.reset()?;
        }

        let summary = summary.finish();
        info!(
            mirrored = summary.mirrored,
            unchanged = summary.unchanged,
            failed = summary.failed,
            skipped_denied = summary.skipped_denied,
            skipped_ignored = summary.skipped_ignored,
            deleted = summary.deleted,
            "Run finished"
        );
        Ok(summary)
    }
}
