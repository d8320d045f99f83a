//! End-to-end runs of the engine against in-memory registries and fake tools.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regmirror_core::{
    ChartReference, DeniedSet, IgnoreSet, MemoryLedger, NamespaceResolver, PolicyLists,
    RequiredList, RunOutcome,
};
use regmirror_registry::{ChartSource, Credential, InMemoryRegistry, RegistryError};
use regmirror_sync::{
    ChartTransfer, CopyRequest, Decision, EngineConfig, EngineError, ImageTransfer, RetryPolicy,
    RunControl, Services, SyncEngine, TransferError,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DOMAIN: &str = "834204282212.dkr.ecr.cn-northwest-1.amazonaws.com.cn";
const POLICY: &str = r#"{"Version":"2012-10-17","Statement":[]}"#;
const TEMPLATE: &str = "# declare images below\n";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Copied {
    source: String,
    destination: String,
    source_password: Option<String>,
}

#[derive(Default)]
struct ToolState {
    copies: Vec<Copied>,
    syncs: Vec<Copied>,
    hang: HashSet<String>,
    fail: HashSet<String>,
    digests: HashMap<String, String>,
    logins: Vec<String>,
    fail_login: bool,
    pushes: Vec<(String, String)>,
}

#[derive(Default)]
struct FakeTools {
    state: Mutex<ToolState>,
    stop_after_copy: Option<RunControl>,
}

impl FakeTools {
    fn stopping(control: RunControl) -> Self {
        Self {
            stop_after_copy: Some(control),
            ..Self::default()
        }
    }

    fn record(request: &CopyRequest<'_>) -> Copied {
        Copied {
            source: request.source.to_string(),
            destination: request.destination.to_string(),
            source_password: request.source_credentials.map(|c| c.password().to_string()),
        }
    }

    fn copies(&self) -> Vec<Copied> {
        self.state.lock().copies.clone()
    }
}

#[async_trait]
impl ImageTransfer for FakeTools {
    async fn copy(
        &self,
        request: &CopyRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let (hang, fail) = {
            let mut state = self.state.lock();
            state.copies.push(Self::record(request));
            (
                state.hang.contains(request.source),
                state.fail.contains(request.source),
            )
        };
        if let Some(control) = &self.stop_after_copy {
            control.stop();
        }
        if hang {
            cancel.cancelled().await;
            return Err(TransferError::Cancelled {
                program: "skopeo".to_string(),
            });
        }
        if fail {
            return Err(TransferError::Failed {
                program: "skopeo".to_string(),
                code: Some(1),
                output: "manifest unknown".to_string(),
            });
        }
        Ok(())
    }

    async fn sync_repository(
        &self,
        request: &CopyRequest<'_>,
        _cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        self.state.lock().syncs.push(Self::record(request));
        Ok(())
    }

    async fn source_digest(
        &self,
        source: &str,
        _credentials: Option<&Credential>,
    ) -> Result<String, TransferError> {
        self.state
            .lock()
            .digests
            .get(source)
            .cloned()
            .ok_or_else(|| TransferError::Failed {
                program: "skopeo".to_string(),
                code: Some(1),
                output: "manifest unknown".to_string(),
            })
    }
}

#[async_trait]
impl ChartTransfer for FakeTools {
    async fn login(&self, registry: &str, _credentials: &Credential) -> Result<(), TransferError> {
        let mut state = self.state.lock();
        if state.fail_login {
            return Err(TransferError::Failed {
                program: "helm".to_string(),
                code: Some(1),
                output: "unauthorized".to_string(),
            });
        }
        state.logins.push(registry.to_string());
        Ok(())
    }

    async fn push(
        &self,
        archive: &Path,
        target: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let file = archive
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.state.lock().pushes.push((file, target.to_string()));
        Ok(())
    }
}

/// Serves a fixed repository index and writes placeholder archives.
struct FakeCharts;

#[async_trait]
impl ChartSource for FakeCharts {
    async fn expand(&self, entry: &str) -> regmirror_registry::Result<Vec<ChartReference>> {
        if entry.ends_with(".tgz") {
            return ChartReference::from_url(entry)
                .map(|c| vec![c])
                .map_err(|e| RegistryError::InvalidChart {
                    entry: entry.to_string(),
                    message: e.to_string(),
                });
        }
        if entry.starts_with("https://charts.example/") {
            return Ok(vec![
                ChartReference::new("https://charts.example/redis-17.0.0.tgz", "redis", "17.0.0"),
                ChartReference::new("https://charts.example/redis-17.1.0.tgz", "redis", "17.1.0"),
            ]);
        }
        if entry.starts_with("https://hostile.example/") {
            return Ok(vec![ChartReference::new(
                "https://hostile.example/x-1.0.0.tgz",
                "../escaped",
                "1.0.0",
            )]);
        }
        Err(RegistryError::HttpError {
            url: format!("{entry}/index.yaml"),
            status: 404,
        })
    }

    async fn download(
        &self,
        chart: &ChartReference,
        dir: &Path,
    ) -> regmirror_registry::Result<PathBuf> {
        let path = dir.join(format!("{}-{}.tgz", chart.name, chart.version));
        tokio::fs::write(&path, b"chart")
            .await
            .map_err(|source| RegistryError::IoError {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

struct Harness {
    dir: TempDir,
    registry: Arc<InMemoryRegistry>,
    tools: Arc<FakeTools>,
    control: RunControl,
    denied: Vec<&'static str>,
    ignored: Vec<&'static str>,
    config: EngineConfig,
}

impl Harness {
    fn new() -> Self {
        Self::with(InMemoryRegistry::default(), FakeTools::default())
    }

    fn with(registry: InMemoryRegistry, tools: FakeTools) -> Self {
        let retry = RetryPolicy::builder()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .build();
        Self {
            dir: TempDir::new().unwrap(),
            registry: Arc::new(registry),
            tools: Arc::new(tools),
            control: RunControl::new(),
            denied: Vec::new(),
            ignored: Vec::new(),
            config: EngineConfig::default().with_retry(retry),
        }
    }

    fn engine(&self) -> SyncEngine {
        let resolver = NamespaceResolver::default();
        let policy = PolicyLists {
            denied: DeniedSet::new(self.denied.iter().copied(), &resolver),
            ignored: IgnoreSet::new(self.ignored.iter().copied()),
        };
        let services = Services {
            repositories: self.registry.clone(),
            origin_tokens: self.registry.clone(),
            destination_tokens: self.registry.clone(),
            images: self.tools.clone(),
            charts: self.tools.clone(),
            chart_source: Arc::new(FakeCharts),
        };
        SyncEngine::new(self.config.clone(), resolver, policy, services, POLICY)
            .unwrap()
            .with_control(self.control.clone())
    }

    fn list(&self, lines: &[&str]) -> RequiredList {
        let path = self.dir.path().join("required.txt");
        let template = self.dir.path().join("required.txt.template");
        std::fs::write(&path, lines.join("\n")).unwrap();
        std::fs::write(&template, TEMPLATE).unwrap();
        RequiredList::load(path, Some(template)).unwrap()
    }

    fn list_content(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("required.txt")).unwrap()
    }
}

#[tokio::test]
async fn test_failed_line_does_not_stop_run() {
    let harness = Harness::new();
    harness.registry.fail_create("quay/broken/app");
    let list = harness.list(&["nginx", "quay.io/broken/app:1", "redis:7"]);
    let ledger = MemoryLedger::new();

    let summary = harness.engine().run_images(&list, &ledger).await.unwrap();

    assert_eq!(summary.mirrored, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(
        ledger.with_outcome(RunOutcome::Mirrored),
        vec!["nginx:latest", "redis:7"]
    );
    assert_eq!(
        ledger.with_outcome(RunOutcome::Failed),
        vec!["quay.io/broken/app:1"]
    );
    assert_eq!(summary.failures[0].destination.as_deref(), Some("quay/broken/app"));

    assert!(summary.list_reset);
    assert_eq!(harness.list_content(), TEMPLATE);

    let copies = harness.tools.copies();
    assert_eq!(copies.len(), 2);
    assert_eq!(copies[0].destination, format!("{DOMAIN}/dockerhub/nginx:latest"));
    assert_eq!(copies[1].destination, format!("{DOMAIN}/dockerhub/redis:7"));
    assert_eq!(harness.registry.policy("dockerhub/nginx").as_deref(), Some(POLICY));
}

#[tokio::test]
async fn test_denied_repository_deleted_once_and_skipped() {
    let mut harness = Harness::with(
        InMemoryRegistry::default().with_image("quay/coreos/etcd", "v3.5.0", "sha256:old"),
        FakeTools::default(),
    );
    harness.denied = vec!["quay.io/coreos/etcd:v3.5.0", "quay.io/coreos/etcd"];
    let list = harness.list(&["quay.io/coreos/etcd:v3.5.1", "nginx"]);
    let ledger = MemoryLedger::new();

    let summary = harness.engine().run_images(&list, &ledger).await.unwrap();

    assert_eq!(harness.registry.calls().delete, 1);
    assert!(!harness.registry.contains("quay/coreos/etcd"));
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.skipped_denied, 1);
    assert_eq!(summary.mirrored, 1);
    assert_eq!(ledger.entries().len(), 1);
    assert_eq!(harness.tools.copies()[0].source, "nginx:latest");
}

#[tokio::test]
async fn test_deletion_failure_does_not_fail_run() {
    let mut harness = Harness::with(
        InMemoryRegistry::default().with_repository("gcr/google"),
        FakeTools::default(),
    );
    harness.registry.fail_delete("gcr/google");
    harness.denied = vec!["gcr.io/google"];
    let list = harness.list(&["nginx"]);

    let summary = harness
        .engine()
        .run_images(&list, &MemoryLedger::new())
        .await
        .unwrap();

    assert_eq!(summary.deletion_failed, 1);
    assert_eq!(summary.exit_code(), 0);
}

#[tokio::test]
async fn test_ignored_line_never_reaches_registry() {
    let mut harness = Harness::new();
    harness.ignored = vec!["redis:7"];
    let list = harness.list(&["redis:7"]);
    let ledger = MemoryLedger::new();

    let summary = harness.engine().run_images(&list, &ledger).await.unwrap();

    let calls = harness.registry.calls();
    assert_eq!(calls.describe, 0);
    assert_eq!(calls.create, 0);
    assert_eq!(summary.skipped_ignored, 1);
    assert!(ledger.entries().is_empty());
    assert!(harness.tools.copies().is_empty());
}

#[tokio::test]
async fn test_invalid_line_recorded_as_failed() {
    let harness = Harness::new();
    let list = harness.list(&["nginx@sha256:abc"]);
    let ledger = MemoryLedger::new();

    let summary = harness.engine().run_images(&list, &ledger).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].destination, None);
    assert_eq!(
        ledger.with_outcome(RunOutcome::Failed),
        vec!["nginx@sha256:abc"]
    );
}

#[tokio::test]
async fn test_matching_digest_skips_copy() {
    let harness = Harness::with(
        InMemoryRegistry::default().with_image("dockerhub/nginx", "1.25", "sha256:abc"),
        FakeTools::default(),
    );
    harness
        .tools
        .state
        .lock()
        .digests
        .insert("nginx:1.25".to_string(), "sha256:abc".to_string());
    let list = harness.list(&["nginx:1.25"]);
    let ledger = MemoryLedger::new();

    let summary = harness.engine().run_images(&list, &ledger).await.unwrap();

    assert_eq!(summary.mirrored, 1);
    assert_eq!(summary.unchanged, 1);
    assert!(harness.tools.copies().is_empty());
    assert_eq!(ledger.with_outcome(RunOutcome::Mirrored), vec!["nginx:1.25"]);
}

#[tokio::test]
async fn test_differing_digest_copies() {
    let harness = Harness::with(
        InMemoryRegistry::default().with_image("dockerhub/nginx", "1.25", "sha256:old"),
        FakeTools::default(),
    );
    harness
        .tools
        .state
        .lock()
        .digests
        .insert("nginx:1.25".to_string(), "sha256:new".to_string());
    let list = harness.list(&["nginx:1.25"]);

    let summary = harness
        .engine()
        .run_images(&list, &MemoryLedger::new())
        .await
        .unwrap();

    assert_eq!(summary.unchanged, 0);
    assert_eq!(harness.tools.copies().len(), 1);
}

#[tokio::test]
async fn test_digest_check_disabled() {
    let mut harness = Harness::with(
        InMemoryRegistry::default().with_image("dockerhub/nginx", "1.25", "sha256:abc"),
        FakeTools::default(),
    );
    harness.config = harness.config.clone().with_skip_existing_digest(false);
    let list = harness.list(&["nginx:1.25"]);

    harness
        .engine()
        .run_images(&list, &MemoryLedger::new())
        .await
        .unwrap();

    assert_eq!(harness.registry.calls().image_digest, 0);
    assert_eq!(harness.tools.copies().len(), 1);
}

#[tokio::test]
async fn test_destination_auth_failure_is_fatal() {
    let harness = Harness::new();
    harness.registry.fail_tokens_for("cn-northwest-1");
    let list = harness.list(&["nginx"]);
    let ledger = MemoryLedger::new();

    let err = harness.engine().run_images(&list, &ledger).await.unwrap_err();

    assert!(matches!(err, EngineError::DestinationAuth(_)));
    assert!(ledger.entries().is_empty());
    assert_eq!(harness.list_content(), "nginx");
}

#[tokio::test]
async fn test_registry_native_origin_uses_its_region() {
    let harness = Harness::new();
    let list = harness.list(&["123456789012.dkr.ecr.us-west-2.amazonaws.com/team/app:1"]);

    let summary = harness
        .engine()
        .run_images(&list, &MemoryLedger::new())
        .await
        .unwrap();

    assert_eq!(summary.mirrored, 1);
    let copies = harness.tools.copies();
    assert_eq!(copies[0].source_password.as_deref(), Some("token-us-west-2"));
    assert_eq!(copies[0].destination, format!("{DOMAIN}/team/app:1"));
}

#[tokio::test]
async fn test_generic_origin_pulls_anonymously() {
    let harness = Harness::new();
    let list = harness.list(&["ghcr.io/owner/app:2"]);

    harness
        .engine()
        .run_images(&list, &MemoryLedger::new())
        .await
        .unwrap();

    assert_eq!(harness.tools.copies()[0].source_password, None);
}

#[tokio::test]
async fn test_transient_provisioning_failure_retried() {
    let harness = Harness::new();
    harness.registry.fail_create_transiently("dockerhub/nginx", 2);
    let list = harness.list(&["nginx"]);

    let summary = harness
        .engine()
        .run_images(&list, &MemoryLedger::new())
        .await
        .unwrap();

    assert_eq!(summary.mirrored, 1);
    assert_eq!(harness.registry.calls().create, 3);
}

#[tokio::test]
async fn test_copy_failure_recorded() {
    let harness = Harness::new();
    harness
        .tools
        .state
        .lock()
        .fail
        .insert("nginx:latest".to_string());
    let list = harness.list(&["nginx"]);
    let ledger = MemoryLedger::new();

    let summary = harness.engine().run_images(&list, &ledger).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert!(summary.failures[0].error.contains("manifest unknown"));
    // Non-retryable: attempted once.
    assert_eq!(harness.tools.copies().len(), 1);
    assert!(summary.list_reset);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_repository_provisioned_once() {
    let mut harness = Harness::with(
        InMemoryRegistry::default().with_create_delay(Duration::from_millis(20)),
        FakeTools::default(),
    );
    harness.config = harness.config.clone().with_workers(3);
    let list = harness.list(&["nginx:1", "nginx:2", "nginx:3"]);

    let summary = harness
        .engine()
        .run_images(&list, &MemoryLedger::new())
        .await
        .unwrap();

    assert_eq!(summary.mirrored, 3);
    assert_eq!(harness.registry.calls().create, 1);
}

#[tokio::test]
async fn test_stop_before_run_dispatches_nothing() {
    let harness = Harness::new();
    harness.control.stop();
    let list = harness.list(&["nginx", "redis:7", "busybox"]);
    let ledger = MemoryLedger::new();

    let summary = harness.engine().run_images(&list, &ledger).await.unwrap();

    assert_eq!(summary.not_dispatched, 3);
    assert!(summary.cancelled);
    assert_eq!(summary.exit_code(), 130);
    assert!(!summary.list_reset);
    assert!(ledger.entries().is_empty());
    assert_eq!(harness.list_content(), "nginx\nredis:7\nbusybox");
}

#[tokio::test]
async fn test_stop_mid_run_finishes_in_flight() {
    let control = RunControl::new();
    let mut harness = Harness::with(
        InMemoryRegistry::default(),
        FakeTools::stopping(control.clone()),
    );
    harness.control = control;
    let list = harness.list(&["nginx", "redis:7", "busybox"]);
    let ledger = MemoryLedger::new();

    let summary = harness.engine().run_images(&list, &ledger).await.unwrap();

    assert_eq!(summary.mirrored, 1);
    assert_eq!(summary.not_dispatched, 2);
    assert!(summary.cancelled);
    assert_eq!(ledger.with_outcome(RunOutcome::Mirrored), vec!["nginx:latest"]);
    assert!(!summary.list_reset);
}

#[tokio::test]
async fn test_abort_kills_in_flight_transfer() {
    let harness = Harness::new();
    harness
        .tools
        .state
        .lock()
        .hang
        .insert("slow:1".to_string());
    let list = harness.list(&["slow:1", "nginx"]);
    let ledger = MemoryLedger::new();
    let engine = harness.engine();
    let control = harness.control.clone();

    let (summary, ()) = tokio::join!(engine.run_images(&list, &ledger), async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        control.abort();
    });
    let summary = summary.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.not_dispatched, 1);
    assert!(summary.cancelled);
    assert_eq!(ledger.with_outcome(RunOutcome::Failed), vec!["slow:1"]);
    assert!(!summary.list_reset);
}

#[tokio::test]
async fn test_sync_copies_into_parent_path() {
    let mut harness = Harness::new();
    harness.denied = vec!["gcr.io/google"];
    let entries = vec![
        "quay.io/coreos/etcd:v3.5.0".to_string(),
        "gcr.io/google/pause".to_string(),
    ];
    let ledger = MemoryLedger::new();

    let summary = harness
        .engine()
        .sync_repositories(&entries, &ledger)
        .await
        .unwrap();

    assert_eq!(summary.mirrored, 1);
    assert_eq!(summary.skipped_denied, 1);
    assert_eq!(harness.registry.calls().delete, 0);
    assert!(harness.registry.contains("quay/coreos/etcd"));

    let syncs = harness.tools.state.lock().syncs.clone();
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0].source, "quay.io/coreos/etcd");
    assert_eq!(syncs[0].destination, format!("{DOMAIN}/quay/coreos"));
    assert_eq!(
        ledger.with_outcome(RunOutcome::Mirrored),
        vec!["quay.io/coreos/etcd"]
    );
}

#[tokio::test]
async fn test_charts_expand_and_push() {
    let harness = Harness::new();
    let list = harness.list(&[
        "https://charts.example/stable",
        "https://dl.example/ingress-nginx-4.7.1.tgz",
        "https://broken.example/charts",
    ]);
    let ledger = MemoryLedger::new();

    let summary = harness.engine().run_charts(&list, &ledger).await.unwrap();

    assert_eq!(summary.mirrored, 3);
    assert_eq!(summary.failed, 1);
    assert!(summary.list_reset);
    assert!(harness.registry.contains("charts/redis"));
    assert!(harness.registry.contains("charts/ingress-nginx"));

    let state = harness.tools.state.lock();
    assert_eq!(state.logins, vec![DOMAIN.to_string()]);
    let mut pushed: Vec<_> = state.pushes.iter().map(|(file, _)| file.clone()).collect();
    pushed.sort();
    assert_eq!(
        pushed,
        vec!["ingress-nginx-4.7.1.tgz", "redis-17.0.0.tgz", "redis-17.1.0.tgz"]
    );
    assert!(state
        .pushes
        .iter()
        .all(|(_, target)| *target == format!("oci://{DOMAIN}/charts")));
    drop(state);

    assert_eq!(
        ledger.with_outcome(RunOutcome::Failed),
        vec!["https://broken.example/charts"]
    );
    assert!(ledger
        .with_outcome(RunOutcome::Mirrored)
        .contains(&"https://charts.example/redis-17.1.0.tgz".to_string()));
}

#[tokio::test]
async fn test_chart_with_unsafe_name_fails_before_provisioning() {
    let harness = Harness::new();
    let list = harness.list(&[
        "https://hostile.example/charts",
        "https://dl.example/ingress-nginx-4.7.1.tgz",
    ]);
    let ledger = MemoryLedger::new();

    let summary = harness.engine().run_charts(&list, &ledger).await.unwrap();

    assert_eq!(summary.mirrored, 1);
    assert_eq!(summary.failed, 1);
    assert!(!harness.registry.contains("charts/../escaped"));
    assert_eq!(harness.registry.calls().create, 1);
    assert_eq!(harness.tools.state.lock().pushes.len(), 1);
    assert_eq!(
        ledger.with_outcome(RunOutcome::Failed),
        vec!["https://hostile.example/x-1.0.0.tgz"]
    );
}

#[tokio::test]
async fn test_chart_login_failure_is_fatal() {
    let harness = Harness::new();
    harness.tools.state.lock().fail_login = true;
    let list = harness.list(&["https://dl.example/ingress-nginx-4.7.1.tgz"]);

    let err = harness
        .engine()
        .run_charts(&list, &MemoryLedger::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ChartLogin(_)));
    assert_eq!(harness.registry.calls().create, 0);
}

#[test]
fn test_plan_images() {
    let mut harness = Harness::new();
    harness.denied = vec!["quay.io"];
    harness.ignored = vec!["redis:7"];
    let entries: Vec<String> = ["nginx", "quay.io/coreos/etcd:v3.5.0", "redis:7"]
        .iter()
        .map(ToString::to_string)
        .collect();

    let plan = harness.engine().plan_images(&entries);

    assert_eq!(plan.deletions, vec!["quay"]);
    assert_eq!(
        plan.artifacts[0].decision,
        Decision::Mirror {
            destination: "dockerhub/nginx".to_string(),
            tag: Some("latest".to_string()),
        }
    );
    assert!(matches!(plan.artifacts[1].decision, Decision::Denied { .. }));
    assert_eq!(plan.artifacts[2].decision, Decision::Ignored);
    assert_eq!(harness.registry.calls().describe, 0);
}
