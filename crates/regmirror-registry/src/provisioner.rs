//! Ensures destination repositories exist before a transfer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::error::{ErrorKind, RegistryError, Result};
use crate::service::RepositoryService;

/// Creates destination repositories on demand and attaches the access policy.
///
/// Calls for the same path are serialized, so concurrent workers mirroring
/// two tags of one repository never race on the create.
pub struct RepositoryProvisioner {
    service: Arc<dyn RepositoryService>,
    policy: String,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for RepositoryProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryProvisioner")
            .field("policy_len", &self.policy.len())
            .field("paths", &self.locks.lock().len())
            .finish_non_exhaustive()
    }
}

impl RepositoryProvisioner {
    /// Creates a provisioner that attaches `policy` to every new repository.
    #[must_use]
    pub fn new(service: Arc<dyn RepositoryService>, policy: impl Into<String>) -> Self {
        Self {
            service,
            policy: policy.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.lock().entry(path.to_string()).or_default())
    }

    /// Makes sure `path` exists and returns its URI.
    ///
    /// An existing repository is returned as is; its policy is left alone.
    /// A failed policy attach on a new repository is logged and the URI is
    /// still returned.
    ///
    /// # Errors
    ///
    /// Returns the registry error if the repository can be neither found nor
    /// created.
    #[instrument(skip(self), fields(destination = %path))]
    pub async fn ensure(&self, path: &str) -> Result<String> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        if let Some(existing) = self.service.describe_repository(path).await? {
            return Ok(existing.uri);
        }

        match self.service.create_repository(path).await {
            Ok(created) => {
                info!(uri = %created.uri, "Created repository");
                if let Err(e) = self.service.set_repository_policy(path, &self.policy).await {
                    let e = RegistryError::PolicyAttachFailed {
                        repository: path.to_string(),
                        message: e.to_string(),
                    };
                    warn!(error = %e, "Repository created without access policy");
                }
                Ok(created.uri)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Created by someone outside this process since the describe.
                self.service
                    .describe_repository(path)
                    .await?
                    .map(|r| r.uri)
                    .ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Force-deletes `path`. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns the registry error for anything other than "not found".
    #[instrument(skip(self), fields(destination = %path))]
    pub async fn delete(&self, path: &str) -> Result<bool> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        match self.service.delete_repository(path, true).await {
            Ok(()) => {
                info!("Deleted repository");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRegistry;
    use std::time::Duration;

    const POLICY: &str = r#"{"Version":"2008-10-17","Statement":[]}"#;

    fn provisioner(registry: &Arc<InMemoryRegistry>) -> RepositoryProvisioner {
        RepositoryProvisioner::new(Arc::clone(registry) as Arc<dyn RepositoryService>, POLICY)
    }

    #[tokio::test]
    async fn test_ensure_creates_and_attaches_policy() {
        let registry = Arc::new(InMemoryRegistry::new("reg.example"));
        let provisioner = provisioner(&registry);

        let uri = provisioner.ensure("quay/coreos/etcd").await.unwrap();
        assert_eq!(uri, "reg.example/quay/coreos/etcd");
        assert_eq!(registry.policy("quay/coreos/etcd").as_deref(), Some(POLICY));
    }

    #[tokio::test]
    async fn test_ensure_twice_attaches_policy_once() {
        let registry = Arc::new(InMemoryRegistry::new("reg.example"));
        let provisioner = provisioner(&registry);

        let first = provisioner.ensure("dockerhub/nginx").await.unwrap();
        let second = provisioner.ensure("dockerhub/nginx").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.calls().create, 1);
        assert_eq!(registry.calls().set_policy, 1);
    }

    #[tokio::test]
    async fn test_existing_repository_keeps_its_policy() {
        let registry = Arc::new(InMemoryRegistry::new("reg.example").with_repository("gcr/pause"));
        let provisioner = provisioner(&registry);

        provisioner.ensure("gcr/pause").await.unwrap();
        assert_eq!(registry.calls().create, 0);
        assert!(registry.policy("gcr/pause").is_none());
    }

    #[tokio::test]
    async fn test_policy_failure_still_returns_uri() {
        let registry = Arc::new(InMemoryRegistry::new("reg.example"));
        registry.fail_policy();
        let provisioner = provisioner(&registry);

        let uri = provisioner.ensure("ghcr/owner/app").await.unwrap();
        assert_eq!(uri, "reg.example/ghcr/owner/app");
        assert!(registry.contains("ghcr/owner/app"));
    }

    #[tokio::test]
    async fn test_create_failure_is_error() {
        let registry = Arc::new(InMemoryRegistry::new("reg.example"));
        registry.fail_create("dockerhub/broken");
        let provisioner = provisioner(&registry);

        let err = provisioner.ensure("dockerhub/broken").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ensure_creates_once() {
        let registry = Arc::new(
            InMemoryRegistry::new("reg.example").with_create_delay(Duration::from_millis(20)),
        );
        let provisioner = Arc::new(provisioner(&registry));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provisioner = Arc::clone(&provisioner);
                tokio::spawn(async move { provisioner.ensure("dockerhub/redis").await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "reg.example/dockerhub/redis");
        }
        assert_eq!(registry.calls().create, 1);
        assert_eq!(registry.calls().set_policy, 1);
    }

    #[tokio::test]
    async fn test_delete_absent_is_false() {
        let registry = Arc::new(InMemoryRegistry::new("reg.example"));
        let provisioner = provisioner(&registry);
        assert!(!provisioner.delete("dockerhub/gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_with_contents() {
        let registry = Arc::new(
            InMemoryRegistry::new("reg.example").with_image("dockerhub/old", "v1", "sha256:1"),
        );
        let provisioner = provisioner(&registry);
        assert!(provisioner.delete("dockerhub/old").await.unwrap());
        assert!(!registry.contains("dockerhub/old"));
    }
}
