//! Seams to the destination registry provider.
//!
//! The engine never talks to a provider directly; it goes through these two
//! traits so provisioning and credential exchange can be exercised against
//! [`InMemoryRegistry`](crate::InMemoryRegistry) in tests.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;

/// A repository in the destination registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    /// Repository path, e.g. `quay/coreos/etcd`.
    #[serde(rename = "repositoryName")]
    pub name: String,

    /// Pullable URI, e.g. `<registry-host>/quay/coreos/etcd`.
    #[serde(rename = "repositoryUri")]
    pub uri: String,
}

/// Repository management API of the destination registry.
#[async_trait]
pub trait RepositoryService: Send + Sync {
    /// Describes one repository; `Ok(None)` when it does not exist.
    async fn describe_repository(&self, name: &str) -> Result<Option<Repository>>;

    /// Creates a repository.
    ///
    /// Returns [`RegistryError::AlreadyExists`](crate::RegistryError::AlreadyExists)
    /// if it already exists.
    async fn create_repository(&self, name: &str) -> Result<Repository>;

    /// Replaces the access policy of a repository with `policy_text`.
    async fn set_repository_policy(&self, name: &str, policy_text: &str) -> Result<()>;

    /// Deletes a repository. With `force`, images inside are deleted too.
    async fn delete_repository(&self, name: &str, force: bool) -> Result<()>;

    /// Manifest digest stored under `tag`; `Ok(None)` when absent.
    async fn image_digest(&self, name: &str, tag: &str) -> Result<Option<String>>;
}

/// Issues registry authorization tokens.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Returns a base64 `user:password` token for `region`, optionally scoped
    /// to a registry `account`.
    async fn authorization_token(&self, region: &str, account: Option<&str>) -> Result<String>;
}
