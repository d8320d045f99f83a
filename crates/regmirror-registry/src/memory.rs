//! In-memory registry used by tests and dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;

use crate::error::{RegistryError, Result};
use crate::service::{Repository, RepositoryService, TokenService};

/// Number of calls made to each operation of an [`InMemoryRegistry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `describe_repository` calls.
    pub describe: usize,
    /// `create_repository` calls.
    pub create: usize,
    /// `set_repository_policy` calls.
    pub set_policy: usize,
    /// `delete_repository` calls.
    pub delete: usize,
    /// `image_digest` calls.
    pub image_digest: usize,
    /// `authorization_token` calls.
    pub token: usize,
}

#[derive(Debug, Default)]
struct StoredRepository {
    policy: Option<String>,
    images: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    repositories: BTreeMap<String, StoredRepository>,
    fail_create: HashSet<String>,
    transient_create: HashMap<String, u32>,
    fail_describe: HashSet<String>,
    fail_delete: HashSet<String>,
    fail_policy: bool,
    fail_tokens: HashSet<String>,
    calls: CallCounts,
}

/// Registry fake that keeps repositories, tags and policies in memory.
///
/// Failures can be injected per repository path to exercise the engine's
/// error handling.
#[derive(Debug)]
pub struct InMemoryRegistry {
    registry_domain: String,
    create_delay: Option<Duration>,
    state: Mutex<State>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new("834204282212.dkr.ecr.cn-northwest-1.amazonaws.com.cn")
    }
}

impl InMemoryRegistry {
    /// Creates an empty registry reachable at `registry_domain`.
    #[must_use]
    pub fn new(registry_domain: impl Into<String>) -> Self {
        Self {
            registry_domain: registry_domain.into(),
            create_delay: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Pre-creates a repository.
    #[must_use]
    pub fn with_repository(self, name: &str) -> Self {
        self.state
            .lock()
            .repositories
            .entry(name.to_string())
            .or_default();
        self
    }

    /// Pre-creates a repository holding `tag` at `digest`.
    #[must_use]
    pub fn with_image(self, name: &str, tag: &str, digest: &str) -> Self {
        self.put_image(name, tag, digest);
        self
    }

    /// Makes every create sleep first, widening race windows.
    #[must_use]
    pub const fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Makes creating `name` fail permanently.
    pub fn fail_create(&self, name: &str) {
        self.state.lock().fail_create.insert(name.to_string());
    }

    /// Makes the next `times` creates of `name` fail with a throttling error.
    pub fn fail_create_transiently(&self, name: &str, times: u32) {
        self.state
            .lock()
            .transient_create
            .insert(name.to_string(), times);
    }

    /// Makes describing `name` fail permanently.
    pub fn fail_describe(&self, name: &str) {
        self.state.lock().fail_describe.insert(name.to_string());
    }

    /// Makes deleting `name` fail permanently.
    pub fn fail_delete(&self, name: &str) {
        self.state.lock().fail_delete.insert(name.to_string());
    }

    /// Makes every policy attach fail.
    pub fn fail_policy(&self) {
        self.state.lock().fail_policy = true;
    }

    /// Makes token requests for `region` fail.
    pub fn fail_tokens_for(&self, region: &str) {
        self.state.lock().fail_tokens.insert(region.to_string());
    }

    /// Stores `tag` at `digest`, creating the repository if needed.
    pub fn put_image(&self, name: &str, tag: &str, digest: &str) {
        self.state
            .lock()
            .repositories
            .entry(name.to_string())
            .or_default()
            .images
            .insert(tag.to_string(), digest.to_string());
    }

    /// Returns the repository paths currently present, sorted.
    #[must_use]
    pub fn repositories(&self) -> Vec<String> {
        self.state.lock().repositories.keys().cloned().collect()
    }

    /// Returns true if `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().repositories.contains_key(name)
    }

    /// Returns the policy attached to `name`.
    #[must_use]
    pub fn policy(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .repositories
            .get(name)
            .and_then(|r| r.policy.clone())
    }

    /// Returns call counters.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    /// The token this fake issues for `region`.
    #[must_use]
    pub fn token_for(region: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(format!("AWS:token-{region}"))
    }

    fn repository(&self, name: &str) -> Repository {
        Repository {
            name: name.to_string(),
            uri: format!("{}/{name}", self.registry_domain),
        }
    }
}

#[async_trait]
impl RepositoryService for InMemoryRegistry {
    async fn describe_repository(&self, name: &str) -> Result<Option<Repository>> {
        let mut state = self.state.lock();
        state.calls.describe += 1;
        if state.fail_describe.contains(name) {
            return Err(RegistryError::AccessDenied {
                operation: "describe-repositories".to_string(),
                message: format!("injected failure for {name}"),
            });
        }
        Ok(state
            .repositories
            .contains_key(name)
            .then(|| self.repository(name)))
    }

    async fn create_repository(&self, name: &str) -> Result<Repository> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.calls.create += 1;
        if state.fail_create.contains(name) {
            return Err(RegistryError::AccessDenied {
                operation: "create-repository".to_string(),
                message: format!("injected failure for {name}"),
            });
        }
        if let Some(remaining) = state.transient_create.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RegistryError::Transient {
                    operation: "create-repository".to_string(),
                    message: "ThrottlingException: Rate exceeded".to_string(),
                });
            }
        }
        if state.repositories.contains_key(name) {
            return Err(RegistryError::AlreadyExists {
                repository: name.to_string(),
            });
        }
        state
            .repositories
            .insert(name.to_string(), StoredRepository::default());
        Ok(self.repository(name))
    }

    async fn set_repository_policy(&self, name: &str, policy_text: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.set_policy += 1;
        if state.fail_policy {
            return Err(RegistryError::AccessDenied {
                operation: "set-repository-policy".to_string(),
                message: "injected failure".to_string(),
            });
        }
        match state.repositories.get_mut(name) {
            Some(repo) => {
                repo.policy = Some(policy_text.to_string());
                Ok(())
            }
            None => Err(RegistryError::NotFound {
                operation: "set-repository-policy".to_string(),
                repository: name.to_string(),
            }),
        }
    }

    async fn delete_repository(&self, name: &str, force: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.delete += 1;
        if state.fail_delete.contains(name) {
            return Err(RegistryError::AccessDenied {
                operation: "delete-repository".to_string(),
                message: format!("injected failure for {name}"),
            });
        }
        match state.repositories.get(name) {
            None => Err(RegistryError::NotFound {
                operation: "delete-repository".to_string(),
                repository: name.to_string(),
            }),
            Some(repo) if !force && !repo.images.is_empty() => Err(RegistryError::CommandFailed {
                operation: "delete-repository".to_string(),
                code: Some(254),
                message: "RepositoryNotEmptyException".to_string(),
            }),
            Some(_) => {
                state.repositories.remove(name);
                Ok(())
            }
        }
    }

    async fn image_digest(&self, name: &str, tag: &str) -> Result<Option<String>> {
        let mut state = self.state.lock();
        state.calls.image_digest += 1;
        Ok(state
            .repositories
            .get(name)
            .and_then(|r| r.images.get(tag).cloned()))
    }
}

#[async_trait]
impl TokenService for InMemoryRegistry {
    async fn authorization_token(&self, region: &str, _account: Option<&str>) -> Result<String> {
        let mut state = self.state.lock();
        state.calls.token += 1;
        if state.fail_tokens.contains(region) {
            return Err(RegistryError::AccessDenied {
                operation: "get-authorization-token".to_string(),
                message: format!("injected failure for {region}"),
            });
        }
        Ok(Self::token_for(region))
    }
}
