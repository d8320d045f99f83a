//! Registry credentials for transfers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use regmirror_core::{HostKind, ImageReference};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{RegistryError, Result};
use crate::service::TokenService;

/// A decoded `user:password` registry credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    /// Creates a credential.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Decodes a base64 `user:password` authorization token.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidToken`] if the token is not base64,
    /// not UTF-8, or has no `:` separator.
    ///
    /// # Examples
    ///
    /// ```
    /// use regmirror_registry::Credential;
    ///
    /// let cred = Credential::from_token("QVdTOnNlY3JldA==")?;
    /// assert_eq!(cred.username(), "AWS");
    /// assert_eq!(cred.as_flag(), "AWS:secret");
    /// # Ok::<(), regmirror_registry::RegistryError>(())
    /// ```
    pub fn from_token(token: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(token.trim())
            .map_err(|e| RegistryError::InvalidToken {
                message: e.to_string(),
            })?;
        let decoded = String::from_utf8(bytes).map_err(|e| RegistryError::InvalidToken {
            message: e.to_string(),
        })?;
        let (username, password) =
            decoded
                .split_once(':')
                .ok_or_else(|| RegistryError::InvalidToken {
                    message: "missing ':' separator".to_string(),
                })?;
        Ok(Self::new(username, password))
    }

    /// Username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// `user:password`, as transfer tools take it on the command line.
    #[must_use]
    pub fn as_flag(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Side {
    Origin,
    Destination,
}

type CacheKey = (Side, String, Option<String>);

/// Hands out origin and destination credentials, caching one per region.
///
/// The cache lives as long as the broker; build a new broker per run.
pub struct CredentialBroker {
    origin: Arc<dyn TokenService>,
    destination: Arc<dyn TokenService>,
    destination_region: String,
    destination_account: Option<String>,
    cache: Mutex<HashMap<CacheKey, Credential>>,
}

impl fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("destination_region", &self.destination_region)
            .field("destination_account", &self.destination_account)
            .finish_non_exhaustive()
    }
}

impl CredentialBroker {
    /// Creates a broker. `origin` serves registry-native source hosts,
    /// `destination` serves the fixed destination region.
    #[must_use]
    pub fn new(
        origin: Arc<dyn TokenService>,
        destination: Arc<dyn TokenService>,
        destination_region: impl Into<String>,
    ) -> Self {
        Self {
            origin,
            destination,
            destination_region: destination_region.into(),
            destination_account: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Scopes destination tokens to `account`.
    #[must_use]
    pub fn with_destination_account(mut self, account: impl Into<String>) -> Self {
        self.destination_account = Some(account.into());
        self
    }

    async fn credential(
        &self,
        side: Side,
        service: &dyn TokenService,
        region: &str,
        account: Option<&str>,
    ) -> Result<Credential> {
        let key = (side, region.to_string(), account.map(str::to_string));
        let mut cache = self.cache.lock().await;
        if let Some(hit) = cache.get(&key) {
            return Ok(hit.clone());
        }
        debug!(region, ?account, "Requesting authorization token");
        let token = service.authorization_token(region, account).await?;
        let credential = Credential::from_token(&token)?;
        cache.insert(key, credential.clone());
        Ok(credential)
    }

    /// Pull credentials for `image`.
    ///
    /// Only registry-native hosts get credentials; everything else is pulled
    /// anonymously and yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the token service error for a registry-native host.
    #[instrument(skip(self), fields(reference = %image))]
    pub async fn origin_credentials(&self, image: &ImageReference) -> Result<Option<Credential>> {
        self.origin_credentials_for(&image.host_kind()).await
    }

    /// Pull credentials for a classified host.
    ///
    /// # Errors
    ///
    /// Returns the token service error for a registry-native host.
    pub async fn origin_credentials_for(&self, host: &HostKind) -> Result<Option<Credential>> {
        match host {
            HostKind::RegistryNative {
                account, region, ..
            } => self
                .credential(Side::Origin, self.origin.as_ref(), region, Some(account))
                .await
                .map(Some),
            HostKind::Generic => Ok(None),
        }
    }

    /// Push credentials for the destination registry.
    ///
    /// # Errors
    ///
    /// Returns the token service error. Callers treat this as fatal for the
    /// run.
    #[instrument(skip(self))]
    pub async fn destination_credentials(&self) -> Result<Credential> {
        self.credential(
            Side::Destination,
            self.destination.as_ref(),
            &self.destination_region,
            self.destination_account.as_deref(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRegistry;

    fn broker(origin: &Arc<InMemoryRegistry>, destination: &Arc<InMemoryRegistry>) -> CredentialBroker {
        CredentialBroker::new(
            Arc::clone(origin) as Arc<dyn TokenService>,
            Arc::clone(destination) as Arc<dyn TokenService>,
            "cn-northwest-1",
        )
    }

    #[test]
    fn test_from_token() {
        let token = base64::engine::general_purpose::STANDARD.encode("AWS:pa:ss");
        let cred = Credential::from_token(&token).unwrap();
        assert_eq!(cred.username(), "AWS");
        assert_eq!(cred.password(), "pa:ss");
        assert_eq!(cred.as_flag(), "AWS:pa:ss");
    }

    #[test]
    fn test_from_token_rejects_garbage() {
        assert!(matches!(
            Credential::from_token("!!!"),
            Err(RegistryError::InvalidToken { .. })
        ));
        let no_colon = base64::engine::general_purpose::STANDARD.encode("AWS");
        assert!(Credential::from_token(&no_colon).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let cred = Credential::new("AWS", "hunter2");
        assert!(!format!("{cred:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_generic_host_has_no_origin_credentials() {
        let origin = Arc::new(InMemoryRegistry::default());
        let destination = Arc::new(InMemoryRegistry::default());
        let broker = broker(&origin, &destination);

        let image = ImageReference::parse("quay.io/coreos/etcd:v3.5.0").unwrap();
        assert!(broker.origin_credentials(&image).await.unwrap().is_none());
        assert_eq!(origin.calls().token, 0);
    }

    #[tokio::test]
    async fn test_registry_native_origin_uses_host_region() {
        let origin = Arc::new(InMemoryRegistry::default());
        let destination = Arc::new(InMemoryRegistry::default());
        let broker = broker(&origin, &destination);

        let image =
            ImageReference::parse("123456789012.dkr.ecr.us-west-2.amazonaws.com/team/app:1.0")
                .unwrap();
        let cred = broker.origin_credentials(&image).await.unwrap().unwrap();
        assert_eq!(cred.password(), "token-us-west-2");
    }

    #[tokio::test]
    async fn test_tokens_cached_per_region() {
        let origin = Arc::new(InMemoryRegistry::default());
        let destination = Arc::new(InMemoryRegistry::default());
        let broker = broker(&origin, &destination);

        let a = ImageReference::parse("123456789012.dkr.ecr.us-west-2.amazonaws.com/a:1").unwrap();
        let b = ImageReference::parse("123456789012.dkr.ecr.us-west-2.amazonaws.com/b:2").unwrap();
        let c = ImageReference::parse("123456789012.dkr.ecr.eu-west-1.amazonaws.com/c:3").unwrap();
        broker.origin_credentials(&a).await.unwrap();
        broker.origin_credentials(&b).await.unwrap();
        broker.origin_credentials(&c).await.unwrap();
        assert_eq!(origin.calls().token, 2);

        broker.destination_credentials().await.unwrap();
        broker.destination_credentials().await.unwrap();
        assert_eq!(destination.calls().token, 1);
    }

    #[tokio::test]
    async fn test_destination_failure_propagates() {
        let origin = Arc::new(InMemoryRegistry::default());
        let destination = Arc::new(InMemoryRegistry::default());
        destination.fail_tokens_for("cn-northwest-1");
        let broker = broker(&origin, &destination);

        assert!(broker.destination_credentials().await.is_err());
    }
}
