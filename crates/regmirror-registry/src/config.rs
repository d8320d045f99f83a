//! Configuration types for the provider CLI and chart repository client.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the destination access key.
pub const ACCESS_KEY_ENV: &str = "ecr_ak";

/// Environment variable holding the destination secret key.
pub const SECRET_KEY_ENV: &str = "ecr_sk";

/// Static access keys handed to the provider CLI.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessKeys {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
}

impl AccessKeys {
    /// Creates a key pair.
    #[must_use]
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    /// Reads the pair from `ecr_ak` / `ecr_sk`. Returns `None` unless both
    /// are set and non-empty.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let ak = std::env::var(ACCESS_KEY_ENV).ok()?;
        let sk = std::env::var(SECRET_KEY_ENV).ok()?;
        if ak.trim().is_empty() || sk.trim().is_empty() {
            return None;
        }
        Some(Self::new(ak.trim(), sk.trim()))
    }
}

impl fmt::Debug for AccessKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKeys")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Configuration for [`AwsCli`](crate::AwsCli).
#[derive(Debug, Clone)]
pub struct AwsCliConfig {
    /// Program to invoke.
    pub program: String,

    /// Region used for repository management calls.
    pub region: String,

    /// Explicit keys. When absent the CLI's ambient credential chain is used.
    pub keys: Option<AccessKeys>,

    /// Upper bound on a single CLI invocation.
    pub timeout: Duration,
}

impl AwsCliConfig {
    /// Creates a configuration for `region` using ambient credentials.
    ///
    /// # Examples
    ///
    /// ```
    /// use regmirror_registry::AwsCliConfig;
    ///
    /// let config = AwsCliConfig::new("cn-northwest-1");
    /// assert_eq!(config.program, "aws");
    /// assert!(config.keys.is_none());
    /// ```
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            program: "aws".to_string(),
            region: region.into(),
            keys: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Uses explicit keys.
    #[must_use]
    pub fn with_keys(mut self, keys: AccessKeys) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Overrides the program path.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Sets the per-invocation timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Configuration for [`ChartIndexClient`](crate::ChartIndexClient).
#[derive(Debug, Clone)]
pub struct ChartClientConfig {
    /// Request timeout.
    pub timeout: Duration,

    /// User agent string.
    pub user_agent: String,

    /// Extra CA certificate for private chart repositories.
    pub ca_cert: Option<PathBuf>,
}

impl Default for ChartClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: format!("regmirror/{}", env!("CARGO_PKG_VERSION")),
            ca_cert: None,
        }
    }
}

impl ChartClientConfig {
    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a CA certificate.
    #[must_use]
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }
}
