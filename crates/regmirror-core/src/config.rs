//! Configuration for a mirroring run.
//!
//! The configuration is a YAML document in which every field is optional.
//! Defaults reproduce the conventional layout: list files under `mirror/`,
//! templates and the access policy under `src/resources/`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resolver::{DomainMap, DomainRule, NamespaceResolver, DEFAULT_PREFIX};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Base directory for relative paths. Defaults to the directory holding
    /// the configuration file, or the working directory.
    pub root: Option<PathBuf>,

    /// Destination registry.
    pub destination: DestinationConfig,

    /// Image list files.
    pub images: ImageListsConfig,

    /// Chart list files.
    pub charts: ChartListsConfig,

    /// Origin host → destination prefix rules. Replaces the built-in map.
    pub domains: Option<Vec<DomainRule>>,

    /// Destination namespace for hosts matching no rule.
    pub default_prefix: String,

    /// Number of artifacts processed concurrently.
    pub workers: usize,

    /// Retry policy for transient provider errors.
    pub retry: RetryConfig,

    /// Skip the copy when the destination already holds the same digest.
    pub skip_existing_digest: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            root: None,
            destination: DestinationConfig::default(),
            images: ImageListsConfig::default(),
            charts: ChartListsConfig::default(),
            domains: None,
            default_prefix: DEFAULT_PREFIX.to_string(),
            workers: 1,
            retry: RetryConfig::default(),
            skip_existing_digest: true,
        }
    }
}

impl MirrorConfig {
    /// Loads and validates a configuration file.
    ///
    /// A relative `root` is taken relative to the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML, or
    /// fails [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content).map_err(|e| Error::ConfigParse {
                path: path.to_path_buf(),
                source: e,
            })?
        };

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        config.root = Some(match config.root.take() {
            Some(root) if root.is_relative() => base.join(root),
            Some(root) => root,
            None => base,
        });

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(Error::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.destination.account.is_empty()
            || !self.destination.account.chars().all(|c| c.is_ascii_digit())
        {
            return invalid("destination.account must be a numeric account id");
        }
        if self.destination.region.is_empty() {
            return invalid("destination.region must not be empty");
        }
        if self.default_prefix.trim_matches('/').is_empty() {
            return invalid("default_prefix must not be empty");
        }
        if let Some(rules) = &self.domains {
            if rules.iter().any(|r| r.host.is_empty() || r.prefix.is_empty()) {
                return invalid("domain rules need a non-empty host and prefix");
            }
        }
        Ok(())
    }

    /// Resolves `path` against [`root`](Self::root).
    #[must_use]
    pub fn path(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// The domain map in effect.
    #[must_use]
    pub fn domain_map(&self) -> DomainMap {
        self.domains
            .as_ref()
            .map_or_else(DomainMap::default, |rules| DomainMap::new(rules.iter().cloned()))
    }

    /// A resolver built from this configuration.
    #[must_use]
    pub fn resolver(&self) -> NamespaceResolver {
        NamespaceResolver::new(self.domain_map()).with_default_prefix(&self.default_prefix)
    }

    /// Reads the access-policy document, checking that it is JSON.
    ///
    /// The text is returned verbatim; it is attached unmodified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file is missing or
    /// [`Error::MalformedPolicy`] if it is not JSON.
    pub fn load_policy_document(&self) -> Result<String> {
        let path = self.path(&self.destination.policy_file);
        let text = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        serde_json::from_str::<serde_json::Value>(&text)
            .map_err(|e| Error::MalformedPolicy { path, source: e })?;
        Ok(text)
    }
}

/// Destination registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DestinationConfig {
    /// Registry account id.
    pub account: String,
    /// Registry region.
    pub region: String,
    /// DNS suffix of the partition (`amazonaws.com.cn` for China regions).
    pub domain_suffix: String,
    /// Access-policy document attached to new repositories.
    pub policy_file: PathBuf,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            account: "834204282212".to_string(),
            region: "cn-northwest-1".to_string(),
            domain_suffix: "amazonaws.com.cn".to_string(),
            policy_file: PathBuf::from("src/resources/policy.json"),
        }
    }
}

impl DestinationConfig {
    /// Registry host, e.g. `834204282212.dkr.ecr.cn-northwest-1.amazonaws.com.cn`.
    ///
    /// # Examples
    ///
    /// ```
    /// use regmirror_core::config::DestinationConfig;
    ///
    /// let dest = DestinationConfig::default();
    /// assert_eq!(
    ///     dest.registry_domain(),
    ///     "834204282212.dkr.ecr.cn-northwest-1.amazonaws.com.cn"
    /// );
    /// ```
    #[must_use]
    pub fn registry_domain(&self) -> String {
        format!(
            "{}.dkr.ecr.{}.{}",
            self.account, self.region, self.domain_suffix
        )
    }
}

/// Image list file locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageListsConfig {
    /// Declared images for this run.
    pub required: PathBuf,
    /// Template the declared list is reset to.
    pub template: PathBuf,
    /// Denied repository prefixes.
    pub denied: PathBuf,
    /// Ignored references.
    pub ignored: PathBuf,
    /// Mirrored history.
    pub mirrored: PathBuf,
    /// Failed history.
    pub failed: PathBuf,
    /// Repositories synced in bulk (all tags).
    pub daily: PathBuf,
}

impl Default for ImageListsConfig {
    fn default() -> Self {
        Self {
            required: PathBuf::from("mirror/required-images.txt"),
            template: PathBuf::from("src/resources/required-images.txt.template"),
            denied: PathBuf::from("mirror/denied-images.txt"),
            ignored: PathBuf::from("mirror/ignore-images.txt"),
            mirrored: PathBuf::from("mirror/mirrored-images.txt"),
            failed: PathBuf::from("mirror/failed-images.txt"),
            daily: PathBuf::from("mirror/required-images-daily.txt"),
        }
    }
}

/// Chart list file locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChartListsConfig {
    /// Declared chart URLs for this run.
    pub required: PathBuf,
    /// Template the declared list is reset to.
    pub template: PathBuf,
    /// Mirrored history.
    pub mirrored: PathBuf,
    /// Failed history.
    pub failed: PathBuf,
    /// Destination namespace for chart repositories.
    pub namespace: String,
}

impl Default for ChartListsConfig {
    fn default() -> Self {
        Self {
            required: PathBuf::from("mirror/required-charts.txt"),
            template: PathBuf::from("src/resources/required-charts.txt.template"),
            mirrored: PathBuf::from("mirror/mirrored-charts.txt"),
            failed: PathBuf::from("mirror/failed-charts.txt"),
            namespace: "charts".to_string(),
        }
    }
}

/// Retry settings for transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Attempts per operation, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound on the backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        let config = MirrorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 1);
        assert!(config.skip_existing_digest);
        assert_eq!(config.charts.namespace, "charts");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("regmirror.yaml");
        std::fs::write(
            &path,
            "workers: 4\ndestination:\n  region: cn-north-1\ndomains:\n  - host: quay.io\n    prefix: q\n",
        )
        .unwrap();

        let config = MirrorConfig::load(&path).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.destination.region, "cn-north-1");
        assert_eq!(config.destination.account, "834204282212");
        assert_eq!(config.root.as_deref(), Some(dir.path()));
        assert_eq!(config.resolver().resolve("quay.io/a/b"), "q/a/b");
        assert_eq!(
            config.path(&config.images.required),
            dir.path().join("mirror/required-images.txt")
        );
    }

    #[test]
    fn test_load_empty_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("regmirror.yaml");
        std::fs::write(&path, "").unwrap();
        let config = MirrorConfig::load(&path).unwrap();
        assert_eq!(config.default_prefix, "dockerhub");
    }

    #[test]
    fn test_load_rejects_unknown_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("regmirror.yaml");
        std::fs::write(&path, "wokers: 4\n").unwrap();
        assert!(matches!(
            MirrorConfig::load(&path),
            Err(Error::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = MirrorConfig {
            workers: 0,
            ..MirrorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_numeric_account() {
        let mut config = MirrorConfig::default();
        config.destination.account = "prod".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_document_must_be_json() {
        let dir = TempDir::new().unwrap();
        let mut config = MirrorConfig {
            root: Some(dir.path().to_path_buf()),
            ..MirrorConfig::default()
        };
        config.destination.policy_file = PathBuf::from("policy.json");

        std::fs::write(dir.path().join("policy.json"), "{\"Version\": \"2008-10-17\"}").unwrap();
        assert_eq!(
            config.load_policy_document().unwrap(),
            "{\"Version\": \"2008-10-17\"}"
        );

        std::fs::write(dir.path().join("policy.json"), "Version: 2008").unwrap();
        assert!(matches!(
            config.load_policy_document(),
            Err(Error::MalformedPolicy { .. })
        ));
    }
}
