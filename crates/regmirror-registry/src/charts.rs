//! Helm chart repository client.
//!
//! Expands chart list entries into concrete archive URLs (via the
//! repository's `index.yaml`) and downloads archives with digest
//! verification.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regmirror_core::ChartReference;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::ChartClientConfig;
use crate::error::{RegistryError, Result};

/// A chart repository `index.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartIndex {
    /// Index schema version.
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,

    /// Versions per chart name.
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
}

/// One chart version listed in an index.
#[derive(Debug, Clone, Deserialize)]
pub struct ChartVersion {
    /// Chart name.
    pub name: String,

    /// Chart version.
    pub version: String,

    /// Download URLs, absolute or relative to the repository.
    #[serde(default)]
    pub urls: Vec<String>,

    /// sha256 of the archive, hex.
    #[serde(default)]
    pub digest: Option<String>,
}

impl ChartIndex {
    /// Parses an index document fetched from `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidIndex`] on malformed YAML.
    pub fn parse(url: &str, text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| RegistryError::InvalidIndex {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Lists every chart version as a download reference, resolving relative
    /// URLs against `repository`. Versions without a URL are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidIndex`] if a URL cannot be resolved.
    pub fn references(&self, repository: &Url) -> Result<Vec<ChartReference>> {
        let mut refs = Vec::new();
        for versions in self.entries.values() {
            for version in versions {
                let Some(first) = version.urls.first() else {
                    debug!(chart = %version.name, version = %version.version, "No download URL");
                    continue;
                };
                let url = repository
                    .join(first)
                    .map_err(|e| RegistryError::InvalidIndex {
                        url: repository.to_string(),
                        message: format!("bad chart URL {first}: {e}"),
                    })?;
                let mut chart = ChartReference::new(url, &version.name, &version.version);
                if let Some(digest) = version.digest.as_deref().filter(|d| !d.is_empty()) {
                    chart = chart.with_digest(digest);
                }
                refs.push(chart);
            }
        }
        Ok(refs)
    }
}

/// Returns the lowercase hex sha256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn repository_base(entry: &str) -> Result<Url> {
    Url::parse(&format!("{}/", entry.trim().trim_end_matches('/'))).map_err(|e| {
        RegistryError::InvalidChart {
            entry: entry.to_string(),
            message: e.to_string(),
        }
    })
}

/// HTTP client for chart repositories.
#[derive(Debug, Clone)]
pub struct ChartIndexClient {
    http: reqwest::Client,
}

impl ChartIndexClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA certificate cannot be read or the HTTP
    /// client cannot be built.
    pub fn new(config: &ChartClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent);

        if let Some(ref ca_cert) = config.ca_cert {
            let pem = std::fs::read(ca_cert).map_err(|e| RegistryError::IoError {
                path: ca_cert.clone(),
                source: e,
            })?;
            let cert =
                reqwest::Certificate::from_pem(&pem).map_err(|e| RegistryError::InvalidChart {
                    entry: ca_cert.display().to_string(),
                    message: format!("invalid CA certificate: {e}"),
                })?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder.build()?;
        Ok(Self { http })
    }

    /// Fetches and parses `<repository>/index.yaml`.
    ///
    /// # Errors
    ///
    /// Returns an error on connection failure, a non-success status, or a
    /// malformed index.
    #[instrument(skip(self))]
    pub async fn fetch_index(&self, repository: &str) -> Result<ChartIndex> {
        let base = repository_base(repository)?;
        let index_url = base
            .join("index.yaml")
            .map_err(|e| RegistryError::InvalidChart {
                entry: repository.to_string(),
                message: e.to_string(),
            })?;
        let text = self
            .http
            .get(index_url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        ChartIndex::parse(index_url.as_str(), &text)
    }
}

/// Where chart archives come from.
#[async_trait]
pub trait ChartSource: Send + Sync {
    /// Expands one chart list entry.
    ///
    /// A `.tgz` URL names a single archive. Anything else is treated as a
    /// repository URL and expanded to every version its index lists.
    async fn expand(&self, entry: &str) -> Result<Vec<ChartReference>>;

    /// Downloads `chart` into `dir` and verifies its digest when known.
    async fn download(&self, chart: &ChartReference, dir: &Path) -> Result<PathBuf>;
}

#[async_trait]
impl ChartSource for ChartIndexClient {
    async fn expand(&self, entry: &str) -> Result<Vec<ChartReference>> {
        let entry = entry.trim();
        if entry.ends_with(".tgz") {
            let chart = ChartReference::from_url(entry).map_err(|e| RegistryError::InvalidChart {
                entry: entry.to_string(),
                message: e.to_string(),
            })?;
            return Ok(vec![chart]);
        }
        let base = repository_base(entry)?;
        let index = self.fetch_index(entry).await?;
        let refs = index.references(&base)?;
        info!(repository = entry, charts = refs.len(), "Expanded chart repository");
        Ok(refs)
    }

    #[instrument(skip(self, dir), fields(reference = %chart.url))]
    async fn download(&self, chart: &ChartReference, dir: &Path) -> Result<PathBuf> {
        let stem = chart
            .archive_stem()
            .map_err(|e| RegistryError::InvalidChart {
                entry: chart.url.clone(),
                message: e.to_string(),
            })?;
        let bytes = self
            .http
            .get(&chart.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        if let Some(expected) = &chart.digest {
            let expected = expected.trim_start_matches("sha256:").to_ascii_lowercase();
            let actual = sha256_hex(&bytes);
            if actual != expected {
                return Err(RegistryError::ChecksumMismatch {
                    url: chart.url.clone(),
                    expected,
                    actual,
                });
            }
        }

        // One file per download; the same chart may be in flight twice.
        let path = tempfile::Builder::new()
            .prefix(&format!("{stem}-"))
            .suffix(".tgz")
            .tempfile_in(dir)
            .and_then(|file| file.into_temp_path().keep().map_err(|e| e.error))
            .map_err(|e| RegistryError::IoError {
                path: dir.to_path_buf(),
                source: e,
            })?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| RegistryError::IoError {
                path: path.clone(),
                source: e,
            })?;
        debug!(path = %path.display(), size = bytes.len(), "Downloaded chart");
        Ok(path)
    }
}
