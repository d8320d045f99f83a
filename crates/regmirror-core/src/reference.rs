//! Artifact references.
//!
//! Container images are written `registry-host/[namespace/]repo[:tag]`. Charts
//! are identified by an explicit per-version download URL.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tag implied for container images declared without one.
pub const DEFAULT_TAG: &str = "latest";

static REGISTRY_NATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\.dkr\.ecr\.([a-z0-9-]+)\.amazonaws\.com/(.+)$")
        .unwrap_or_else(|e| unreachable!("static pattern is valid: {e}"))
});

/// The two kinds of artifact regmirror moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// OCI container image.
    Image,
    /// Helm chart archive.
    Chart,
}

impl ArtifactKind {
    /// Returns a string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Chart => "chart",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of an origin reference's registry host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKind {
    /// Any public registry (Docker Hub, quay.io, gcr.io, ...).
    Generic,

    /// An ECR registry of the `<account>.dkr.ecr.<region>.amazonaws.com` form.
    RegistryNative {
        /// Numeric account id.
        account: String,
        /// Region token embedded in the host.
        region: String,
        /// Repository path after the host (tag included if present).
        path: String,
    },
}

impl HostKind {
    /// Classifies a reference by its host.
    ///
    /// # Examples
    ///
    /// ```
    /// use regmirror_core::HostKind;
    ///
    /// let kind = HostKind::classify("123456789012.dkr.ecr.us-west-2.amazonaws.com/team/app");
    /// assert!(matches!(kind, HostKind::RegistryNative { ref region, .. } if region == "us-west-2"));
    /// assert_eq!(HostKind::classify("quay.io/coreos/etcd"), HostKind::Generic);
    /// ```
    #[must_use]
    pub fn classify(reference: &str) -> Self {
        REGISTRY_NATIVE
            .captures(reference)
            .map_or(Self::Generic, |caps| Self::RegistryNative {
                account: caps[1].to_string(),
                region: caps[2].to_string(),
                path: caps[3].to_string(),
            })
    }

    /// Returns true for registry-native hosts.
    #[must_use]
    pub const fn is_registry_native(&self) -> bool {
        matches!(self, Self::RegistryNative { .. })
    }
}

/// A parsed container image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    repository: String,
    tag: Option<String>,
}

impl ImageReference {
    /// Parses `registry-host/[namespace/]repo[:tag]`.
    ///
    /// The tag separator is the last `:` after the last `/`, so registries
    /// with a port (`localhost:5000/app`) parse correctly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] for empty input, whitespace,
    /// digest references or an empty tag.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::invalid_reference(raw, "reference is empty"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(Error::invalid_reference(raw, "reference contains whitespace"));
        }
        if raw.contains('@') {
            return Err(Error::invalid_reference(
                raw,
                "digest references are not supported",
            ));
        }

        let name_start = raw.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match raw[name_start..].rfind(':') {
            Some(i) => {
                let split = name_start + i;
                (&raw[..split], Some(&raw[split + 1..]))
            }
            None => (raw, None),
        };

        if repository.is_empty() || repository.ends_with('/') {
            return Err(Error::invalid_reference(raw, "repository is empty"));
        }
        if tag.is_some_and(str::is_empty) {
            return Err(Error::invalid_reference(raw, "tag is empty"));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.map(ToString::to_string),
        })
    }

    /// Repository part, without the tag.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag, if one was declared.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Tag, falling back to [`DEFAULT_TAG`].
    #[must_use]
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Returns a copy carrying [`DEFAULT_TAG`] when no tag was declared.
    #[must_use]
    pub fn with_default_tag(mut self) -> Self {
        if self.tag.is_none() {
            self.tag = Some(DEFAULT_TAG.to_string());
        }
        self
    }

    /// The first path segment, e.g. `quay.io` for `quay.io/coreos/etcd`.
    #[must_use]
    pub fn registry_host(&self) -> &str {
        self.repository
            .split_once('/')
            .map_or(self.repository.as_str(), |(host, _)| host)
    }

    /// Classifies the host of this reference.
    #[must_use]
    pub fn host_kind(&self) -> HostKind {
        HostKind::classify(&self.repository)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{tag}", self.repository),
            None => f.write_str(&self.repository),
        }
    }
}

/// Strips a tag suffix from a reference, leaving the repository path.
///
/// Used for denylist entries and bulk-sync repositories, which are keyed by
/// repository regardless of tag. A bare registry host with a port
/// (`localhost:5000`, `registry.example.com:443`) is kept whole.
#[must_use]
pub fn strip_tag(reference: &str) -> &str {
    let reference = reference.trim();
    let name_start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[name_start..].rfind(':') {
        Some(i) if name_start == 0 && is_host_with_port(&reference[..i], &reference[i + 1..]) => {
            reference
        }
        Some(i) => &reference[..name_start + i],
        None => reference,
    }
}

/// `host:port` rather than `repo:tag`: a numeric suffix on a name that can
/// only be a registry host.
fn is_host_with_port(host: &str, suffix: &str) -> bool {
    !suffix.is_empty()
        && suffix.bytes().all(|b| b.is_ascii_digit())
        && (host == "localhost" || host.contains('.'))
}

/// A chart archive identified by its download URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartReference {
    /// Absolute download URL of the `.tgz` archive.
    pub url: String,
    /// Chart name.
    pub name: String,
    /// Chart version.
    pub version: String,
    /// Expected sha256 of the archive (hex), when the index provides one.
    pub digest: Option<String>,
}

impl ChartReference {
    /// Creates a reference from explicit parts (as listed in a repository index).
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            version: version.into(),
            digest: None,
        }
    }

    /// Sets the expected archive digest.
    #[must_use]
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Parses a direct download URL of the form `.../<name>-<version>.tgz`.
    ///
    /// The version starts at the first `-` followed by a digit (or by `v` and
    /// a digit), so hyphenated chart names are kept intact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] when the file name does not follow
    /// the `<name>-<version>.tgz` convention.
    ///
    /// # Examples
    ///
    /// ```
    /// use regmirror_core::ChartReference;
    ///
    /// let chart = ChartReference::from_url(
    ///     "https://kubernetes.github.io/ingress-nginx/ingress-nginx-4.7.1.tgz",
    /// ).unwrap();
    /// assert_eq!(chart.name, "ingress-nginx");
    /// assert_eq!(chart.version, "4.7.1");
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let url = url.trim();
        let file = url.rsplit('/').next().unwrap_or(url);
        let stem = file
            .strip_suffix(".tgz")
            .ok_or_else(|| Error::invalid_reference(url, "chart URL must end with .tgz"))?;

        let bytes = stem.as_bytes();
        let split = (0..bytes.len()).find(|&i| {
            bytes[i] == b'-'
                && match bytes.get(i + 1) {
                    Some(c) if c.is_ascii_digit() => true,
                    Some(b'v') => bytes.get(i + 2).is_some_and(u8::is_ascii_digit),
                    _ => false,
                }
        });

        match split {
            Some(i) if i > 0 => Ok(Self::new(url, &stem[..i], &stem[i + 1..])),
            _ => Err(Error::invalid_reference(
                url,
                "chart file name must be <name>-<version>.tgz",
            )),
        }
    }
}

impl ChartReference {
    /// Returns `<name>-<version>`, the stem of the archive file name.
    ///
    /// Names and versions come from remote indexes, so each must be a single
    /// non-empty path component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] when the name or version is empty
    /// or contains `/`, `\` or `..`.
    pub fn archive_stem(&self) -> Result<String> {
        for (field, value) in [("name", &self.name), ("version", &self.version)] {
            if value.is_empty()
                || value.contains('/')
                || value.contains('\\')
                || value.contains("..")
            {
                return Err(Error::invalid_reference(
                    &self.url,
                    format!("unsafe chart {field} '{value}'"),
                ));
            }
        }
        Ok(format!("{}-{}", self.name, self.version))
    }
}

impl fmt::Display for ChartReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
