//! Destination path resolution.
//!
//! Maps an origin reference onto a repository path inside the destination
//! registry. Resolution is pure: the same input always yields the same path,
//! which is what makes provisioning and re-runs idempotent.

use serde::{Deserialize, Serialize};

use crate::reference::{HostKind, ImageReference};

/// Namespace used for hosts that match no [`DomainMap`] entry.
pub const DEFAULT_PREFIX: &str = "dockerhub";

/// A single origin host → destination prefix rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRule {
    /// Origin host prefix (e.g. `quay.io`).
    pub host: String,
    /// Destination namespace substituted for the host (e.g. `quay`).
    pub prefix: String,
}

impl DomainRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(host: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            prefix: prefix.into(),
        }
    }
}

/// Ordered origin host → destination prefix mapping.
///
/// Rules are kept longest host first so a short host never shadows a more
/// specific one sharing its prefix. Ties keep declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainMap {
    rules: Vec<DomainRule>,
}

impl DomainMap {
    /// Builds a map from rules in declaration order.
    #[must_use]
    pub fn new(rules: impl IntoIterator<Item = DomainRule>) -> Self {
        let mut rules: Vec<DomainRule> = rules.into_iter().collect();
        rules.sort_by(|a, b| b.host.len().cmp(&a.host.len()));
        Self { rules }
    }

    /// Returns the first rule whose host is a prefix of `reference`.
    #[must_use]
    pub fn matching(&self, reference: &str) -> Option<&DomainRule> {
        self.rules.iter().find(|r| reference.starts_with(&r.host))
    }

    /// Rules in match order.
    #[must_use]
    pub fn rules(&self) -> &[DomainRule] {
        &self.rules
    }
}

impl Default for DomainMap {
    fn default() -> Self {
        Self::new([
            DomainRule::new("quayio", "quay"),
            DomainRule::new("quay.io", "quay"),
            DomainRule::new("gcr.io", "gcr"),
            DomainRule::new("asia.gcr.io", "gcr"),
            DomainRule::new("us.gcr.io", "gcr"),
            DomainRule::new("k8s.gcr.io", "gcr/google_containers"),
            DomainRule::new("public.ecr.aws", "amazonecr"),
            DomainRule::new("docker.io", "dockerhub"),
            DomainRule::new("nvcr.io", "nvcr"),
            DomainRule::new("registry.k8s.io", "k8s"),
            DomainRule::new("ghcr.io", "ghcr"),
        ])
    }
}

/// A resolved destination for an image: repository path plus tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Repository path inside the destination registry.
    pub path: String,
    /// Tag carried over from the origin reference.
    pub tag: String,
}

/// Resolves origin references to destination repository paths.
#[derive(Debug, Clone)]
pub struct NamespaceResolver {
    domains: DomainMap,
    default_prefix: String,
}

impl Default for NamespaceResolver {
    fn default() -> Self {
        Self::new(DomainMap::default())
    }
}

impl NamespaceResolver {
    /// Creates a resolver using [`DEFAULT_PREFIX`] for unmatched hosts.
    #[must_use]
    pub fn new(domains: DomainMap) -> Self {
        Self {
            domains,
            default_prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Overrides the namespace used for unmatched hosts.
    #[must_use]
    pub fn with_default_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.default_prefix = prefix.into();
        self
    }

    /// Returns the domain map in use.
    #[must_use]
    pub const fn domains(&self) -> &DomainMap {
        &self.domains
    }

    /// Resolves a tag-less origin reference to a destination path.
    ///
    /// 1. Registry-native references keep their path after the host, so a
    ///    mirror of a regional duplicate never nests under another prefix.
    /// 2. The first matching [`DomainMap`] host is replaced by its prefix.
    /// 3. Anything else lands under the default prefix verbatim.
    ///
    /// # Examples
    ///
    /// ```
    /// use regmirror_core::NamespaceResolver;
    ///
    /// let resolver = NamespaceResolver::default();
    /// assert_eq!(resolver.resolve("quay.io/coreos/etcd"), "quay/coreos/etcd");
    /// assert_eq!(resolver.resolve("nginx"), "dockerhub/nginx");
    /// assert_eq!(
    ///     resolver.resolve("123456789012.dkr.ecr.us-east-1.amazonaws.com/team/app"),
    ///     "team/app"
    /// );
    /// ```
    #[must_use]
    pub fn resolve(&self, reference: &str) -> String {
        if let HostKind::RegistryNative { path, .. } = HostKind::classify(reference) {
            return path;
        }

        if let Some(rule) = self.domains.matching(reference) {
            return reference.replacen(&rule.host, &rule.prefix, 1);
        }

        format!("{}/{reference}", self.default_prefix)
    }

    /// Resolves an image reference, carrying its tag (or `latest`) over.
    #[must_use]
    pub fn resolve_image(&self, image: &ImageReference) -> Destination {
        Destination {
            path: self.resolve(image.repository()),
            tag: image.tag_or_default().to_string(),
        }
    }
}

/// Returns true if `path` equals `prefix` or lies under it on a `/` boundary.
#[must_use]
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_domain_map() {
        let resolver = NamespaceResolver::default();
        assert_eq!(resolver.resolve("quay.io/coreos/etcd"), "quay/coreos/etcd");
        assert_eq!(
            resolver.resolve("k8s.gcr.io/pause"),
            "gcr/google_containers/pause"
        );
        assert_eq!(resolver.resolve("asia.gcr.io/proj/app"), "gcr/proj/app");
        assert_eq!(resolver.resolve("registry.k8s.io/coredns/coredns"), "k8s/coredns/coredns");
        assert_eq!(resolver.resolve("docker.io/library/redis"), "dockerhub/library/redis");
    }

    #[test]
    fn test_resolve_replaces_first_occurrence_only() {
        let resolver = NamespaceResolver::default();
        assert_eq!(
            resolver.resolve("ghcr.io/mirror/ghcr.io-tools"),
            "ghcr/mirror/ghcr.io-tools"
        );
    }

    #[test]
    fn test_resolve_unmatched_defaults_to_dockerhub() {
        let resolver = NamespaceResolver::default();
        assert_eq!(resolver.resolve("nginx"), "dockerhub/nginx");
        assert_eq!(resolver.resolve("bitnami/redis"), "dockerhub/bitnami/redis");
        assert_eq!(resolver.resolve("quay.example.com/x"), "dockerhub/quay.example.com/x");
    }

    #[test]
    fn test_resolve_registry_native_ignores_domain_map() {
        let map = DomainMap::new([DomainRule::new("123456789012", "hijacked")]);
        let resolver = NamespaceResolver::new(map);
        assert_eq!(
            resolver.resolve("123456789012.dkr.ecr.eu-west-1.amazonaws.com/platform/api"),
            "platform/api"
        );
    }

    #[test]
    fn test_longest_host_wins() {
        let map = DomainMap::new([
            DomainRule::new("gcr.io", "gcr"),
            DomainRule::new("gcr.io/google-containers", "gcr/google_containers"),
        ]);
        let resolver = NamespaceResolver::new(map);
        assert_eq!(
            resolver.resolve("gcr.io/google-containers/pause"),
            "gcr/google_containers/pause"
        );
        assert_eq!(resolver.resolve("gcr.io/other/app"), "gcr/other/app");
    }

    #[test]
    fn test_custom_default_prefix() {
        let resolver = NamespaceResolver::default().with_default_prefix("hub");
        assert_eq!(resolver.resolve("nginx"), "hub/nginx");
    }

    #[test]
    fn test_resolve_image_keeps_tag() {
        let resolver = NamespaceResolver::default();
        let image = ImageReference::parse("quay.io/coreos/etcd:v3.5.0").unwrap();
        assert_eq!(
            resolver.resolve_image(&image),
            Destination {
                path: "quay/coreos/etcd".to_string(),
                tag: "v3.5.0".to_string(),
            }
        );
    }

    #[test]
    fn test_resolve_image_defaults_tag() {
        let resolver = NamespaceResolver::default();
        let image = ImageReference::parse("nginx").unwrap();
        let dest = resolver.resolve_image(&image);
        assert_eq!(dest.path, "dockerhub/nginx");
        assert_eq!(dest.tag, "latest");
    }

    #[test]
    fn test_path_has_prefix() {
        assert!(path_has_prefix("quay/coreos/etcd", "quay"));
        assert!(path_has_prefix("quay/coreos/etcd", "quay/coreos/etcd"));
        assert!(path_has_prefix("quay/coreos/etcd", "quay/"));
        assert!(!path_has_prefix("quayio/etcd", "quay"));
        assert!(!path_has_prefix("quay", "quay/coreos"));
        assert!(!path_has_prefix("quay", ""));
    }
}
