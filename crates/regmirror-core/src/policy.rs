//! Policy lists: denied prefixes, ignored references and the declared list.
//!
//! All three are plain-text files with one entry per line. Lines starting with
//! `#` are comments and blank lines are skipped. Policy lists are loaded once
//! at run start and never change during a run.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::reference::{strip_tag, ImageReference};
use crate::resolver::{path_has_prefix, NamespaceResolver};

/// Reads a list file, returning trimmed entries without comments or blanks.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read.
pub fn read_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(parse_list(&content))
}

/// Parses list content (see [`read_list`]).
#[must_use]
pub fn parse_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

/// A denylist entry with its resolved destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeniedEntry {
    /// Entry as written (tag stripped).
    pub raw: String,
    /// Destination path the entry resolves to.
    pub destination: String,
}

/// Repository-path prefixes that must not be mirrored.
///
/// Each entry is matched two ways: against the raw origin repository, which
/// covers bare registry hosts such as `quay.io`, and against the resolved
/// destination path, so entries written in origin form and entries that only
/// agree after [`DomainMap`](crate::DomainMap) translation both apply. The
/// deletion pass uses the same resolved key.
#[derive(Debug, Clone, Default)]
pub struct DeniedSet {
    entries: Vec<DeniedEntry>,
}

impl DeniedSet {
    /// Builds the set from raw entries, stripping tags and de-duplicating.
    #[must_use]
    pub fn new<I, S>(entries: I, resolver: &NamespaceResolver) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .map(|e| strip_tag(e.as_ref()).to_string())
            .filter(|raw| !raw.is_empty() && seen.insert(raw.clone()))
            .map(|raw| DeniedEntry {
                destination: resolver.resolve(&raw),
                raw,
            })
            .collect();
        Self { entries }
    }

    /// Loads the set from a list file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    pub fn load(path: &Path, resolver: &NamespaceResolver) -> Result<Self> {
        Ok(Self::new(read_list(path)?, resolver))
    }

    /// Returns the entry denying `image`, if any.
    #[must_use]
    pub fn matching(&self, image: &ImageReference, destination: &str) -> Option<&DeniedEntry> {
        self.entries.iter().find(|entry| {
            path_has_prefix(image.repository(), &entry.raw)
                || path_has_prefix(destination, &entry.destination)
        })
    }

    /// Distinct destination paths to delete, in declaration order.
    #[must_use]
    pub fn deletion_targets(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .map(|e| e.destination.as_str())
            .filter(|d| seen.insert(*d))
            .collect()
    }

    /// Entries in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[DeniedEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exact references that are skipped silently.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    entries: HashSet<String>,
}

impl IgnoreSet {
    /// Builds the set from references.
    #[must_use]
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    /// Loads the set from a list file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(read_list(path)?))
    }

    /// Returns true if `reference` is ignored, compared exactly as declared.
    #[must_use]
    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains(reference.trim())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deny and ignore policy for one run.
#[derive(Debug, Clone, Default)]
pub struct PolicyLists {
    /// Denied repository prefixes.
    pub denied: DeniedSet,
    /// Ignored references.
    pub ignored: IgnoreSet,
}

impl PolicyLists {
    /// Loads both lists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if either file cannot be read.
    pub fn load(denied: &Path, ignored: &Path, resolver: &NamespaceResolver) -> Result<Self> {
        Ok(Self {
            denied: DeniedSet::load(denied, resolver)?,
            ignored: IgnoreSet::load(ignored)?,
        })
    }
}

/// A declared list that is drained by a run and reset from a template.
#[derive(Debug, Clone)]
pub struct RequiredList {
    path: PathBuf,
    template: Option<PathBuf>,
    entries: Vec<String>,
}

impl RequiredList {
    /// Loads the list at `path`; `template` is what it is reset to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the list or its template is missing.
    pub fn load(path: impl Into<PathBuf>, template: Option<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(template) = &template {
            if !template.is_file() {
                return Err(Error::io(
                    template,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "template not found"),
                ));
            }
        }
        let entries = read_list(&path)?;
        Ok(Self {
            path,
            template,
            entries,
        })
    }

    /// Declared entries in order.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Path of the list file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the list file wholesale with its template.
    ///
    /// The copy goes through a temporary file in the same directory and is
    /// renamed into place, so a crash never leaves a half-written list.
    /// Returns `false` when the list has no template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the template cannot be copied.
    pub fn reset(&self) -> Result<bool> {
        let Some(template) = &self.template else {
            return Ok(false);
        };

        let content = std::fs::read(template).map_err(|e| Error::io(template, e))?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        tmp.write_all(&content)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| Error::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::io(&self.path, e.error))?;

        tracing::info!(list = %self.path.display(), template = %template.display(), "Reset declared list from template");
        Ok(true)
    }
}
