//! Classification of declared artifacts.
//!
//! Every declared line is classified before anything touches a registry:
//! denied, ignored, invalid, or to be mirrored at a resolved destination.
//! Real runs act on the classification; `--dry-run` only prints it.

use std::fmt;

use regmirror_core::reference::strip_tag;
use regmirror_core::{Destination, ImageReference, NamespaceResolver, PolicyLists};
use serde::Serialize;

/// What a run will do with one declared line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Mirror to `destination:tag`.
    Mirror {
        /// Destination repository path.
        destination: String,
        /// Destination tag (absent for bulk sync).
        #[serde(skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
    /// Skipped by a denylist entry.
    Denied {
        /// The matching entry as written.
        entry: String,
    },
    /// Skipped by the ignore list.
    Ignored,
    /// Not a valid reference; recorded as failed.
    Invalid {
        /// Parse error.
        reason: String,
    },
}

/// One classified line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedArtifact {
    /// Declared reference.
    pub reference: String,
    /// Decision for it.
    #[serde(flatten)]
    pub decision: Decision,
}

/// The full plan of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Destination repositories the deletion pass would remove.
    pub deletions: Vec<String>,
    /// Declared artifacts in order.
    pub artifacts: Vec<PlannedArtifact>,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for path in &self.deletions {
            writeln!(f, "delete   {path}")?;
        }
        for artifact in &self.artifacts {
            match &artifact.decision {
                Decision::Mirror { destination, tag } => {
                    write!(f, "mirror   {} -> {destination}", artifact.reference)?;
                    if let Some(tag) = tag {
                        write!(f, ":{tag}")?;
                    }
                    writeln!(f)?;
                }
                Decision::Denied { entry } => {
                    writeln!(f, "denied   {} (by {entry})", artifact.reference)?;
                }
                Decision::Ignored => writeln!(f, "ignored  {}", artifact.reference)?,
                Decision::Invalid { reason } => {
                    writeln!(f, "invalid  {}: {reason}", artifact.reference)?;
                }
            }
        }
        Ok(())
    }
}

/// A line that will be mirrored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageJob {
    /// Origin reference, tagged `latest` if it had no tag (image runs only).
    pub image: ImageReference,
    /// Resolved destination.
    pub destination: Destination,
}

/// Internal classification result.
#[derive(Debug)]
pub(crate) enum Classified {
    Mirror(ImageJob),
    Denied(String),
    Ignored,
    Invalid(regmirror_core::Error),
}

impl Classified {
    pub(crate) fn decision(&self, with_tag: bool) -> Decision {
        match self {
            Self::Mirror(job) => Decision::Mirror {
                destination: job.destination.path.clone(),
                tag: with_tag.then(|| job.destination.tag.clone()),
            },
            Self::Denied(entry) => Decision::Denied {
                entry: entry.clone(),
            },
            Self::Ignored => Decision::Ignored,
            Self::Invalid(e) => Decision::Invalid {
                reason: e.to_string(),
            },
        }
    }
}

/// Applies deny and ignore policy, then resolves.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Classifier<'a> {
    pub resolver: &'a NamespaceResolver,
    pub policy: &'a PolicyLists,
}

impl Classifier<'_> {
    /// Classifies a declared image line.
    pub(crate) fn image(&self, raw: &str) -> Classified {
        self.classify(raw.trim(), raw.trim())
    }

    /// Classifies a bulk-sync line; any tag is dropped.
    pub(crate) fn repository(&self, raw: &str) -> Classified {
        self.classify(raw.trim(), strip_tag(raw.trim()))
    }

    fn classify(&self, declared: &str, reference: &str) -> Classified {
        let image = match ImageReference::parse(reference) {
            Ok(image) => image,
            Err(_) if self.policy.ignored.contains(declared) => return Classified::Ignored,
            Err(e) => return Classified::Invalid(e),
        };
        let destination = self.resolver.resolve_image(&image);

        if let Some(entry) = self.policy.denied.matching(&image, &destination.path) {
            return Classified::Denied(entry.raw.clone());
        }
        if self.policy.ignored.contains(declared) {
            return Classified::Ignored;
        }

        Classified::Mirror(ImageJob {
            image: image.with_default_tag(),
            destination,
        })
    }
}
