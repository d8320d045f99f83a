//! Per-run results.

use std::fmt;

use chrono::{DateTime, Utc};
use regmirror_core::ArtifactKind;
use serde::Serialize;
use uuid::Uuid;

/// Which flow produced a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Declared image list.
    Images,
    /// Declared chart list.
    Charts,
    /// Bulk repository sync.
    Sync,
}

impl RunKind {
    /// Artifact kind the run records.
    pub const fn artifact_kind(self) -> ArtifactKind {
        match self {
            Self::Images | Self::Sync => ArtifactKind::Image,
            Self::Charts => ArtifactKind::Chart,
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Images => "images",
            Self::Charts => "charts",
            Self::Sync => "sync",
        })
    }
}

/// One failed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedArtifact {
    /// Declared reference.
    pub reference: String,
    /// Destination path, when resolution got that far.
    pub destination: Option<String>,
    /// Error message.
    pub error: String,
}

/// Final state of one dispatched artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactOutcome {
    /// Copied, or already present with the same digest.
    Mirrored {
        /// True if the copy was skipped because digests matched.
        unchanged: bool,
    },
    /// Failed at some step.
    Failed(FailedArtifact),
    /// Never started because the run was stopped.
    NotDispatched,
}

/// Counters and details of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique run ID.
    pub run_id: Uuid,

    /// Flow that ran.
    pub kind: RunKind,

    /// Start time.
    pub started_at: DateTime<Utc>,

    /// End time.
    pub finished_at: DateTime<Utc>,

    /// Artifacts mirrored (including unchanged ones).
    pub mirrored: usize,

    /// Artifacts whose copy was skipped because the digest already matched.
    pub unchanged: usize,

    /// Artifacts that failed.
    pub failed: usize,

    /// Artifacts skipped by the denylist.
    pub skipped_denied: usize,

    /// Artifacts skipped by the ignore list.
    pub skipped_ignored: usize,

    /// Denied repositories deleted from the destination.
    pub deleted: usize,

    /// Denied repositories whose deletion failed.
    pub deletion_failed: usize,

    /// Artifacts never dispatched because the run was stopped.
    pub not_dispatched: usize,

    /// Outcomes that could not be appended to the ledger.
    pub ledger_errors: usize,

    /// True if the run was stopped before dispatching everything.
    pub cancelled: bool,

    /// True if the declared list was reset from its template.
    pub list_reset: bool,

    /// Details of every failure.
    pub failures: Vec<FailedArtifact>,
}

impl RunSummary {
    /// Starts an empty summary.
    pub fn start(run_id: Uuid, kind: RunKind) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            kind,
            started_at: now,
            finished_at: now,
            mirrored: 0,
            unchanged: 0,
            failed: 0,
            skipped_denied: 0,
            skipped_ignored: 0,
            deleted: 0,
            deletion_failed: 0,
            not_dispatched: 0,
            ledger_errors: 0,
            cancelled: false,
            list_reset: false,
            failures: Vec::new(),
        }
    }

    /// Adds one artifact outcome.
    pub fn add(&mut self, outcome: ArtifactOutcome) {
        match outcome {
            ArtifactOutcome::Mirrored { unchanged } => {
                self.mirrored += 1;
                if unchanged {
                    self.unchanged += 1;
                }
            }
            ArtifactOutcome::Failed(failure) => {
                self.failed += 1;
                self.failures.push(failure);
            }
            ArtifactOutcome::NotDispatched => self.not_dispatched += 1,
        }
    }

    /// Stamps the end time.
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    /// Process exit code: 130 if cancelled, 1 if anything failed, else 0.
    pub const fn exit_code(&self) -> u8 {
        if self.cancelled {
            130
        } else if self.failed > 0 {
            1
        } else {
            0
        }
    }

    /// Returns true if nothing failed and the run completed.
    pub const fn is_fully_successful(&self) -> bool {
        !self.cancelled && self.failed == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({})", self.run_id, self.kind)?;
        writeln!(
            f,
            "  mirrored: {} ({} unchanged)",
            self.mirrored, self.unchanged
        )?;
        writeln!(f, "  failed: {}", self.failed)?;
        writeln!(f, "  skipped (denied): {}", self.skipped_denied)?;
        writeln!(f, "  skipped (ignored): {}", self.skipped_ignored)?;
        if self.kind != RunKind::Charts {
            writeln!(
                f,
                "  deleted: {} ({} failed)",
                self.deleted, self.deletion_failed
            )?;
        }
        if self.cancelled || self.not_dispatched > 0 {
            writeln!(f, "  not dispatched: {}", self.not_dispatched)?;
        }
        if self.ledger_errors > 0 {
            writeln!(f, "  ledger write errors: {}", self.ledger_errors)?;
        }
        let secs = (self.finished_at - self.started_at)
            .to_std()
            .map_or(0.0, |elapsed| elapsed.as_secs_f64());
        write!(
            f,
            "  list reset: {}  duration: {secs:.1}s",
            if self.list_reset { "yes" } else { "no" }
        )?;
        for failure in &self.failures {
            write!(f, "\n  ✗ {}", failure.reference)?;
            if let Some(dest) = &failure.destination {
                write!(f, " -> {dest}")?;
            }
            write!(f, ": {}", failure.error)?;
        }
        Ok(())
    }
}
