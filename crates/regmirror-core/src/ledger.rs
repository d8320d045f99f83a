//! Outcome ledger.
//!
//! Mirrored and failed references are appended to plain-text files, one per
//! line, as soon as each artifact finishes. Files are never truncated, so
//! history accumulates across runs and a run interrupted half-way still leaves
//! a record of what it did.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{Error, Result};

/// Final outcome of a processed artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// The artifact is present at the destination.
    Mirrored,
    /// The artifact could not be mirrored this run.
    Failed,
}

impl RunOutcome {
    /// Returns a string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mirrored => "mirrored",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for artifact outcomes.
///
/// Implementations must be safe to call from concurrent workers.
pub trait OutcomeSink: Send + Sync {
    /// Appends one outcome line for `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be persisted.
    fn record(&self, reference: &str, outcome: RunOutcome) -> Result<()>;
}

/// A single append-only list file.
#[derive(Debug)]
struct AppendFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl AppendFile {
    fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;
        // A hand-edited file may lack its final newline.
        if !ends_with_newline(&mut file).map_err(|e| Error::io(path, e))? {
            file.write_all(b"\n").map_err(|e| Error::io(path, e))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    fn append_line(&self, line: &str) -> Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line.trim_end());
        buf.push('\n');

        let mut file = self.file.lock();
        file.write_all(buf.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| Error::io(&self.path, e))
    }
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Mirrored/failed list pair for one artifact kind.
#[derive(Debug)]
pub struct OutcomeLedger {
    mirrored: AppendFile,
    failed: AppendFile,
}

impl OutcomeLedger {
    /// Opens (creating if needed) the two list files in append mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if either file cannot be opened.
    pub fn open(mirrored: &Path, failed: &Path) -> Result<Self> {
        Ok(Self {
            mirrored: AppendFile::open(mirrored)?,
            failed: AppendFile::open(failed)?,
        })
    }

    /// Path of the mirrored list.
    #[must_use]
    pub fn mirrored_path(&self) -> &Path {
        &self.mirrored.path
    }

    /// Path of the failed list.
    #[must_use]
    pub fn failed_path(&self) -> &Path {
        &self.failed.path
    }
}

impl OutcomeSink for OutcomeLedger {
    fn record(&self, reference: &str, outcome: RunOutcome) -> Result<()> {
        match outcome {
            RunOutcome::Mirrored => self.mirrored.append_line(reference),
            RunOutcome::Failed => self.failed.append_line(reference),
        }
    }
}

/// In-memory sink used by dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<(String, RunOutcome)>>,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded outcomes in recording order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, RunOutcome)> {
        self.entries.lock().clone()
    }

    /// References recorded with `outcome`.
    #[must_use]
    pub fn with_outcome(&self, outcome: RunOutcome) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, o)| *o == outcome)
            .map(|(r, _)| r.clone())
            .collect()
    }
}

impl OutcomeSink for MemoryLedger {
    fn record(&self, reference: &str, outcome: RunOutcome) -> Result<()> {
        self.entries.lock().push((reference.to_string(), outcome));
        Ok(())
    }
}
