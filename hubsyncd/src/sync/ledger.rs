use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

/// A file failing for longer than this raises an alert, once per window.
pub const FAILURE_ALERT_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("ledger document {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode ledger document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Relative paths whose remote copy is believed confirmed.
#[derive(Debug)]
pub struct HistoryLedger {
    path: PathBuf,
    entries: BTreeSet<String>,
}

impl HistoryLedger {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let entries = read_document(&path)?;
        Ok(Self { path, entries })
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeSet::new(),
        }
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.entries.contains(relative)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a confirmed upload. Already-known paths are not rewritten.
    pub fn mark_success(&mut self, relative: &str) -> Result<(), LedgerError> {
        if self.entries.insert(relative.to_string()) {
            self.flush()
        } else {
            Ok(())
        }
    }

    pub fn remove(&mut self, relative: &str) -> Result<(), LedgerError> {
        if self.entries.remove(relative) {
            self.flush()
        } else {
            Ok(())
        }
    }

    pub fn flush(&self) -> Result<(), LedgerError> {
        write_document(&self.path, &self.entries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureVerdict {
    FirstFailure,
    /// Still failing inside the current alert window.
    Silent,
    /// Failing for longer than the threshold; the window has been restarted.
    Alert { stuck_for: Duration },
}

#[derive(Debug)]
pub struct FailureRecord {
    pub verdict: FailureVerdict,
    pub persisted: Result<(), LedgerError>,
}

/// Relative paths whose latest upload failed, keyed to the start of the
/// current alert window (seconds since the epoch).
#[derive(Debug)]
pub struct FailureLedger {
    path: PathBuf,
    entries: BTreeMap<String, f64>,
}

impl FailureLedger {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let mut entries: BTreeMap<String, f64> = read_document(&path)?;
        entries.retain(|relative, stamp| {
            let valid = stamp.is_finite() && *stamp >= 0.0;
            if !valid {
                warn!(file = %relative, stamp = *stamp, "dropping invalid failure timestamp");
            }
            valid
        });
        Ok(Self { path, entries })
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.entries.contains_key(relative)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn first_failure(&self, relative: &str) -> Option<f64> {
        self.entries.get(relative).copied()
    }

    pub fn record_failure(&mut self, relative: &str, now: SystemTime) -> FailureRecord {
        let now = epoch_secs(now);
        let Some(stored) = self.entries.get(relative).copied() else {
            self.entries.insert(relative.to_string(), now);
            return FailureRecord {
                verdict: FailureVerdict::FirstFailure,
                persisted: self.flush(),
            };
        };

        // A stamp ahead of the clock restarts the window.
        let Ok(elapsed) = Duration::try_from_secs_f64(now - stored) else {
            self.entries.insert(relative.to_string(), now);
            return FailureRecord {
                verdict: FailureVerdict::Silent,
                persisted: self.flush(),
            };
        };
        if elapsed > FAILURE_ALERT_THRESHOLD {
            self.entries.insert(relative.to_string(), now);
            FailureRecord {
                verdict: FailureVerdict::Alert { stuck_for: elapsed },
                persisted: self.flush(),
            }
        } else {
            FailureRecord {
                verdict: FailureVerdict::Silent,
                persisted: Ok(()),
            }
        }
    }

    pub fn clear(&mut self, relative: &str) -> Result<(), LedgerError> {
        if self.entries.remove(relative).is_some() {
            self.flush()
        } else {
            Ok(())
        }
    }

    pub fn flush(&self) -> Result<(), LedgerError> {
        write_document(&self.path, &self.entries)
    }
}

fn epoch_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// A missing or blank document reads as empty.
fn read_document<T: DeserializeOwned + Default>(path: &Path) -> Result<T, LedgerError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw).map_err(|source| LedgerError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Rewrites the whole document through a hidden sibling and a rename.
fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<(), LedgerError> {
    let io_err = |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let payload = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let swap = swap_path(path);
    std::fs::write(&swap, payload).map_err(io_err)?;
    std::fs::rename(&swap, path).map_err(io_err)
}

fn swap_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ledger".to_string());
    path.with_file_name(format!(".{name}.swap"))
}
