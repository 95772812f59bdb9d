use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use super::paths::{folder_key, relative_path};

/// OS and NAS metadata that never counts as content.
pub const JUNK_NAMES: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "@eaDir",
    ".smbdelete",
];

/// Extensions written by download clients while a transfer is still running.
pub const PENDING_DOWNLOAD_EXTENSIONS: &[&str] = &[
    "tmp",
    "part",
    "partial",
    "crdownload",
    "download",
    "!qb",
    "!ut",
    "aria2",
];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("watched root {path} is unavailable: {source}")]
    Root { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub local_path: PathBuf,
    pub relative_path: String,
    pub folder_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderBatch {
    pub folder_key: String,
    pub local_dir: PathBuf,
    pub files: Vec<FileTask>,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub folders: Vec<FolderBatch>,
    /// Folder keys skipped because they hold a pending download.
    pub gated: Vec<String>,
}

#[cfg(test)]
impl ScanResult {
    pub(crate) fn candidate_count(&self) -> usize {
        self.folders.iter().map(|folder| folder.files.len()).sum()
    }
}

pub fn is_junk(name: &str) -> bool {
    JUNK_NAMES.contains(&name)
}

pub fn is_hidden_or_junk(name: &str) -> bool {
    name.starts_with('.') || is_junk(name)
}

pub fn is_pending_download(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| {
        PENDING_DOWNLOAD_EXTENSIONS
            .iter()
            .any(|pending| pending.eq_ignore_ascii_case(ext))
    })
}

pub(crate) fn is_bookkeeping(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn extension_of(name: &str) -> Option<&str> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Walks `root` and returns candidates grouped by parent folder, folders and
/// files in lexicographic order.
pub async fn scan(root: &Path) -> Result<ScanResult, ScanError> {
    let mut folders: BTreeMap<String, FolderBatch> = BTreeMap::new();
    let mut gated = Vec::new();
    let mut pending_dirs = vec![root.to_path_buf()];

    while let Some(dir) = pending_dirs.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(source) if dir == root => {
                return Err(ScanError::Root {
                    path: root.to_path_buf(),
                    source,
                });
            }
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable folder");
                continue;
            }
        };

        let mut files = Vec::new();
        let mut has_pending = false;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "folder listing interrupted");
                    break;
                }
            };
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(path = %entry.path().display(), "skipping non UTF-8 name");
                continue;
            };
            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };

            if file_type.is_dir() {
                if !is_hidden_or_junk(name) {
                    pending_dirs.push(path);
                }
                continue;
            }
            let is_file = file_type.is_file()
                || (file_type.is_symlink()
                    && tokio::fs::metadata(&path)
                        .await
                        .is_ok_and(|meta| meta.is_file()));
            if !is_file {
                continue;
            }
            if is_pending_download(name) {
                has_pending = true;
                continue;
            }
            if is_hidden_or_junk(name) || is_bookkeeping(name) {
                continue;
            }
            match relative_path(root, &path) {
                Ok(relative) => files.push((relative, path)),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping file"),
            }
        }

        let key = match relative_path(root, &dir) {
            Ok(relative) => relative,
            Err(_) => String::new(),
        };
        if has_pending {
            debug!(folder = %key, "folder holds a pending download");
            gated.push(key);
            continue;
        }
        if files.is_empty() {
            continue;
        }

        files.sort();
        let batch = folders.entry(key.clone()).or_insert_with(|| FolderBatch {
            folder_key: key.clone(),
            local_dir: dir.clone(),
            files: Vec::new(),
        });
        batch
            .files
            .extend(files.into_iter().map(|(relative, local_path)| FileTask {
                folder_key: folder_key(&relative).to_string(),
                relative_path: relative,
                local_path,
            }));
    }

    gated.sort();
    Ok(ScanResult {
        folders: folders.into_values().collect(),
        gated,
    })
}
