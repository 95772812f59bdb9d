use std::io;
use std::path::{Path, PathBuf};

use super::scanner::is_hidden_or_junk;

/// Best-effort result of removing an uploaded file and its emptied folders.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub file_removed: bool,
    pub removed_dirs: Vec<PathBuf>,
    pub error: Option<(PathBuf, io::Error)>,
}

#[cfg(test)]
impl CleanupReport {
    pub(crate) fn is_clean(&self) -> bool {
        self.file_removed && self.error.is_none()
    }
}

/// Deletes `file`, then prunes ancestors that only hold junk or hidden
/// entries. Never touches `root` or anything outside it.
pub async fn remove_uploaded(root: &Path, file: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();
    if !file.starts_with(root) || file == root {
        report.error = Some((
            file.to_path_buf(),
            io::Error::new(io::ErrorKind::InvalidInput, "path is outside the watched root"),
        ));
        return report;
    }

    match tokio::fs::remove_file(file).await {
        Ok(()) => report.file_removed = true,
        Err(err) => {
            report.error = Some((file.to_path_buf(), err));
            return report;
        }
    }

    let mut current = file.parent().map(Path::to_path_buf);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        match prune_if_empty(&dir).await {
            Ok(true) => report.removed_dirs.push(dir.clone()),
            Ok(false) => break,
            Err(err) => {
                report.error = Some((dir, err));
                break;
            }
        }
        current = dir.parent().map(Path::to_path_buf);
    }
    report
}

async fn prune_if_empty(dir: &Path) -> io::Result<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut leftovers = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !name.to_str().is_some_and(is_hidden_or_junk) {
            return Ok(false);
        }
        leftovers.push((entry.path(), entry.file_type().await?.is_dir()));
    }

    for (path, is_dir) in leftovers {
        if is_dir {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
    }
    tokio::fs::remove_dir(dir).await?;
    Ok(true)
}
