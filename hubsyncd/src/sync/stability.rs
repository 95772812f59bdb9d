use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable,
    Unstable,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    size: u64,
    modified: Option<SystemTime>,
}

type FolderSnapshot = BTreeMap<PathBuf, FileStamp>;

/// Compares two snapshots of the regular files directly inside `folder`,
/// taken `window` apart. An empty or vanished folder is never stable.
pub async fn verify_folder(
    folder: &Path,
    window: Duration,
    cancel: &CancellationToken,
) -> Stability {
    let Some(before) = snapshot(folder).await else {
        return Stability::Unstable;
    };

    tokio::select! {
        _ = cancel.cancelled() => return Stability::Cancelled,
        _ = tokio::time::sleep(window) => {}
    }

    match snapshot(folder).await {
        Some(after) if after == before => Stability::Stable,
        _ => Stability::Unstable,
    }
}

async fn snapshot(folder: &Path) -> Option<FolderSnapshot> {
    let mut entries = tokio::fs::read_dir(folder).await.ok()?;
    let mut stamps = FolderSnapshot::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(meta) = tokio::fs::metadata(entry.path()).await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        stamps.insert(
            entry.path(),
            FileStamp {
                size: meta.len(),
                modified: meta.modified().ok(),
            },
        );
    }
    (!stamps.is_empty()).then_some(stamps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn unchanged_folder_is_stable() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"frames").unwrap();

        let token = CancellationToken::new();
        let result = verify_folder(dir.path(), Duration::from_millis(20), &token).await;

        assert_eq!(result, Stability::Stable);
    }

    #[tokio::test]
    async fn empty_or_missing_folder_is_unstable() {
        let dir = tempdir().unwrap();
        let token = CancellationToken::new();

        assert_eq!(
            verify_folder(dir.path(), Duration::ZERO, &token).await,
            Stability::Unstable
        );
        assert_eq!(
            verify_folder(&dir.path().join("gone"), Duration::ZERO, &token).await,
            Stability::Unstable
        );
    }

    #[tokio::test]
    async fn growing_file_is_unstable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.mp4");
        std::fs::write(&path, b"frames").unwrap();

        let writer = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                std::fs::write(path, b"frames and more frames").unwrap();
            })
        };
        let token = CancellationToken::new();
        let result = verify_folder(dir.path(), Duration::from_millis(200), &token).await;
        writer.await.unwrap();

        assert_eq!(result, Stability::Unstable);
    }

    #[tokio::test]
    async fn new_file_during_window_is_unstable() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"frames").unwrap();

        let writer = {
            let path = dir.path().join("b.mp4");
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                std::fs::write(path, b"x").unwrap();
            })
        };
        let token = CancellationToken::new();
        let result = verify_folder(dir.path(), Duration::from_millis(200), &token).await;
        writer.await.unwrap();

        assert_eq!(result, Stability::Unstable);
    }

    #[tokio::test]
    async fn cancellation_interrupts_window() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"frames").unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = verify_folder(dir.path(), Duration::from_secs(3600), &token).await;

        assert_eq!(result, Stability::Cancelled);
    }
}
