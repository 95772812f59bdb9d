use std::path::{Component, Path};
use std::sync::Arc;

use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;

use super::scanner::{is_bookkeeping, is_hidden_or_junk, is_pending_download};

/// Watches `root` recursively and wakes `wake` whenever content may have
/// arrived. The watcher stops when the returned value is dropped.
pub fn start_notify_watcher(root: &Path, wake: Arc<Notify>) -> notify::Result<RecommendedWatcher> {
    let watched = root.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res
            && is_arrival(&watched, &event)
        {
            wake.notify_one();
        }
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

fn is_arrival(root: &Path, event: &Event) -> bool {
    let content_event = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(_)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    );
    content_event && event.paths.iter().any(|path| is_candidate_path(root, path))
}

/// Writes to hidden, junk, bookkeeping or still-downloading files never
/// produce a candidate and must not wake the loop.
fn is_candidate_path(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return true;
    };
    let mut names = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => match name.to_str() {
                Some(name) => names.push(name),
                None => return false,
            },
            _ => return false,
        }
    }
    let Some((last, parents)) = names.split_last() else {
        return false;
    };
    !parents.iter().any(|name| is_hidden_or_junk(name))
        && !is_hidden_or_junk(last)
        && !is_pending_download(last)
        && !is_bookkeeping(last)
}
