use std::path::{Component, Path};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path is outside the watched root")]
    OutsideRoot,
    #[error("path contains unsupported component")]
    UnsupportedComponent,
    #[error("path is not valid UTF-8")]
    NonUtf8,
}

/// Maps a local path under `root` to its `/`-separated relative identity.
pub fn relative_path(root: &Path, path: &Path) -> Result<String, PathError> {
    let relative = path.strip_prefix(root).map_err(|_| PathError::OutsideRoot)?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or(PathError::NonUtf8)?),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(parts.join("/"))
}

/// Repository path for a relative path; an empty folder means the repository root.
pub fn remote_path(remote_folder: &str, relative: &str) -> String {
    let folder = remote_folder.trim_matches('/');
    let relative = relative.trim_start_matches('/');
    if folder.is_empty() || folder == "." {
        relative.to_string()
    } else {
        format!("{folder}/{relative}")
    }
}

/// Relative path of the parent folder; files directly under the root share `""`.
pub fn folder_key(relative: &str) -> &str {
    relative.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}
