use tracing::{debug, warn};

use super::remote::RemoteRepository;

/// Positive confirmation that `remote_path` holds a file of `expected_size`
/// bytes. Query errors, absence and size mismatches all read as `false`.
pub async fn exists_with_size<R: RemoteRepository>(
    remote: &R,
    remote_path: &str,
    expected_size: u64,
) -> bool {
    match remote.stat_path(remote_path).await {
        Ok(Some(size)) if size == expected_size => true,
        Ok(Some(size)) => {
            debug!(remote_path, size, expected_size, "remote size differs");
            false
        }
        Ok(None) => false,
        Err(err) => {
            warn!(remote_path, error = %err, "remote check failed");
            false
        }
    }
}
