use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::backoff::Backoff;
use super::reconcile::exists_with_size;
use super::remote::{FailureClass, RemoteError, RemoteRepository};

#[derive(Debug)]
pub enum AttemptResult {
    Success { reconciled: bool },
    RetryableFailure { error: RemoteError, reauth: bool },
    TerminalFailure(RemoteError),
}

#[derive(Debug)]
pub enum UploadOutcome {
    Uploaded { attempts: u32 },
    /// An attempt failed but the remote already holds the complete file.
    Reconciled { attempts: u32 },
    Failed { attempts: u32, error: RemoteError },
    Cancelled,
}

pub struct UploadExecutor<'a, R> {
    remote: &'a R,
    backoff: Backoff,
    max_retries: u32,
}

impl<'a, R: RemoteRepository> UploadExecutor<'a, R> {
    pub fn new(remote: &'a R, backoff: Backoff, max_retries: u32) -> Self {
        Self {
            remote,
            backoff,
            max_retries: max_retries.max(1),
        }
    }

    /// One transfer, reconciled against the remote when it fails.
    pub async fn attempt(&self, local_path: &Path, remote_path: &str, size: u64) -> AttemptResult {
        let error = match self.remote.upload(local_path, remote_path).await {
            Ok(_) => return AttemptResult::Success { reconciled: false },
            Err(error) => error,
        };
        if exists_with_size(self.remote, remote_path, size).await {
            info!(remote_path, error = %error, "upload reported failure but remote copy matches");
            return AttemptResult::Success { reconciled: true };
        }
        match error.class() {
            FailureClass::Auth => AttemptResult::RetryableFailure {
                error,
                reauth: true,
            },
            FailureClass::Transient => AttemptResult::RetryableFailure {
                error,
                reauth: false,
            },
            FailureClass::Terminal => AttemptResult::TerminalFailure(error),
        }
    }

    pub async fn run(
        &self,
        local_path: &Path,
        remote_path: &str,
        size: u64,
        cancel: &CancellationToken,
    ) -> UploadOutcome {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return UploadOutcome::Cancelled;
            }
            let attempts = attempt + 1;
            let (error, reauth) = match self.attempt(local_path, remote_path, size).await {
                AttemptResult::Success { reconciled: false } => {
                    return UploadOutcome::Uploaded { attempts };
                }
                AttemptResult::Success { reconciled: true } => {
                    return UploadOutcome::Reconciled { attempts };
                }
                AttemptResult::TerminalFailure(error) => {
                    return UploadOutcome::Failed { attempts, error };
                }
                AttemptResult::RetryableFailure { error, reauth } => (error, reauth),
            };

            if attempts >= self.max_retries {
                return UploadOutcome::Failed { attempts, error };
            }
            let delay = self.backoff.delay(attempt);
            warn!(
                remote_path,
                attempt = attempts,
                max_retries = self.max_retries,
                retry_in_secs = delay.as_secs(),
                error = %error,
                "upload attempt failed"
            );
            tokio::select! {
                _ = cancel.cancelled() => return UploadOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
            if reauth {
                match self.remote.authenticate().await {
                    Ok(account) => info!(account = %account, "hub session refreshed"),
                    Err(err) => warn!(error = %err, "hub session refresh failed"),
                }
            }
            attempt += 1;
        }
    }
}
