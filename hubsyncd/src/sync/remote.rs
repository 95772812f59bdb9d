use std::future::Future;
use std::path::Path;
use std::sync::{Arc, RwLock};

use hubsync_core::{ApiErrorClass, HubClient, HubError, RepoRef, classify_api_status};
use thiserror::Error;
use tracing::info;

use super::transfer::{TransferClient, TransferError, UploadReceipt};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// How the retry loop should react to a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Credentials were rejected; refresh the session and retry.
    Auth,
    Transient,
    Terminal,
}

impl RemoteError {
    pub fn class(&self) -> FailureClass {
        match self {
            RemoteError::Hub(err) => hub_class(err),
            RemoteError::Transfer(err) => match err {
                TransferError::Hub(err) => hub_class(err),
                TransferError::Request(err) => err
                    .status()
                    .map(|status| api_class(classify_api_status(status)))
                    .unwrap_or(FailureClass::Transient),
                TransferError::Storage { status, .. } => api_class(classify_api_status(*status)),
                TransferError::MissingDecision(_) => FailureClass::Transient,
                TransferError::Io(_) | TransferError::Ignored(_) => FailureClass::Terminal,
            },
        }
    }
}

fn hub_class(err: &HubError) -> FailureClass {
    err.classification()
        .map(api_class)
        .unwrap_or(FailureClass::Terminal)
}

fn api_class(class: ApiErrorClass) -> FailureClass {
    match class {
        ApiErrorClass::Auth => FailureClass::Auth,
        ApiErrorClass::RateLimit | ApiErrorClass::Transient => FailureClass::Transient,
        ApiErrorClass::Permanent => FailureClass::Terminal,
    }
}

/// The remote side of the upload loop.
pub trait RemoteRepository: Send + Sync {
    /// Establishes (or re-establishes) a session and returns the account name.
    fn authenticate(&self) -> impl Future<Output = Result<String, RemoteError>> + Send;

    fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> impl Future<Output = Result<UploadReceipt, RemoteError>> + Send;

    /// Size of the file stored at `remote_path`; `None` when absent or not a file.
    fn stat_path(
        &self,
        remote_path: &str,
    ) -> impl Future<Output = Result<Option<u64>, RemoteError>> + Send;
}

/// Hub-backed repository. `authenticate` swaps in a fresh client.
#[derive(Clone)]
pub struct HubRemote {
    endpoint: String,
    token: String,
    repo: RepoRef,
    transfer: Arc<RwLock<TransferClient>>,
}

impl HubRemote {
    pub fn new(endpoint: &str, token: &str, repo: RepoRef) -> Result<Self, HubError> {
        let hub = HubClient::with_endpoint(endpoint, token)?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            token: token.to_string(),
            transfer: Arc::new(RwLock::new(TransferClient::new(hub, repo.clone()))),
            repo,
        })
    }

    fn current(&self) -> TransferClient {
        match self.transfer.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, client: TransferClient) {
        match self.transfer.write() {
            Ok(mut guard) => *guard = client,
            Err(poisoned) => *poisoned.into_inner() = client,
        }
    }
}

impl RemoteRepository for HubRemote {
    async fn authenticate(&self) -> Result<String, RemoteError> {
        let hub = HubClient::with_endpoint(&self.endpoint, &self.token)?;
        let me = hub.whoami().await?;
        info!(account = %me.name, repo = %self.repo, "hub session established");
        self.replace(TransferClient::new(hub, self.repo.clone()));
        Ok(me.name)
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<UploadReceipt, RemoteError> {
        Ok(self.current().upload_file(local_path, remote_path).await?)
    }

    async fn stat_path(&self, remote_path: &str) -> Result<Option<u64>, RemoteError> {
        let client = self.current();
        let entries = client
            .hub()
            .paths_info(client.repo(), &[remote_path])
            .await?;
        Ok(entries
            .into_iter()
            .find(|entry| entry.path == remote_path)
            .and_then(|entry| entry.file_size()))
    }
}
