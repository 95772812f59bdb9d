use std::io;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hubsync_core::{
    CommitOperation, HubClient, HubError, LfsAction, LfsObject, PreuploadFile, RepoRef,
    UploadMode,
};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

const SAMPLE_LEN: usize = 512;
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("hub error: {0}")]
    Hub(#[from] HubError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("object storage rejected {oid} with {status}")]
    Storage { oid: String, status: StatusCode },
    #[error("hub returned no upload decision for {0}")]
    MissingDecision(String),
    #[error("hub ignores {0} (matched by the repository ignore rules)")]
    Ignored(String),
}

/// Content digest and preupload sample of a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedFile {
    pub sha256: String,
    pub size: u64,
    pub sample: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub remote_path: String,
    pub size: u64,
    pub mode: UploadMode,
    pub commit_oid: Option<String>,
}

/// Runs the preupload / LFS / commit sequence for single files.
#[derive(Clone)]
pub struct TransferClient {
    hub: HubClient,
    http: Client,
    repo: RepoRef,
}

impl TransferClient {
    pub fn new(hub: HubClient, repo: RepoRef) -> Self {
        Self {
            hub,
            http: Client::new(),
            repo,
        }
    }

    pub fn hub(&self) -> &HubClient {
        &self.hub
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    pub async fn upload_file(
        &self,
        source: &Path,
        remote_path: &str,
    ) -> Result<UploadReceipt, TransferError> {
        let prepared = prepare_file(source).await?;
        let decision = self
            .hub
            .preupload(
                &self.repo,
                &[PreuploadFile {
                    path: remote_path.to_string(),
                    sample: prepared.sample.clone(),
                    size: prepared.size,
                }],
            )
            .await?
            .into_iter()
            .find(|file| file.path == remote_path)
            .ok_or_else(|| TransferError::MissingDecision(remote_path.to_string()))?;
        if decision.should_ignore {
            return Err(TransferError::Ignored(remote_path.to_string()));
        }
        debug!(remote_path, mode = ?decision.upload_mode, size = prepared.size, "preupload decided");

        let operation = match decision.upload_mode {
            UploadMode::Regular => {
                let content = tokio::fs::read(source).await?;
                CommitOperation::File {
                    path: remote_path.to_string(),
                    content_base64: STANDARD.encode(content),
                }
            }
            UploadMode::Lfs => {
                self.push_lfs_object(source, &prepared).await?;
                CommitOperation::LfsFile {
                    path: remote_path.to_string(),
                    oid: prepared.sha256.clone(),
                    size: prepared.size,
                }
            }
        };

        let summary = format!("Upload {remote_path} with hubsyncd");
        let commit = self.hub.commit(&self.repo, &summary, &[operation]).await?;
        Ok(UploadReceipt {
            remote_path: remote_path.to_string(),
            size: prepared.size,
            mode: decision.upload_mode,
            commit_oid: commit.commit_oid,
        })
    }

    async fn push_lfs_object(
        &self,
        source: &Path,
        prepared: &PreparedFile,
    ) -> Result<(), TransferError> {
        let object = LfsObject {
            oid: prepared.sha256.clone(),
            size: prepared.size,
        };
        let entry = self
            .hub
            .lfs_batch(&self.repo, std::slice::from_ref(&object))
            .await?
            .into_iter()
            .find(|entry| entry.oid == object.oid)
            .ok_or_else(|| TransferError::MissingDecision(object.oid.clone()))?
            .into_result()?;

        // No actions: the object is already stored.
        let Some(actions) = entry.actions else {
            debug!(oid = %object.oid, "lfs object already present");
            return Ok(());
        };
        if let Some(upload) = &actions.upload {
            self.put_object(upload, source, &object).await?;
        }
        if let Some(verify) = &actions.verify {
            self.hub.lfs_verify(verify, &object).await?;
        }
        Ok(())
    }

    async fn put_object(
        &self,
        action: &LfsAction,
        source: &Path,
        object: &LfsObject,
    ) -> Result<(), TransferError> {
        let file = tokio::fs::File::open(source).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let mut request = self
            .http
            .put(action.href.clone())
            .header(CONTENT_LENGTH, object.size);
        for (name, value) in &action.header {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            return Err(TransferError::Storage {
                oid: object.oid.clone(),
                status: response.status(),
            });
        }
        Ok(())
    }
}

pub async fn prepare_file(path: &Path) -> io::Result<PreparedFile> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut sample = Vec::with_capacity(SAMPLE_LEN);
    let mut size = 0u64;

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        let chunk = &buffer[..read];
        if sample.len() < SAMPLE_LEN {
            let take = (SAMPLE_LEN - sample.len()).min(read);
            sample.extend_from_slice(&chunk[..take]);
        }
        hasher.update(chunk);
        size += read as u64;
    }

    Ok(PreparedFile {
        sha256: format!("{:x}", hasher.finalize()),
        size,
        sample: STANDARD.encode(&sample),
    })
}
