use std::collections::BTreeMap;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::repo::RepoRef;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
const LFS_MEDIA_TYPE: &str = "application/vnd.git-lfs+json";
const NDJSON_MEDIA_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Error)]
pub enum HubError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("endpoint cannot be used as a base url")]
    InvalidEndpoint,
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("lfs rejected object {oid}: {message}")]
    Lfs { oid: String, message: String },
    #[error("api response did not mention {0}")]
    MissingEntry(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct HubClient {
    http: Client,
    endpoint: Url,
    token: String,
}

impl HubClient {
    pub fn with_endpoint(endpoint: &str, token: impl Into<String>) -> Result<Self, HubError> {
        let endpoint = Url::parse(endpoint)?;
        if endpoint.cannot_be_a_base() {
            return Err(HubError::InvalidEndpoint);
        }
        Ok(Self {
            http: Client::new(),
            endpoint,
            token: token.into(),
        })
    }

    pub async fn whoami(&self) -> Result<WhoAmI, HubError> {
        let url = self.api_url(&["whoami-v2"])?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Fetches metadata for the given repository paths. Paths that do not exist
    /// are simply absent from the result.
    pub async fn paths_info(
        &self,
        repo: &RepoRef,
        paths: &[&str],
    ) -> Result<Vec<PathInfo>, HubError> {
        let url = self.repo_api_url(repo, "paths-info")?;
        let mut form: Vec<(&str, &str)> = paths.iter().map(|path| ("paths", *path)).collect();
        form.push(("expand", "false"));
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .form(&form)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn preupload(
        &self,
        repo: &RepoRef,
        files: &[PreuploadFile],
    ) -> Result<Vec<PreuploadResult>, HubError> {
        let url = self.repo_api_url(repo, "preupload")?;
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .json(&json!({ "files": files }))
            .send()
            .await?;
        let payload: PreuploadResponse = Self::handle_response(response).await?;
        Ok(payload.files)
    }

    pub async fn lfs_batch(
        &self,
        repo: &RepoRef,
        objects: &[LfsObject],
    ) -> Result<Vec<LfsBatchObject>, HubError> {
        let url = self.lfs_batch_url(repo)?;
        let body = serde_json::to_vec(&json!({
            "operation": "upload",
            "transfers": ["basic"],
            "objects": objects,
            "hash_algo": "sha256",
            "ref": { "name": repo.revision },
        }))?;
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .header(ACCEPT, LFS_MEDIA_TYPE)
            .header(CONTENT_TYPE, LFS_MEDIA_TYPE)
            .body(body)
            .send()
            .await?;
        let payload: LfsBatchResponse = Self::handle_response(response).await?;
        Ok(payload.objects)
    }

    pub async fn lfs_verify(&self, action: &LfsAction, object: &LfsObject) -> Result<(), HubError> {
        let mut request = self
            .http
            .post(action.href.clone())
            .header(AUTHORIZATION, self.auth_header_value())
            .header(ACCEPT, LFS_MEDIA_TYPE)
            .header(CONTENT_TYPE, LFS_MEDIA_TYPE);
        for (name, value) in &action.header {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.body(serde_json::to_vec(object)?).send().await?;
        Self::check_status(response).await
    }

    pub async fn commit(
        &self,
        repo: &RepoRef,
        summary: &str,
        operations: &[CommitOperation],
    ) -> Result<CommitInfo, HubError> {
        let url = self.repo_api_url(repo, "commit")?;
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .header(CONTENT_TYPE, NDJSON_MEDIA_TYPE)
            .body(commit_payload(summary, operations)?)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, HubError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| HubError::InvalidEndpoint)?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn repo_api_url(&self, repo: &RepoRef, action: &str) -> Result<Url, HubError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| HubError::InvalidEndpoint)?
            .pop_if_empty()
            .push("api")
            .push(repo.repo_type.api_segment())
            .extend(repo.id_segments())
            .push(action)
            .push(&repo.revision);
        Ok(url)
    }

    fn lfs_batch_url(&self, repo: &RepoRef) -> Result<Url, HubError> {
        let mut url = self.endpoint.clone();
        let segments: Vec<&str> = repo.id_segments().collect();
        let (last, owners) = segments
            .split_last()
            .ok_or_else(|| HubError::MissingEntry("repository id".to_string()))?;
        let git_name = format!("{last}.git");
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| HubError::InvalidEndpoint)?;
            path.pop_if_empty();
            if let Some(prefix) = repo.repo_type.url_prefix() {
                path.push(prefix);
            }
            path.extend(owners)
                .push(&git_name)
                .extend(["info", "lfs", "objects", "batch"]);
        }
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, HubError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(HubError::Api { status, body })
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<(), HubError> {
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(HubError::Api { status, body })
    }
}

impl HubError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            HubError::Api { status, .. } => Some(classify_api_status(*status)),
            HubError::Request(err) => Some(
                err.status()
                    .map(classify_api_status)
                    .unwrap_or(ApiErrorClass::Transient),
            ),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::Auth))
    }
}

pub fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn commit_payload(summary: &str, operations: &[CommitOperation]) -> Result<String, HubError> {
    let mut lines = Vec::with_capacity(operations.len() + 1);
    lines.push(serde_json::to_string(&json!({
        "key": "header",
        "value": { "summary": summary, "description": "" },
    }))?);
    for operation in operations {
        let line = match operation {
            CommitOperation::File {
                path,
                content_base64,
            } => json!({
                "key": "file",
                "value": { "content": content_base64, "path": path, "encoding": "base64" },
            }),
            CommitOperation::LfsFile { path, oid, size } => json!({
                "key": "lfsFile",
                "value": { "path": path, "algo": "sha256", "oid": oid, "size": size },
            }),
        };
        lines.push(serde_json::to_string(&line)?);
    }
    Ok(lines.join("\n"))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhoAmI {
    pub name: String,
    #[serde(rename = "type", default)]
    pub account_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PathInfo {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub lfs: Option<LfsInfo>,
}

impl PathInfo {
    /// Size of the stored file; LFS pointers report the size of the real object.
    pub fn file_size(&self) -> Option<u64> {
        if self.entry_type != EntryType::File {
            return None;
        }
        self.lfs.as_ref().map(|lfs| lfs.size).or(self.size)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LfsInfo {
    pub oid: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreuploadFile {
    pub path: String,
    pub sample: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    Regular,
    Lfs,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreuploadResult {
    pub path: String,
    #[serde(rename = "uploadMode")]
    pub upload_mode: UploadMode,
    #[serde(rename = "shouldIgnore", default)]
    pub should_ignore: bool,
}

#[derive(Debug, Deserialize)]
struct PreuploadResponse {
    files: Vec<PreuploadResult>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LfsObject {
    pub oid: String,
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LfsBatchObject {
    pub oid: String,
    pub size: u64,
    #[serde(default)]
    pub actions: Option<LfsActions>,
    #[serde(default)]
    pub error: Option<LfsObjectError>,
}

impl LfsBatchObject {
    pub fn into_result(self) -> Result<Self, HubError> {
        match &self.error {
            Some(error) => Err(HubError::Lfs {
                oid: self.oid.clone(),
                message: format!("{} ({})", error.message, error.code),
            }),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LfsObjectError {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LfsActions {
    #[serde(default)]
    pub upload: Option<LfsAction>,
    #[serde(default)]
    pub verify: Option<LfsAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LfsAction {
    pub href: Url,
    #[serde(default)]
    pub header: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LfsBatchResponse {
    objects: Vec<LfsBatchObject>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOperation {
    File {
        path: String,
        content_base64: String,
    },
    LfsFile {
        path: String,
        oid: String,
        size: u64,
    },
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CommitInfo {
    #[serde(rename = "commitUrl", default)]
    pub commit_url: Option<String>,
    #[serde(rename = "commitOid", default)]
    pub commit_oid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::RepoType;

    #[test]
    fn classifies_statuses_like_the_retry_policy_expects() {
        assert_eq!(
            classify_api_status(StatusCode::UNAUTHORIZED),
            ApiErrorClass::Auth
        );
        assert_eq!(classify_api_status(StatusCode::FORBIDDEN), ApiErrorClass::Auth);
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorClass::RateLimit
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_GATEWAY),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::NOT_FOUND),
            ApiErrorClass::Permanent
        );
    }

    #[test]
    fn repo_urls_are_built_from_segments() {
        let client = HubClient::with_endpoint("https://hf-mirror.com/", "t").unwrap();
        let repo = RepoRef::new(RepoType::Dataset, "alice/backup").with_revision("refs/pr/1");
        let url = client.repo_api_url(&repo, "paths-info").unwrap();
        assert_eq!(
            url.as_str(),
            "https://hf-mirror.com/api/datasets/alice/backup/paths-info/refs%2Fpr%2F1"
        );
    }

    #[test]
    fn lfs_batch_url_uses_git_remote_layout() {
        let client = HubClient::with_endpoint("https://huggingface.co", "t").unwrap();
        let dataset = RepoRef::new(RepoType::Dataset, "alice/backup");
        assert_eq!(
            client.lfs_batch_url(&dataset).unwrap().as_str(),
            "https://huggingface.co/datasets/alice/backup.git/info/lfs/objects/batch"
        );
        let model = RepoRef::new(RepoType::Model, "alice/weights");
        assert_eq!(
            client.lfs_batch_url(&model).unwrap().as_str(),
            "https://huggingface.co/alice/weights.git/info/lfs/objects/batch"
        );
    }

    #[test]
    fn commit_payload_is_newline_delimited() {
        let payload = commit_payload(
            "Upload a.bin",
            &[
                CommitOperation::File {
                    path: "docs/a.txt".into(),
                    content_base64: "aGk=".into(),
                },
                CommitOperation::LfsFile {
                    path: "videos/a.mp4".into(),
                    oid: "abc".into(),
                    size: 42,
                },
            ],
        )
        .unwrap();
        let lines: Vec<serde_json::Value> = payload
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["key"], "header");
        assert_eq!(lines[0]["value"]["summary"], "Upload a.bin");
        assert_eq!(lines[1]["value"]["encoding"], "base64");
        assert_eq!(lines[2]["key"], "lfsFile");
        assert_eq!(lines[2]["value"]["size"], 42);
    }

    #[test]
    fn lfs_sizes_take_precedence_for_pointer_files() {
        let info = PathInfo {
            path: "videos/a.mp4".into(),
            entry_type: EntryType::File,
            size: Some(134),
            oid: None,
            lfs: Some(LfsInfo {
                oid: "abc".into(),
                size: 500,
            }),
        };
        assert_eq!(info.file_size(), Some(500));

        let dir = PathInfo {
            path: "videos".into(),
            entry_type: EntryType::Directory,
            size: None,
            oid: None,
            lfs: None,
        };
        assert_eq!(dir.file_size(), None);
    }
}
