use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hubsync_core::{DEFAULT_ENDPOINT, RepoRef, RepoType};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

const DEFAULT_WATCH_DIR_NAME: &str = "HubSync";
const DEFAULT_APP_DIR_NAME: &str = "hubsync";
const SETTINGS_FILE_NAME: &str = "settings.json";
const HISTORY_FILE_NAME: &str = "history.json";
const FAILURES_FILE_NAME: &str = "failures.json";
const DEFAULT_MAX_RETRIES: u64 = 5;
const DEFAULT_RETRY_BASE_SECS: u64 = 30;
const DEFAULT_FILE_INTERVAL_SECS: u64 = 15;
const DEFAULT_STABILITY_SECS: u64 = 2;
const DEFAULT_POLL_SECS: u64 = 5;
const DEFAULT_ERROR_PAUSE_SECS: u64 = 10;
const DEFAULT_IDLE_INTERVAL_SECS: u64 = 1800;
const DEFAULT_NOTIFY_MIN_SIZE_MB: u64 = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("home directory is unavailable")]
    MissingHome,
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("settings document {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("hub token is not configured (hf_token / HUBSYNC_TOKEN)")]
    MissingToken,
    #[error("repository id is not configured (repo_id / HUBSYNC_REPO_ID)")]
    MissingRepoId,
    #[error(transparent)]
    RepoType(#[from] hubsync_core::UnknownRepoType),
    #[error("invalid hub endpoint {0}: {1}")]
    Endpoint(String, url::ParseError),
}

/// Access token wrapper that keeps the secret out of `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Immutable parameter set handed to one run of the upload loop.
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub endpoint: String,
    pub token: Token,
    pub repo: RepoRef,
    pub remote_folder: String,
    pub watch_root: PathBuf,
    pub state_dir: PathBuf,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub file_interval: Duration,
    pub stability_window: Duration,
    pub poll_interval: Duration,
    pub error_pause: Duration,
    pub idle_interval: Duration,
    pub notify_min_size_mb: u64,
    pub delete_after_upload: bool,
    pub enable_idle_notification: bool,
    pub enable_local_watcher: bool,
    pub webhook_url: Option<String>,
}

impl DaemonConfig {
    /// Defaults, then the settings document, then `HUBSYNC_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::MissingHome)?;
        let document = SettingsDocument::load_with_env(&home)?;
        Self::from_document(document, &home)
    }

    pub fn from_document(document: SettingsDocument, home: &Path) -> Result<Self, ConfigError> {
        let token = document
            .hf_token
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;
        let repo_id = document
            .repo_id
            .map(|id| id.trim().trim_matches('/').to_string())
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::MissingRepoId)?;
        let repo_type = match document.repo_type.as_deref().map(str::trim) {
            None | Some("") => RepoType::Dataset,
            Some(value) => value.parse()?,
        };
        let revision = document
            .revision
            .filter(|rev| !rev.trim().is_empty())
            .unwrap_or_else(|| "main".to_string());
        let endpoint = document
            .hf_endpoint
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        url::Url::parse(&endpoint).map_err(|err| ConfigError::Endpoint(endpoint.clone(), err))?;

        let watch_root = document
            .watch_dir
            .filter(|value| !value.trim().is_empty())
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| home.join(DEFAULT_WATCH_DIR_NAME));
        let state_dir = document
            .state_dir
            .filter(|value| !value.trim().is_empty())
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| default_app_dir(home));

        Ok(Self {
            endpoint,
            token: Token::new(token.trim()),
            repo: RepoRef::new(repo_type, repo_id).with_revision(revision),
            remote_folder: normalize_remote_folder(document.remote_folder.as_deref()),
            watch_root,
            state_dir,
            max_retries: document
                .max_retries
                .unwrap_or(DEFAULT_MAX_RETRIES)
                .clamp(1, u64::from(u32::MAX)) as u32,
            retry_base_delay: secs(document.retry_base_secs, DEFAULT_RETRY_BASE_SECS),
            file_interval: secs(document.file_interval, DEFAULT_FILE_INTERVAL_SECS),
            stability_window: secs(document.stability_secs, DEFAULT_STABILITY_SECS),
            poll_interval: secs(document.poll_secs, DEFAULT_POLL_SECS).max(Duration::from_secs(1)),
            error_pause: secs(document.error_pause_secs, DEFAULT_ERROR_PAUSE_SECS),
            idle_interval: secs(document.idle_interval, DEFAULT_IDLE_INTERVAL_SECS),
            notify_min_size_mb: document
                .notify_min_size
                .unwrap_or(DEFAULT_NOTIFY_MIN_SIZE_MB),
            delete_after_upload: document.delete_after_upload.unwrap_or(true),
            enable_idle_notification: document.enable_idle_notification.unwrap_or(false),
            enable_local_watcher: document.enable_local_watcher.unwrap_or(true),
            webhook_url: document
                .webhook_url
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        })
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join(HISTORY_FILE_NAME)
    }

    pub fn failures_path(&self) -> PathBuf {
        self.state_dir.join(FAILURES_FILE_NAME)
    }
}

/// The key/value settings document. Integer keys accept numbers or numeric
/// strings; blank or malformed values fall back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SettingsDocument {
    pub hf_endpoint: Option<String>,
    pub hf_token: Option<String>,
    pub repo_id: Option<String>,
    pub repo_type: Option<String>,
    pub revision: Option<String>,
    pub remote_folder: Option<String>,
    pub watch_dir: Option<String>,
    pub state_dir: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub max_retries: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub retry_base_secs: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub file_interval: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub stability_secs: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub poll_secs: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub error_pause_secs: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub idle_interval: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub notify_min_size: Option<u64>,
    #[serde(deserialize_with = "lenient_bool")]
    pub delete_after_upload: Option<bool>,
    #[serde(alias = "enable_idle_email", deserialize_with = "lenient_bool")]
    pub enable_idle_notification: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    pub enable_local_watcher: Option<bool>,
    pub webhook_url: Option<String>,
}

impl SettingsDocument {
    pub fn load_with_env(home: &Path) -> Result<Self, ConfigError> {
        let path = settings_path(home, |name| std::env::var(name).ok());
        let document = Self::read(&path)?;
        Ok(document.with_env_overrides(|name| std::env::var(name).ok()))
    }

    /// A missing document is an empty one.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let number = |name: &str| text(name).and_then(|value| parse_lenient_u64(&value));
        let flag = |name: &str| text(name).and_then(|value| parse_bool(&value));

        override_with(&mut self.hf_endpoint, text("HUBSYNC_ENDPOINT"));
        override_with(
            &mut self.hf_token,
            text("HUBSYNC_TOKEN").or_else(|| text("HF_TOKEN")),
        );
        override_with(&mut self.repo_id, text("HUBSYNC_REPO_ID"));
        override_with(&mut self.repo_type, text("HUBSYNC_REPO_TYPE"));
        override_with(&mut self.revision, text("HUBSYNC_REVISION"));
        override_with(&mut self.remote_folder, text("HUBSYNC_REMOTE_FOLDER"));
        override_with(&mut self.watch_dir, text("HUBSYNC_WATCH_DIR"));
        override_with(&mut self.state_dir, text("HUBSYNC_STATE_DIR"));
        override_with(&mut self.max_retries, number("HUBSYNC_MAX_RETRIES"));
        override_with(&mut self.retry_base_secs, number("HUBSYNC_RETRY_BASE_SECS"));
        override_with(&mut self.file_interval, number("HUBSYNC_FILE_INTERVAL_SECS"));
        override_with(&mut self.stability_secs, number("HUBSYNC_STABILITY_SECS"));
        override_with(&mut self.poll_secs, number("HUBSYNC_POLL_SECS"));
        override_with(&mut self.error_pause_secs, number("HUBSYNC_ERROR_PAUSE_SECS"));
        override_with(&mut self.idle_interval, number("HUBSYNC_IDLE_INTERVAL_SECS"));
        override_with(&mut self.notify_min_size, number("HUBSYNC_NOTIFY_MIN_SIZE_MB"));
        override_with(
            &mut self.delete_after_upload,
            flag("HUBSYNC_DELETE_AFTER_UPLOAD"),
        );
        override_with(
            &mut self.enable_idle_notification,
            flag("HUBSYNC_ENABLE_IDLE_NOTIFICATION"),
        );
        override_with(
            &mut self.enable_local_watcher,
            flag("HUBSYNC_ENABLE_LOCAL_WATCHER"),
        );
        override_with(&mut self.webhook_url, text("HUBSYNC_WEBHOOK_URL"));
        self
    }

    /// Copy suitable for display, with the token masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.hf_token.is_some() {
            copy.hf_token = Some("***".to_string());
        }
        copy
    }
}

pub fn settings_path<F>(home: &Path, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup("HUBSYNC_CONFIG")
        .filter(|value| !value.trim().is_empty())
        .map(|value| expand_with_home(&value, home))
        .unwrap_or_else(|| default_app_dir(home).join(SETTINGS_FILE_NAME))
}

fn default_app_dir(home: &Path) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home.join(".config"))
        .join(DEFAULT_APP_DIR_NAME)
}

fn override_with<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn secs(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

fn normalize_remote_folder(value: Option<&str>) -> String {
    let trimmed = value.unwrap_or_default().trim().trim_matches('/');
    if trimmed == "." {
        String::new()
    } else {
        trimmed.replace('\\', "/")
    }
}

pub(crate) fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn parse_lenient_u64(value: &str) -> Option<u64> {
    let value = value.trim();
    value
        .parse::<u64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|value| *value >= 0.0)
                .map(|value| value as u64)
        }),
        Value::String(text) => parse_lenient_u64(&text),
        _ => None,
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => Some(flag),
        Value::Number(number) => number.as_u64().map(|value| value != 0),
        Value::String(text) => parse_bool(&text),
        _ => None,
    })
}
