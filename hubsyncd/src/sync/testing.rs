use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use hubsync_core::{HubError, UploadMode};
use reqwest::StatusCode;

use super::remote::{RemoteError, RemoteRepository};
use super::transfer::{TransferError, UploadReceipt};

pub(crate) fn api_error(status: StatusCode) -> RemoteError {
    RemoteError::Hub(HubError::Api {
        status,
        body: status.to_string(),
    })
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Scripted {
    Fail(StatusCode),
    /// The server stores the file but the acknowledgement is lost.
    FailAfterStore(StatusCode),
}

#[derive(Default)]
struct FakeState {
    files: BTreeMap<String, u64>,
    script: VecDeque<Scripted>,
    stat_failures: usize,
    uploads: Vec<String>,
    stats: usize,
    auths: usize,
    reject_auth: bool,
    panic_on_auth: bool,
    after_upload: Option<UploadHook>,
}

type UploadHook = Arc<dyn Fn(&Path) + Send + Sync>;

/// In-memory repository with scripted upload failures.
#[derive(Clone, Default)]
pub(crate) struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    pub(crate) fn with_file(self, path: &str, size: u64) -> Self {
        self.state.lock().unwrap().files.insert(path.to_string(), size);
        self
    }

    pub(crate) fn script(&self, steps: impl IntoIterator<Item = Scripted>) {
        self.state.lock().unwrap().script.extend(steps);
    }

    pub(crate) fn fail_next_stats(&self, count: usize) {
        self.state.lock().unwrap().stat_failures = count;
    }

    pub(crate) fn reject_auth(&self) {
        self.state.lock().unwrap().reject_auth = true;
    }

    pub(crate) fn panic_on_auth(&self) {
        self.state.lock().unwrap().panic_on_auth = true;
    }

    /// Runs `hook` on the local file after each stored upload.
    pub(crate) fn after_upload(&self, hook: impl Fn(&Path) + Send + Sync + 'static) {
        self.state.lock().unwrap().after_upload = Some(Arc::new(hook));
    }

    pub(crate) fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub(crate) fn stat_count(&self) -> usize {
        self.state.lock().unwrap().stats
    }

    pub(crate) fn auth_count(&self) -> usize {
        self.state.lock().unwrap().auths
    }

    pub(crate) fn stored(&self, path: &str) -> Option<u64> {
        self.state.lock().unwrap().files.get(path).copied()
    }
}

impl RemoteRepository for FakeRemote {
    async fn authenticate(&self) -> Result<String, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.auths += 1;
        if state.panic_on_auth {
            drop(state);
            panic!("session crashed");
        }
        if state.reject_auth {
            return Err(api_error(StatusCode::UNAUTHORIZED));
        }
        Ok("alice".to_string())
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<UploadReceipt, RemoteError> {
        let size = std::fs::metadata(local_path)
            .map_err(|err| RemoteError::Transfer(TransferError::Io(err)))?
            .len();
        let mut state = self.state.lock().unwrap();
        state.uploads.push(remote_path.to_string());
        match state.script.pop_front() {
            Some(Scripted::Fail(status)) => Err(api_error(status)),
            Some(Scripted::FailAfterStore(status)) => {
                state.files.insert(remote_path.to_string(), size);
                Err(api_error(status))
            }
            None => {
                state.files.insert(remote_path.to_string(), size);
                let hook = state.after_upload.clone();
                drop(state);
                if let Some(hook) = hook {
                    hook(local_path);
                }
                Ok(UploadReceipt {
                    remote_path: remote_path.to_string(),
                    size,
                    mode: UploadMode::Regular,
                    commit_oid: Some("c0ffee".to_string()),
                })
            }
        }
    }

    async fn stat_path(&self, remote_path: &str) -> Result<Option<u64>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.stats += 1;
        if state.stat_failures > 0 {
            state.stat_failures -= 1;
            return Err(api_error(StatusCode::BAD_GATEWAY));
        }
        Ok(state.files.get(remote_path).copied())
    }
}
