mod client;
mod repo;

pub use client::{
    ApiErrorClass, CommitInfo, CommitOperation, EntryType, HubClient, HubError, LfsAction,
    LfsActions, LfsBatchObject, LfsInfo, LfsObject, PathInfo, PreuploadFile, PreuploadResult,
    DEFAULT_ENDPOINT, UploadMode, WhoAmI, classify_api_status,
};
pub use repo::{RepoRef, RepoType, UnknownRepoType};
