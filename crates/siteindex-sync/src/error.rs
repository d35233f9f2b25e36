use siteindex_core::CommitId;
use siteindex_repo::RepoError;
use siteindex_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("malformed path {path:?}: {reason}")]
    MalformedPath { path: String, reason: &'static str },
    #[error("unsupported change {status} at {path}")]
    UnsupportedChange { path: String, status: String },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Repository(#[from] RepoError),
    #[error("commit {commit} cannot be translated: {source}")]
    Translation {
        commit: CommitId,
        #[source]
        source: TranslationError,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
}
