//! Versioned repository contract consumed by the sync engine, plus the git and
//! in-memory providers.

use std::path::PathBuf;

use async_trait::async_trait;
use siteindex_core::{Commit, CommitId, SiteId};
use thiserror::Error;

mod git;
mod memory;

pub use git::{
    GitRepositoryProvider, RepositoryLayout, DEFAULT_IDENTITY_MARKER, DEFAULT_SANDBOX_DIR,
    DEFAULT_SITES_REPOS_PATH,
};
pub use memory::MemoryRepositoryProvider;

pub const CRATE_NAME: &str = "siteindex-repo";

/// Lines of the identity marker starting with this are comments.
pub const MARKER_COMMENT_PREFIX: char = '#';

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("identity marker missing for site {0}")]
    MarkerMissing(SiteId),
    #[error("commit {commit} is not part of the history of site {site}")]
    UnknownCommit { site: SiteId, commit: CommitId },
    #[error("no repository for site {0}")]
    SiteNotFound(SiteId),
}

/// Parsed identity marker file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMarker {
    tokens: Vec<String>,
}

impl IdentityMarker {
    pub fn parse(text: &str) -> Self {
        let tokens = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty() && !line.starts_with(MARKER_COMMENT_PREFIX))
            .map(str::to_string)
            .collect();
        Self { tokens }
    }

    /// Exact match against any token line.
    pub fn matches(&self, token: &str) -> bool {
        !token.is_empty() && self.tokens.iter().any(|candidate| candidate == token)
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    async fn identity_marker(&self, site_id: &SiteId) -> RepoResult<IdentityMarker>;

    /// Commits strictly after `watermark`, oldest first. `None` means the whole
    /// history; an up-to-date site yields an empty list.
    async fn commits_after(
        &self,
        site_id: &SiteId,
        watermark: Option<&CommitId>,
    ) -> RepoResult<Vec<Commit>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_ignores_comment_and_blank_lines() {
        let marker = IdentityMarker::parse(
            "# Site identity, do not edit\n\n4f0c2a9e-1b7d-4c55-9a43-2c1f3e0b7d11\r\n#4f0c2a9e-stale\n",
        );
        assert_eq!(marker.tokens(), ["4f0c2a9e-1b7d-4c55-9a43-2c1f3e0b7d11"]);
        assert!(marker.matches("4f0c2a9e-1b7d-4c55-9a43-2c1f3e0b7d11"));
        assert!(!marker.matches("4f0c2a9e-stale"));
        assert!(!marker.matches(""));
    }

    #[test]
    fn marker_match_is_exact() {
        let marker = IdentityMarker::parse("abc-123\n");
        assert!(!marker.matches("abc-1234"));
        assert!(!marker.matches("ABC-123"));
        assert!(!marker.matches(" abc-123"));
    }

    #[test]
    fn comment_only_marker_matches_nothing() {
        let marker = IdentityMarker::parse("# only a comment\n#\n");
        assert!(marker.tokens().is_empty());
        assert!(!marker.matches("# only a comment"));
    }
}
