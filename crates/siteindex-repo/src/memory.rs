use std::collections::BTreeMap;

use async_trait::async_trait;
use siteindex_core::{Commit, CommitId, SiteId};
use tokio::sync::Mutex;

use crate::{IdentityMarker, RepoError, RepoResult, RepositoryProvider};

#[derive(Debug, Default)]
struct SiteLog {
    marker: Option<String>,
    commits: Vec<Commit>,
}

/// Ordered commit log plus marker text per site, held in memory.
#[derive(Debug, Default)]
pub struct MemoryRepositoryProvider {
    sites: Mutex<BTreeMap<SiteId, SiteLog>>,
}

impl MemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a site; `marker` is the raw marker file text, `None` for no file.
    pub async fn add_site(&self, site_id: &SiteId, marker: Option<&str>) {
        let mut sites = self.sites.lock().await;
        sites.entry(site_id.clone()).or_default().marker = marker.map(str::to_string);
    }

    pub async fn set_marker(&self, site_id: &SiteId, marker: Option<&str>) {
        self.add_site(site_id, marker).await;
    }

    pub async fn push_commit(&self, site_id: &SiteId, commit: Commit) {
        let mut sites = self.sites.lock().await;
        sites.entry(site_id.clone()).or_default().commits.push(commit);
    }
}

#[async_trait]
impl RepositoryProvider for MemoryRepositoryProvider {
    async fn identity_marker(&self, site_id: &SiteId) -> RepoResult<IdentityMarker> {
        let sites = self.sites.lock().await;
        let log = sites
            .get(site_id)
            .ok_or_else(|| RepoError::SiteNotFound(site_id.clone()))?;
        log.marker
            .as_deref()
            .map(IdentityMarker::parse)
            .ok_or_else(|| RepoError::MarkerMissing(site_id.clone()))
    }

    async fn commits_after(
        &self,
        site_id: &SiteId,
        watermark: Option<&CommitId>,
    ) -> RepoResult<Vec<Commit>> {
        let sites = self.sites.lock().await;
        let log = sites
            .get(site_id)
            .ok_or_else(|| RepoError::SiteNotFound(site_id.clone()))?;
        let start = match watermark {
            None => 0,
            Some(watermark) => {
                let position = log
                    .commits
                    .iter()
                    .position(|commit| &commit.id == watermark)
                    .ok_or_else(|| RepoError::UnknownCommit {
                        site: site_id.clone(),
                        commit: watermark.clone(),
                    })?;
                position + 1
            }
        };
        Ok(log.commits[start..].to_vec())
    }
}
