//! The per-site repository to index replay.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use siteindex_core::{Commit, CommitId, SiteId, SiteRecord};
use siteindex_repo::{RepoError, RepositoryProvider};
use siteindex_storage::{
    ClusterMutations, IndexStore, RetryingIndexStore, SiteQueries, SiteRegistry, WatermarkAdvance,
};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::scheduler::SiteTask;
use crate::translate::{apply_mutation, translate_commit};
use crate::SyncError;

pub const SYNC_TASK_NAME: &str = "repository-sync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The site is not in the registry.
    SiteMissing,
    /// The repository is not the instance the index was built from.
    IdentityMismatch,
    MarkerUnreadable,
    /// Never synced; needs [`RepositorySyncTask::bootstrap_site`].
    NoWatermark,
    UpToDate,
    Synced { applied: usize, watermark: CommitId },
    /// Another writer moved the watermark; `applied` commits were ours.
    Conflict { applied: usize },
}

/// Where a site run currently is. Only surfaces in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    LoadingSite,
    VerifyingIdentity,
    ReadingLog,
    Applying,
    AdvancingWatermark,
    Finalizing,
}

enum Replay {
    Done { applied: usize, watermark: CommitId },
    Conflict { applied: usize },
}

pub struct RepositorySyncTask<P, S> {
    repo: Arc<P>,
    store: Arc<RetryingIndexStore<S>>,
    registry: SiteRegistry<RetryingIndexStore<S>>,
    cluster_node_id: Option<i64>,
}

impl<P, S> RepositorySyncTask<P, S>
where
    P: RepositoryProvider,
    S: IndexStore,
{
    pub fn new(repo: Arc<P>, store: Arc<RetryingIndexStore<S>>) -> Self {
        let registry = SiteRegistry::new(Arc::clone(&store));
        Self {
            repo,
            store,
            registry,
            cluster_node_id: None,
        }
    }

    pub fn with_cluster_node(mut self, cluster_node_id: Option<i64>) -> Self {
        self.cluster_node_id = cluster_node_id;
        self
    }

    pub fn registry(&self) -> &SiteRegistry<RetryingIndexStore<S>> {
        &self.registry
    }

    /// Replays the commits after the site's watermark, advancing the watermark
    /// after each fully applied commit.
    pub async fn sync_site(&self, site_id: &SiteId) -> Result<SyncOutcome, SyncError> {
        let site = match self.verified_site(site_id).await? {
            Ok(site) => site,
            Err(outcome) => return Ok(outcome),
        };
        let Some(watermark) = site.last_verified_commit_id else {
            info!(site = %site_id, "site has no watermark yet; bootstrap required");
            return Ok(SyncOutcome::NoWatermark);
        };

        phase(site_id, SyncPhase::ReadingLog);
        let commits = self.repo.commits_after(site_id, Some(&watermark)).await?;
        if commits.is_empty() {
            if site.last_synced_commit_id.as_ref() != Some(&watermark) {
                info!(site = %site_id, watermark = %watermark, "finishing an interrupted sync");
                self.finalize(site_id, &watermark).await?;
            }
            debug!(site = %site_id, watermark = %watermark, "up to date");
            return Ok(SyncOutcome::UpToDate);
        }

        info!(site = %site_id, backlog = commits.len(), from = %watermark, "replaying commits");
        self.replay_and_finish(site_id, Some(watermark), &commits)
            .await
    }

    /// Full replay for a site that has never been synced.
    pub async fn bootstrap_site(&self, site_id: &SiteId) -> Result<SyncOutcome, SyncError> {
        let site = match self.verified_site(site_id).await? {
            Ok(site) => site,
            Err(outcome) => return Ok(outcome),
        };
        if let Some(watermark) = site.last_verified_commit_id {
            warn!(site = %site_id, watermark = %watermark, "bootstrap refused; site already has a watermark");
            return Ok(SyncOutcome::Conflict { applied: 0 });
        }

        phase(site_id, SyncPhase::ReadingLog);
        let commits = self.repo.commits_after(site_id, None).await?;
        if commits.is_empty() {
            return Ok(SyncOutcome::UpToDate);
        }
        info!(site = %site_id, commits = commits.len(), "bootstrapping site index");
        self.replay_and_finish(site_id, None, &commits).await
    }

    /// Loads the site and checks the repository identity. The inner `Err`
    /// carries an outcome that ends the run without touching the index.
    async fn verified_site(
        &self,
        site_id: &SiteId,
    ) -> Result<Result<SiteRecord, SyncOutcome>, SyncError> {
        phase(site_id, SyncPhase::LoadingSite);
        let Some(site) = self.store.get_site(site_id).await? else {
            warn!(site = %site_id, "site not found; skipping");
            return Ok(Err(SyncOutcome::SiteMissing));
        };

        phase(site_id, SyncPhase::VerifyingIdentity);
        let marker = match self.repo.identity_marker(site_id).await {
            Ok(marker) => marker,
            Err(
                err @ (RepoError::MarkerMissing(_)
                | RepoError::SiteNotFound(_)
                | RepoError::Io { .. }),
            ) => {
                warn!(site = %site_id, error = %err, "identity marker unreadable; skipping site");
                return Ok(Err(SyncOutcome::MarkerUnreadable));
            }
            Err(err) => return Err(err.into()),
        };
        if !marker.matches(&site.site_uuid) {
            warn!(
                site = %site_id,
                expected = %site.site_uuid,
                "repository identity does not match the registry; skipping site"
            );
            return Ok(Err(SyncOutcome::IdentityMismatch));
        }

        Ok(Ok(site))
    }

    async fn replay_and_finish(
        &self,
        site_id: &SiteId,
        watermark: Option<CommitId>,
        commits: &[Commit],
    ) -> Result<SyncOutcome, SyncError> {
        match self.replay(site_id, watermark, commits).await? {
            Replay::Conflict { applied } => Ok(SyncOutcome::Conflict { applied }),
            Replay::Done { applied, watermark } => {
                self.finalize(site_id, &watermark).await?;
                info!(site = %site_id, applied, watermark = %watermark, "site synced");
                Ok(SyncOutcome::Synced { applied, watermark })
            }
        }
    }

    /// Records the synced watermark. The site row is written last so a stale
    /// `last_synced_commit_id` means the cluster row may be stale too.
    async fn finalize(&self, site_id: &SiteId, watermark: &CommitId) -> Result<(), SyncError> {
        phase(site_id, SyncPhase::Finalizing);
        if let Some(node_id) = self.cluster_node_id {
            self.store
                .update_cluster_node_last_synced_commit_id(node_id, site_id, watermark)
                .await?;
        }
        self.registry.mark_synced(site_id, watermark).await?;
        Ok(())
    }

    async fn replay(
        &self,
        site_id: &SiteId,
        mut expected: Option<CommitId>,
        commits: &[Commit],
    ) -> Result<Replay, SyncError> {
        let mut applied = 0;
        for commit in commits {
            let mutations =
                translate_commit(site_id, commit).map_err(|source| SyncError::Translation {
                    commit: commit.id.clone(),
                    source,
                })?;

            phase(site_id, SyncPhase::Applying);
            debug!(site = %site_id, commit = %commit.id, mutations = mutations.len(), "applying commit");
            for mutation in &mutations {
                apply_mutation(self.store.as_ref(), mutation).await?;
            }

            phase(site_id, SyncPhase::AdvancingWatermark);
            match self
                .registry
                .advance_watermark(site_id, expected.as_ref(), &commit.id)
                .await?
            {
                WatermarkAdvance::Advanced => {}
                WatermarkAdvance::Conflict => {
                    warn!(site = %site_id, commit = %commit.id, "watermark moved by another writer; stopping");
                    return Ok(Replay::Conflict { applied });
                }
            }
            if let Some(node_id) = self.cluster_node_id {
                self.store
                    .update_cluster_node_last_verified_commit_id(node_id, site_id, &commit.id)
                    .await?;
            }
            expected = Some(commit.id.clone());
            applied += 1;
        }

        match expected {
            Some(watermark) => Ok(Replay::Done { applied, watermark }),
            None => Ok(Replay::Conflict { applied }),
        }
    }
}

fn phase(site_id: &SiteId, phase: SyncPhase) {
    debug!(site = %site_id, ?phase, "sync phase");
}

#[async_trait]
impl<P, S> SiteTask for RepositorySyncTask<P, S>
where
    P: RepositoryProvider + 'static,
    S: IndexStore + 'static,
{
    async fn run(&self, site_id: &SiteId) -> anyhow::Result<()> {
        let run_id = Uuid::new_v4();
        let span = info_span!("site_run", %run_id, site = %site_id, task = SYNC_TASK_NAME);
        async {
            match self.sync_site(site_id).await {
                Ok(outcome) => {
                    debug!(?outcome, "site run finished");
                    Ok(())
                }
                Err(err) => {
                    debug!(error = %err, "site sync failed; watermark left at last applied commit");
                    Err(err.into())
                }
            }
        }
        .instrument(span)
        .await
    }
}
