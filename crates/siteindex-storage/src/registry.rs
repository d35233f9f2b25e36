use std::sync::Arc;

use siteindex_core::{CommitId, SiteId, SiteRecord};
use tracing::debug;

use crate::ops::{SiteMutations, SiteQueries};
use crate::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkAdvance {
    Advanced,
    /// The stored watermark was not the expected one; nothing was written.
    Conflict,
}

/// Site metadata lookups plus the conditional watermark updates the sync task
/// relies on. Cheap to clone; all clones share one store.
#[derive(Debug)]
pub struct SiteRegistry<S> {
    store: Arc<S>,
}

impl<S> Clone for SiteRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> SiteRegistry<S>
where
    S: SiteQueries + SiteMutations,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn get(&self, site_id: &SiteId) -> StoreResult<SiteRecord> {
        self.store
            .get_site(site_id)
            .await?
            .ok_or_else(|| StoreError::not_found("site", site_id.as_str()))
    }

    /// Enabled sites in the `Ready` state, read fresh on every call.
    pub async fn schedulable_sites(&self) -> StoreResult<Vec<SiteId>> {
        Ok(self
            .store
            .list_sites()
            .await?
            .into_iter()
            .filter(SiteRecord::is_schedulable)
            .map(|site| site.site_id)
            .collect())
    }

    pub async fn last_verified_watermark(&self, site_id: &SiteId) -> StoreResult<Option<CommitId>> {
        Ok(self.get(site_id).await?.last_verified_commit_id)
    }

    pub async fn advance_watermark(
        &self,
        site_id: &SiteId,
        expected: Option<&CommitId>,
        next: &CommitId,
    ) -> StoreResult<WatermarkAdvance> {
        let rows = self
            .store
            .compare_and_set_last_verified_commit_id(site_id, expected, next)
            .await?;
        if rows == 0 {
            debug!(site = %site_id, commit = %next, "watermark compare-and-set lost");
            Ok(WatermarkAdvance::Conflict)
        } else {
            Ok(WatermarkAdvance::Advanced)
        }
    }

    pub async fn mark_synced(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()> {
        self.store
            .update_site_last_synced_commit_id(site_id, commit_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIndexStore;
    use siteindex_core::SiteState;

    fn record(id: i64, site_id: &str, state: SiteState, enabled: bool) -> SiteRecord {
        SiteRecord {
            id,
            site_id: SiteId::new(site_id),
            site_uuid: format!("uuid-{site_id}"),
            name: site_id.into(),
            description: None,
            state,
            enabled,
            publishing_enabled: true,
            publishing_status: None,
            publishing_lock_owner: None,
            publishing_lock_heartbeat: None,
            last_commit_id: None,
            last_verified_commit_id: None,
            last_synced_commit_id: None,
        }
    }

    #[tokio::test]
    async fn only_enabled_ready_sites_are_schedulable() {
        let store = Arc::new(MemoryIndexStore::new());
        store.seed_site(record(1, "blog", SiteState::Ready, true)).await;
        store.seed_site(record(2, "shop", SiteState::Ready, false)).await;
        store.seed_site(record(3, "docs", SiteState::Creating, true)).await;
        store.seed_site(record(4, "wiki", SiteState::Ready, true)).await;
        let registry = SiteRegistry::new(store);

        let sites = registry.schedulable_sites().await.unwrap();
        assert_eq!(sites, vec![SiteId::new("blog"), SiteId::new("wiki")]);
    }

    #[tokio::test]
    async fn missing_site_is_not_found() {
        let registry = SiteRegistry::new(Arc::new(MemoryIndexStore::new()));
        let err = registry.get(&SiteId::new("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn second_writer_with_the_same_expectation_conflicts() {
        let store = Arc::new(MemoryIndexStore::new());
        store.seed_site(record(1, "blog", SiteState::Ready, true)).await;
        let registry = SiteRegistry::new(store);
        let blog = SiteId::new("blog");

        let first = registry
            .advance_watermark(&blog, None, &CommitId::new("c1"))
            .await
            .unwrap();
        let second = registry
            .advance_watermark(&blog, None, &CommitId::new("c1-other"))
            .await
            .unwrap();

        assert_eq!(first, WatermarkAdvance::Advanced);
        assert_eq!(second, WatermarkAdvance::Conflict);
        assert_eq!(
            registry.last_verified_watermark(&blog).await.unwrap(),
            Some(CommitId::new("c1"))
        );
    }
}
