//! In-process index store.
//!
//! Mirrors the Postgres semantics closely enough to drive the sync engine in
//! tests and one-shot runs, and can be told to fail on demand.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use siteindex_core::{
    item_label, item_preview_url, item_system_type, AccessToken, AuditEntry, AuditParam,
    ClusterMember, ClusterSiteSyncRepo, CommitId, DependencyEdge, GitLogEntry, GroupUpdate,
    ItemRecord, ItemStates, MoveItems, NavigationOrderSequence, NewGroup, NewSite, NewUser,
    PublishRequest, PublishRequestState, RemoteRepository, SiteId, SiteRecord, SiteState,
    UserProperties, UserUpdate, WorkflowEntry,
};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::ops::{
    AuditMutations, ClusterMutations, DependencyMutations, GitLogMutations, GroupMutations,
    ItemMutations, NavigationMutations, PublishRequestMutations, RemoteRepositoryMutations,
    SecurityMutations, SiteMutations, SiteQueries, UserMutations, WorkflowMutations,
};
use crate::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    Permanent,
}

impl FaultKind {
    fn error(self, op: &str) -> StoreError {
        match self {
            Self::Transient => StoreError::transient(format!("injected fault in {op}")),
            Self::Permanent => StoreError::permanent(format!("injected fault in {op}")),
        }
    }
}

/// Lets `skip` mutations through, then fails the next `failures` attempts.
///
/// With `op` set only calls of that mutation (by method name) are counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultPlan {
    pub skip: usize,
    pub failures: usize,
    pub kind: FaultKind,
    pub op: Option<&'static str>,
}

impl FaultPlan {
    pub fn new(skip: usize, failures: usize, kind: FaultKind) -> Self {
        Self {
            skip,
            failures,
            kind,
            op: None,
        }
    }

    pub fn for_op(mut self, op: &'static str) -> Self {
        self.op = Some(op);
        self
    }
}

/// Point-in-time copy of everything a sync run can touch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSnapshot {
    pub sites: BTreeMap<SiteId, SiteRecord>,
    pub items: BTreeMap<(SiteId, String), ItemRecord>,
    pub workflow: BTreeMap<(SiteId, String), WorkflowEntry>,
    pub dependencies: BTreeSet<DependencyEdge>,
    pub navigation: BTreeMap<Uuid, NavigationOrderSequence>,
    /// Audit rows in insertion order.
    pub audit: Vec<AuditEntry>,
    pub git_log: BTreeMap<(SiteId, CommitId), GitLogEntry>,
    pub publish_requests: Vec<PublishRequest>,
    pub cluster_sync: BTreeMap<(i64, SiteId), ClusterSiteSyncRepo>,
}

#[derive(Debug, Clone)]
struct StoredItem {
    id: i64,
    record: ItemRecord,
}

#[derive(Debug, Clone)]
struct StoredAccessToken {
    user_id: i64,
    token: AccessToken,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    sites: BTreeMap<SiteId, SiteRecord>,
    items: BTreeMap<(SiteId, String), StoredItem>,
    workflow: BTreeMap<(SiteId, String), WorkflowEntry>,
    dependencies: BTreeSet<DependencyEdge>,
    navigation: BTreeMap<Uuid, NavigationOrderSequence>,
    audit: BTreeMap<i64, AuditEntry>,
    audit_params: BTreeMap<i64, Vec<AuditParam>>,
    git_log: BTreeMap<(SiteId, CommitId), GitLogEntry>,
    cluster_members: BTreeMap<i64, ClusterMember>,
    cluster_sync: BTreeMap<(i64, SiteId), ClusterSiteSyncRepo>,
    publish_requests: BTreeMap<i64, PublishRequest>,
    refresh_tokens: BTreeMap<i64, (String, DateTime<Utc>)>,
    access_tokens: BTreeMap<i64, StoredAccessToken>,
    users: BTreeMap<i64, NewUser>,
    user_properties: BTreeMap<(i64, SiteId), UserProperties>,
    groups: BTreeMap<i64, NewGroup>,
    group_members: BTreeSet<(i64, i64)>,
    remotes: BTreeMap<i64, RemoteRepository>,
    fault: Option<FaultPlan>,
    mutations: usize,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_fault(&mut self, op: &'static str) -> StoreResult<()> {
        let Some(mut plan) = self.fault.take() else {
            return Ok(());
        };
        if plan.op.is_some_and(|target| target != op) {
            self.fault = Some(plan);
            return Ok(());
        }
        if plan.skip > 0 {
            plan.skip -= 1;
            self.fault = Some(plan);
            return Ok(());
        }
        if plan.failures > 0 {
            plan.failures -= 1;
            let err = plan.kind.error(op);
            if plan.failures > 0 {
                self.fault = Some(plan);
            }
            return Err(err);
        }
        Ok(())
    }

    fn site_mut(&mut self, site_id: &SiteId) -> Option<&mut SiteRecord> {
        self.sites.get_mut(site_id)
    }

    fn items_at_mut<'a>(
        &'a mut self,
        site_id: &'a SiteId,
        paths: &'a [String],
    ) -> impl Iterator<Item = &'a mut StoredItem> + 'a {
        self.items
            .iter_mut()
            .filter(move |((site, path), _)| site == site_id && paths.contains(path))
            .map(|(_, item)| item)
    }
}

fn in_folder(path: &str, folder: &str) -> bool {
    path == folder
        || path
            .strip_prefix(folder)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    state: Mutex<MemoryState>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a site row directly, bypassing faults and counters.
    pub async fn seed_site(&self, record: SiteRecord) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(record.id);
        state.sites.insert(record.site_id.clone(), record);
    }

    pub async fn inject_fault(&self, plan: FaultPlan) {
        self.state.lock().await.fault = Some(plan);
    }

    pub async fn clear_fault(&self) {
        self.state.lock().await.fault = None;
    }

    /// Number of mutation calls that got past fault injection.
    pub async fn mutation_count(&self) -> usize {
        self.state.lock().await.mutations
    }

    pub async fn snapshot(&self) -> IndexSnapshot {
        let state = self.state.lock().await;
        IndexSnapshot {
            sites: state.sites.clone(),
            items: state
                .items
                .iter()
                .map(|(key, item)| (key.clone(), item.record.clone()))
                .collect(),
            workflow: state.workflow.clone(),
            dependencies: state.dependencies.clone(),
            navigation: state.navigation.clone(),
            audit: state.audit.values().cloned().collect(),
            git_log: state.git_log.clone(),
            publish_requests: state.publish_requests.values().cloned().collect(),
            cluster_sync: state.cluster_sync.clone(),
        }
    }

    async fn mutate(&self, op: &'static str) -> StoreResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.state.lock().await;
        state.check_fault(op)?;
        state.mutations += 1;
        Ok(state)
    }
}

#[async_trait]
impl SiteQueries for MemoryIndexStore {
    async fn get_site(&self, site_id: &SiteId) -> StoreResult<Option<SiteRecord>> {
        Ok(self.state.lock().await.sites.get(site_id).cloned())
    }

    async fn list_sites(&self) -> StoreResult<Vec<SiteRecord>> {
        Ok(self.state.lock().await.sites.values().cloned().collect())
    }
}

#[async_trait]
impl SiteMutations for MemoryIndexStore {
    async fn create_site(&self, site: &NewSite) -> StoreResult<bool> {
        let mut state = self.mutate("create_site").await?;
        if state.sites.contains_key(&site.site_id) {
            return Ok(false);
        }
        let id = state.next_id();
        state.sites.insert(
            site.site_id.clone(),
            SiteRecord {
                id,
                site_id: site.site_id.clone(),
                site_uuid: site.site_uuid.clone(),
                name: site.name.clone(),
                description: site.description.clone(),
                state: SiteState::Creating,
                enabled: true,
                publishing_enabled: true,
                publishing_status: None,
                publishing_lock_owner: None,
                publishing_lock_heartbeat: None,
                last_commit_id: None,
                last_verified_commit_id: None,
                last_synced_commit_id: None,
            },
        );
        Ok(true)
    }

    async fn delete_site(&self, site_id: &SiteId, site_state: SiteState) -> StoreResult<bool> {
        let mut state = self.mutate("delete_site").await?;
        Ok(match state.site_mut(site_id) {
            Some(site) => {
                site.state = site_state;
                true
            }
            None => false,
        })
    }

    async fn update_site(
        &self,
        site_id: &SiteId,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<u64> {
        let mut state = self.mutate("update_site").await?;
        Ok(match state.site_mut(site_id) {
            Some(site) => {
                site.name = name.to_string();
                site.description = description.map(str::to_string);
                1
            }
            None => 0,
        })
    }

    async fn set_site_state(&self, site_id: &SiteId, site_state: SiteState) -> StoreResult<()> {
        let mut state = self.mutate("set_site_state").await?;
        if let Some(site) = state.site_mut(site_id) {
            site.state = site_state;
        }
        Ok(())
    }

    async fn set_site_enabled(&self, site_id: &SiteId, enabled: bool) -> StoreResult<()> {
        let mut state = self.mutate("set_site_enabled").await?;
        if let Some(site) = state.site_mut(site_id) {
            site.enabled = enabled;
        }
        Ok(())
    }

    async fn enable_site_publishing(&self, site_id: &SiteId, enabled: bool) -> StoreResult<()> {
        let mut state = self.mutate("enable_site_publishing").await?;
        if let Some(site) = state.site_mut(site_id) {
            site.publishing_enabled = enabled;
        }
        Ok(())
    }

    async fn update_site_publishing_status(&self, site_id: &SiteId, status: &str) -> StoreResult<()> {
        let mut state = self.mutate("update_site_publishing_status").await?;
        if let Some(site) = state.site_mut(site_id) {
            site.publishing_status = Some(status.to_string());
        }
        Ok(())
    }

    async fn update_site_last_commit_id(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()> {
        let mut state = self.mutate("update_site_last_commit_id").await?;
        if let Some(site) = state.site_mut(site_id) {
            site.last_commit_id = Some(commit_id.clone());
        }
        Ok(())
    }

    async fn compare_and_set_last_verified_commit_id(
        &self,
        site_id: &SiteId,
        expected: Option<&CommitId>,
        next: &CommitId,
    ) -> StoreResult<u64> {
        let mut state = self.mutate("compare_and_set_last_verified_commit_id").await?;
        Ok(match state.site_mut(site_id) {
            Some(site) if site.last_verified_commit_id.as_ref() == expected => {
                site.last_verified_commit_id = Some(next.clone());
                1
            }
            _ => 0,
        })
    }

    async fn update_site_last_synced_commit_id(
        &self,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()> {
        let mut state = self.mutate("update_site_last_synced_commit_id").await?;
        if let Some(site) = state.site_mut(site_id) {
            site.last_synced_commit_id = Some(commit_id.clone());
        }
        Ok(())
    }

    async fn lock_publishing_for_site(
        &self,
        site_id: &SiteId,
        owner: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut state = self.mutate("lock_publishing_for_site").await?;
        let now = Utc::now();
        let Some(site) = state.site_mut(site_id) else {
            return Ok(false);
        };
        let free = match (&site.publishing_lock_owner, site.publishing_lock_heartbeat) {
            (None, _) => true,
            (Some(current), _) if current == owner => true,
            (Some(_), Some(heartbeat)) => heartbeat < now - ttl,
            (Some(_), None) => true,
        };
        if free {
            site.publishing_lock_owner = Some(owner.to_string());
            site.publishing_lock_heartbeat = Some(now);
        }
        Ok(free)
    }

    async fn unlock_publishing_for_site(&self, site_id: &SiteId, owner: &str) -> StoreResult<()> {
        let mut state = self.mutate("unlock_publishing_for_site").await?;
        if let Some(site) = state.site_mut(site_id) {
            if site.publishing_lock_owner.as_deref() == Some(owner) {
                site.publishing_lock_owner = None;
                site.publishing_lock_heartbeat = None;
            }
        }
        Ok(())
    }

    async fn update_publishing_lock_heartbeat(&self, site_id: &SiteId, owner: &str) -> StoreResult<()> {
        let mut state = self.mutate("update_publishing_lock_heartbeat").await?;
        if let Some(site) = state.site_mut(site_id) {
            if site.publishing_lock_owner.as_deref() == Some(owner) {
                site.publishing_lock_heartbeat = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn clear_publishing_lock_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        let mut state = self.mutate("clear_publishing_lock_for_site").await?;
        if let Some(site) = state.site_mut(site_id) {
            site.publishing_lock_owner = None;
            site.publishing_lock_heartbeat = None;
        }
        Ok(())
    }
}

#[async_trait]
impl ItemMutations for MemoryIndexStore {
    async fn upsert_entry(&self, item: &ItemRecord) -> StoreResult<()> {
        let mut state = self.mutate("upsert_entry").await?;
        let key = (item.site_id.clone(), item.path.clone());
        if let Some(existing) = state.items.get_mut(&key) {
            let record = &mut existing.record;
            record.preview_url = item.preview_url.clone();
            record.system_type = item.system_type.clone();
            record.label = item.label.clone();
            record.last_modified_by = item.last_modified_by.clone();
            record.last_modified_on = item.last_modified_on;
            record.commit_id = item.commit_id.clone();
        } else {
            let id = state.next_id();
            state.items.insert(
                key,
                StoredItem {
                    id,
                    record: item.clone(),
                },
            );
        }
        Ok(())
    }

    async fn update_item(&self, item: &ItemRecord) -> StoreResult<u64> {
        let mut state = self.mutate("update_item").await?;
        let key = (item.site_id.clone(), item.path.clone());
        Ok(match state.items.get_mut(&key) {
            Some(existing) => {
                existing.record = item.clone();
                1
            }
            None => 0,
        })
    }

    async fn delete_by_id(&self, item_id: i64) -> StoreResult<()> {
        let mut state = self.mutate("delete_by_id").await?;
        state.items.retain(|_, item| item.id != item_id);
        Ok(())
    }

    async fn delete_by_site_and_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        let mut state = self.mutate("delete_by_site_and_path").await?;
        state.items.remove(&(site_id.clone(), path.to_string()));
        Ok(())
    }

    async fn delete_by_site_and_path_for_folder(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        let mut state = self.mutate("delete_by_site_and_path_for_folder").await?;
        state
            .items
            .retain(|(site, item_path), _| !(site == site_id && in_folder(item_path, path)));
        Ok(())
    }

    async fn delete_items_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        let mut state = self.mutate("delete_items_for_site").await?;
        state.items.retain(|(site, _), _| site != site_id);
        Ok(())
    }

    async fn delete_items_for_site_and_paths(&self, site_id: &SiteId, paths: &[String]) -> StoreResult<()> {
        let mut state = self.mutate("delete_items_for_site_and_paths").await?;
        state
            .items
            .retain(|(site, path), _| !(site == site_id && paths.contains(path)));
        Ok(())
    }

    async fn set_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        states: ItemStates,
    ) -> StoreResult<()> {
        let mut state = self.mutate("set_states_by_site_and_path_bulk").await?;
        for item in state.items_at_mut(site_id, paths) {
            item.record.states = states;
        }
        Ok(())
    }

    async fn reset_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        states: ItemStates,
    ) -> StoreResult<()> {
        let mut state = self.mutate("reset_states_by_site_and_path_bulk").await?;
        for item in state.items_at_mut(site_id, paths) {
            item.record.states = item.record.states.apply(ItemStates::NONE, states);
        }
        Ok(())
    }

    async fn update_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        on: ItemStates,
        off: ItemStates,
    ) -> StoreResult<()> {
        let mut state = self.mutate("update_states_by_site_and_path_bulk").await?;
        for item in state.items_at_mut(site_id, paths) {
            item.record.states = item.record.states.apply(on, off);
        }
        Ok(())
    }

    async fn update_states_by_id_bulk(
        &self,
        item_ids: &[i64],
        on: ItemStates,
        off: ItemStates,
    ) -> StoreResult<()> {
        let mut state = self.mutate("update_states_by_id_bulk").await?;
        for item in state.items.values_mut().filter(|item| item_ids.contains(&item.id)) {
            item.record.states = item.record.states.apply(on, off);
        }
        Ok(())
    }

    async fn move_item(&self, site_id: &SiteId, old_path: &str, new_path: &str) -> StoreResult<()> {
        let mut state = self.mutate("move_item").await?;
        if old_path == new_path {
            return Ok(());
        }
        if let Some(mut item) = state.items.remove(&(site_id.clone(), old_path.to_string())) {
            item.record.path = new_path.to_string();
            item.record.preview_url = item_preview_url(new_path);
            item.record.system_type = item_system_type(new_path).to_string();
            item.record.label = item_label(new_path);
            item.record.previous_path = Some(old_path.to_string());
            state
                .items
                .insert((site_id.clone(), new_path.to_string()), item);
        }
        Ok(())
    }

    async fn move_items(&self, params: &MoveItems) -> StoreResult<()> {
        let mut state = self.mutate("move_items").await?;
        let moving: Vec<(SiteId, String)> = state
            .items
            .keys()
            .filter(|(site, path)| site == &params.site_id && in_folder(path, &params.old_path))
            .cloned()
            .collect();
        for key in moving {
            let Some(mut item) = state.items.remove(&key) else {
                continue;
            };
            let rest = &key.1[params.old_path.len()..];
            let new_path = format!("{}{}", params.new_path, rest);
            if let (Some(old_url), Some(new_url), Some(url)) = (
                params.old_preview_url.as_deref(),
                params.new_preview_url.as_deref(),
                item.record.preview_url.as_deref(),
            ) {
                if let Some(tail) = url.strip_prefix(old_url) {
                    item.record.preview_url = Some(format!("{new_url}{tail}"));
                }
            }
            item.record.previous_path = Some(key.1.clone());
            item.record.path = new_path.clone();
            item.record.states = item.record.states.apply(params.on_states, params.off_states);
            state.items.insert((key.0, new_path), item);
        }
        Ok(())
    }

    async fn clear_previous_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        let mut state = self.mutate("clear_previous_path").await?;
        if let Some(item) = state.items.get_mut(&(site_id.clone(), path.to_string())) {
            item.record.previous_path = None;
        }
        Ok(())
    }

    async fn update_commit_id(&self, site_id: &SiteId, path: &str, commit_id: &CommitId) -> StoreResult<()> {
        let mut state = self.mutate("update_commit_id").await?;
        if let Some(item) = state.items.get_mut(&(site_id.clone(), path.to_string())) {
            item.record.commit_id = Some(commit_id.clone());
        }
        Ok(())
    }

    async fn update_last_published_on_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        published_on: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.mutate("update_last_published_on_bulk").await?;
        for item in state.items_at_mut(site_id, paths) {
            item.record.last_published_on = Some(published_on);
        }
        Ok(())
    }

    async fn lock_item_by_path(&self, site_id: &SiteId, path: &str, owner: &str) -> StoreResult<()> {
        let mut state = self.mutate("lock_item_by_path").await?;
        if let Some(item) = state.items.get_mut(&(site_id.clone(), path.to_string())) {
            item.record.locked_by = Some(owner.to_string());
            item.record.states = item.record.states.apply(ItemStates::USER_LOCKED, ItemStates::NONE);
        }
        Ok(())
    }

    async fn unlock_item_by_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        let mut state = self.mutate("unlock_item_by_path").await?;
        if let Some(item) = state.items.get_mut(&(site_id.clone(), path.to_string())) {
            item.record.locked_by = None;
            item.record.states = item.record.states.apply(ItemStates::NONE, ItemStates::USER_LOCKED);
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowMutations for MemoryIndexStore {
    async fn insert_workflow_entry(&self, entry: &WorkflowEntry) -> StoreResult<()> {
        let mut state = self.mutate("insert_workflow_entry").await?;
        let key = (entry.site_id.clone(), entry.path.clone());
        if state.workflow.contains_key(&key) {
            return Err(StoreError::permanent(format!(
                "workflow entry already exists for {}:{}",
                entry.site_id, entry.path
            )));
        }
        state.workflow.insert(key, entry.clone());
        Ok(())
    }

    async fn update_workflow_entry(&self, entry: &WorkflowEntry) -> StoreResult<()> {
        let mut state = self.mutate("update_workflow_entry").await?;
        if let Some(existing) = state
            .workflow
            .get_mut(&(entry.site_id.clone(), entry.path.clone()))
        {
            *existing = entry.clone();
        }
        Ok(())
    }

    async fn delete_workflow_entry(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        let mut state = self.mutate("delete_workflow_entry").await?;
        state.workflow.remove(&(site_id.clone(), path.to_string()));
        Ok(())
    }

    async fn delete_workflow_entries(&self, site_id: &SiteId, paths: &[String]) -> StoreResult<()> {
        let mut state = self.mutate("delete_workflow_entries").await?;
        state
            .workflow
            .retain(|(site, path), _| !(site == site_id && paths.contains(path)));
        Ok(())
    }

    async fn delete_workflow_entries_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        let mut state = self.mutate("delete_workflow_entries_for_site").await?;
        state.workflow.retain(|(site, _), _| site != site_id);
        Ok(())
    }
}

#[async_trait]
impl DependencyMutations for MemoryIndexStore {
    async fn insert_dependencies(&self, edges: &[DependencyEdge]) -> StoreResult<()> {
        let mut state = self.mutate("insert_dependencies").await?;
        state.dependencies.extend(edges.iter().cloned());
        Ok(())
    }

    async fn delete_all_source_dependencies(&self, site_id: &SiteId, source_path: &str) -> StoreResult<()> {
        let mut state = self.mutate("delete_all_source_dependencies").await?;
        state
            .dependencies
            .retain(|edge| !(&edge.site_id == site_id && edge.source_path == source_path));
        Ok(())
    }

    async fn delete_dependencies_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        let mut state = self.mutate("delete_dependencies_for_site").await?;
        state.dependencies.retain(|edge| &edge.site_id != site_id);
        Ok(())
    }

    async fn delete_dependencies_for_site_and_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        let mut state = self.mutate("delete_dependencies_for_site_and_path").await?;
        state.dependencies.retain(|edge| {
            !(&edge.site_id == site_id && (edge.source_path == path || edge.target_path == path))
        });
        Ok(())
    }

    async fn move_dependency(&self, site_id: &SiteId, old_path: &str, new_path: &str) -> StoreResult<()> {
        let mut state = self.mutate("move_dependency").await?;
        let edges = std::mem::take(&mut state.dependencies);
        state.dependencies = edges
            .into_iter()
            .map(|mut edge| {
                if &edge.site_id == site_id {
                    if edge.source_path == old_path {
                        edge.source_path = new_path.to_string();
                    }
                    if edge.target_path == old_path {
                        edge.target_path = new_path.to_string();
                    }
                }
                edge
            })
            .collect();
        Ok(())
    }
}

#[async_trait]
impl NavigationMutations for MemoryIndexStore {
    async fn insert_navigation_order_sequence(&self, sequence: &NavigationOrderSequence) -> StoreResult<()> {
        let mut state = self.mutate("insert_navigation_order_sequence").await?;
        state
            .navigation
            .entry(sequence.folder_id)
            .or_insert_with(|| sequence.clone());
        Ok(())
    }

    async fn update_navigation_order_sequence(&self, sequence: &NavigationOrderSequence) -> StoreResult<()> {
        let mut state = self.mutate("update_navigation_order_sequence").await?;
        if let Some(existing) = state.navigation.get_mut(&sequence.folder_id) {
            *existing = sequence.clone();
        }
        Ok(())
    }

    async fn delete_navigation_order_sequences_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        let mut state = self.mutate("delete_navigation_order_sequences_for_site").await?;
        state.navigation.retain(|_, sequence| &sequence.site_id != site_id);
        Ok(())
    }
}

#[async_trait]
impl AuditMutations for MemoryIndexStore {
    async fn insert_audit_log(&self, entry: &AuditEntry) -> StoreResult<i64> {
        let mut state = self.mutate("insert_audit_log").await?;
        if entry.commit_id.is_some() {
            let existing = state.audit.iter().find(|(_, row)| {
                row.site_id == entry.site_id
                    && row.commit_id == entry.commit_id
                    && row.target_path == entry.target_path
                    && row.operation == entry.operation
            });
            if let Some((id, _)) = existing {
                return Ok(*id);
            }
        }
        let id = state.next_id();
        state.audit.insert(id, entry.clone());
        Ok(id)
    }

    async fn insert_audit_log_params(&self, audit_id: i64, params: &[AuditParam]) -> StoreResult<()> {
        let mut state = self.mutate("insert_audit_log_params").await?;
        if !state.audit.contains_key(&audit_id) {
            return Err(StoreError::permanent(format!("audit row {audit_id} does not exist")));
        }
        state
            .audit_params
            .entry(audit_id)
            .or_default()
            .extend(params.iter().cloned());
        Ok(())
    }

    async fn delete_audit_log_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        let mut state = self.mutate("delete_audit_log_for_site").await?;
        let removed: Vec<i64> = state
            .audit
            .iter()
            .filter(|(_, row)| &row.site_id == site_id)
            .map(|(id, _)| *id)
            .collect();
        for id in removed {
            state.audit.remove(&id);
            state.audit_params.remove(&id);
        }
        Ok(())
    }
}

#[async_trait]
impl GitLogMutations for MemoryIndexStore {
    async fn insert_git_log(
        &self,
        site_id: &SiteId,
        commit_id: &CommitId,
        processed: bool,
        audited: bool,
    ) -> StoreResult<()> {
        let mut state = self.mutate("insert_git_log").await?;
        state
            .git_log
            .entry((site_id.clone(), commit_id.clone()))
            .or_insert_with(|| GitLogEntry {
                site_id: site_id.clone(),
                commit_id: commit_id.clone(),
                processed,
                audited,
            });
        Ok(())
    }

    async fn upsert_git_log_list(
        &self,
        site_id: &SiteId,
        commit_ids: &[CommitId],
        processed: bool,
        audited: bool,
    ) -> StoreResult<()> {
        let mut state = self.mutate("upsert_git_log_list").await?;
        for commit_id in commit_ids {
            state.git_log.insert(
                (site_id.clone(), commit_id.clone()),
                GitLogEntry {
                    site_id: site_id.clone(),
                    commit_id: commit_id.clone(),
                    processed,
                    audited,
                },
            );
        }
        Ok(())
    }

    async fn mark_git_log_processed(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()> {
        let mut state = self.mutate("mark_git_log_processed").await?;
        if let Some(entry) = state.git_log.get_mut(&(site_id.clone(), commit_id.clone())) {
            entry.processed = true;
        }
        Ok(())
    }

    async fn mark_git_log_processed_bulk(&self, site_id: &SiteId, commit_ids: &[CommitId]) -> StoreResult<()> {
        let mut state = self.mutate("mark_git_log_processed_bulk").await?;
        for commit_id in commit_ids {
            if let Some(entry) = state.git_log.get_mut(&(site_id.clone(), commit_id.clone())) {
                entry.processed = true;
            }
        }
        Ok(())
    }

    async fn mark_git_log_audited(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()> {
        let mut state = self.mutate("mark_git_log_audited").await?;
        if let Some(entry) = state.git_log.get_mut(&(site_id.clone(), commit_id.clone())) {
            entry.audited = true;
        }
        Ok(())
    }

    async fn delete_git_log_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        let mut state = self.mutate("delete_git_log_for_site").await?;
        state.git_log.retain(|(site, _), _| site != site_id);
        Ok(())
    }
}

#[async_trait]
impl ClusterMutations for MemoryIndexStore {
    async fn add_cluster_member(&self, member: &ClusterMember) -> StoreResult<i64> {
        let mut state = self.mutate("add_cluster_member").await?;
        let id = state.next_id();
        let mut stored = member.clone();
        stored.id = id;
        state.cluster_members.insert(id, stored);
        Ok(id)
    }

    async fn update_cluster_member(&self, member: &ClusterMember) -> StoreResult<u64> {
        let mut state = self.mutate("update_cluster_member").await?;
        Ok(match state.cluster_members.get_mut(&member.id) {
            Some(existing) => {
                *existing = member.clone();
                1
            }
            None => 0,
        })
    }

    async fn remove_cluster_members(&self, member_ids: &[i64]) -> StoreResult<u64> {
        let mut state = self.mutate("remove_cluster_members").await?;
        let before = state.cluster_members.len();
        state.cluster_members.retain(|id, _| !member_ids.contains(id));
        state.cluster_sync.retain(|(node, _), _| !member_ids.contains(node));
        Ok((before - state.cluster_members.len()) as u64)
    }

    async fn update_cluster_node_heartbeat(&self, local_address: &str) -> StoreResult<u64> {
        let mut state = self.mutate("update_cluster_node_heartbeat").await?;
        let now = Utc::now();
        let mut touched = 0;
        for member in state
            .cluster_members
            .values_mut()
            .filter(|member| member.local_address == local_address)
        {
            member.heartbeat = Some(now);
            touched += 1;
        }
        Ok(touched)
    }

    async fn insert_cluster_site_sync_repo(&self, repo: &ClusterSiteSyncRepo) -> StoreResult<()> {
        let mut state = self.mutate("insert_cluster_site_sync_repo").await?;
        state
            .cluster_sync
            .entry((repo.cluster_node_id, repo.site_id.clone()))
            .or_insert_with(|| repo.clone());
        Ok(())
    }

    async fn update_cluster_node_last_verified_commit_id(
        &self,
        cluster_node_id: i64,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()> {
        let mut state = self.mutate("update_cluster_node_last_verified_commit_id").await?;
        state
            .cluster_sync
            .entry((cluster_node_id, site_id.clone()))
            .or_insert_with(|| empty_sync_repo(cluster_node_id, site_id))
            .node_last_verified_commit_id = Some(commit_id.clone());
        Ok(())
    }

    async fn update_cluster_node_last_synced_commit_id(
        &self,
        cluster_node_id: i64,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()> {
        let mut state = self.mutate("update_cluster_node_last_synced_commit_id").await?;
        state
            .cluster_sync
            .entry((cluster_node_id, site_id.clone()))
            .or_insert_with(|| empty_sync_repo(cluster_node_id, site_id))
            .node_last_synced_commit_id = Some(commit_id.clone());
        Ok(())
    }
}

fn empty_sync_repo(cluster_node_id: i64, site_id: &SiteId) -> ClusterSiteSyncRepo {
    ClusterSiteSyncRepo {
        cluster_node_id,
        site_id: site_id.clone(),
        node_last_commit_id: None,
        node_last_verified_commit_id: None,
        node_last_synced_commit_id: None,
    }
}

#[async_trait]
impl PublishRequestMutations for MemoryIndexStore {
    async fn insert_item_for_deployment(&self, request: &PublishRequest) -> StoreResult<i64> {
        let mut state = self.mutate("insert_item_for_deployment").await?;
        let id = state.next_id();
        let mut stored = request.clone();
        stored.id = id;
        state.publish_requests.insert(id, stored);
        Ok(id)
    }

    async fn cancel_workflow(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        let mut state = self.mutate("cancel_workflow").await?;
        for request in state.publish_requests.values_mut().filter(|request| {
            &request.site_id == site_id
                && request.path == path
                && request.state == PublishRequestState::ReadyForLive
        }) {
            request.state = PublishRequestState::Cancelled;
        }
        Ok(())
    }

    async fn cancel_packages(&self, site_id: &SiteId, package_ids: &[String]) -> StoreResult<()> {
        let mut state = self.mutate("cancel_packages").await?;
        for request in state.publish_requests.values_mut().filter(|request| {
            &request.site_id == site_id
                && package_ids.contains(&request.package_id)
                && request.state == PublishRequestState::ReadyForLive
        }) {
            request.state = PublishRequestState::Cancelled;
        }
        Ok(())
    }

    async fn update_item_deployment_state(
        &self,
        request_id: i64,
        new_state: PublishRequestState,
    ) -> StoreResult<()> {
        let mut state = self.mutate("update_item_deployment_state").await?;
        if let Some(request) = state.publish_requests.get_mut(&request_id) {
            request.state = new_state;
        }
        Ok(())
    }

    async fn mark_publish_request_completed(
        &self,
        request_id: i64,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.mutate("mark_publish_request_completed").await?;
        if let Some(request) = state.publish_requests.get_mut(&request_id) {
            request.state = PublishRequestState::Completed;
            request.completed_date = Some(completed_at);
        }
        Ok(())
    }

    async fn reset_publish_request_processing_queue(
        &self,
        site_id: &SiteId,
        from: PublishRequestState,
        to: PublishRequestState,
    ) -> StoreResult<()> {
        let mut state = self.mutate("reset_publish_request_processing_queue").await?;
        for request in state
            .publish_requests
            .values_mut()
            .filter(|request| &request.site_id == site_id && request.state == from)
        {
            request.state = to;
        }
        Ok(())
    }

    async fn delete_deployment_data_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        let mut state = self.mutate("delete_deployment_data_for_site").await?;
        state
            .publish_requests
            .retain(|_, request| &request.site_id != site_id);
        Ok(())
    }
}

#[async_trait]
impl SecurityMutations for MemoryIndexStore {
    async fn upsert_refresh_token(&self, user_id: i64, token: &str) -> StoreResult<()> {
        let mut state = self.mutate("upsert_refresh_token").await?;
        state
            .refresh_tokens
            .insert(user_id, (token.to_string(), Utc::now()));
        Ok(())
    }

    async fn delete_refresh_token(&self, user_id: i64) -> StoreResult<()> {
        let mut state = self.mutate("delete_refresh_token").await?;
        state.refresh_tokens.remove(&user_id);
        Ok(())
    }

    async fn create_access_token(&self, user_id: i64, token: &AccessToken) -> StoreResult<i64> {
        let mut state = self.mutate("create_access_token").await?;
        let id = state.next_id();
        let mut stored = token.clone();
        stored.id = id;
        state.access_tokens.insert(
            id,
            StoredAccessToken {
                user_id,
                token: stored,
            },
        );
        Ok(id)
    }

    async fn update_access_token(&self, user_id: i64, token_id: i64, enabled: bool) -> StoreResult<()> {
        let mut state = self.mutate("update_access_token").await?;
        if let Some(stored) = state.access_tokens.get_mut(&token_id) {
            if stored.user_id == user_id {
                stored.token.enabled = enabled;
            }
        }
        Ok(())
    }

    async fn delete_access_token(&self, user_id: i64, token_id: i64) -> StoreResult<()> {
        let mut state = self.mutate("delete_access_token").await?;
        state
            .access_tokens
            .retain(|id, stored| !(*id == token_id && stored.user_id == user_id));
        Ok(())
    }

    async fn delete_expired_tokens(&self, max_age: Duration) -> StoreResult<u64> {
        let mut state = self.mutate("delete_expired_tokens").await?;
        let now = Utc::now();
        let cutoff = now - max_age;
        let before = state.refresh_tokens.len() + state.access_tokens.len();
        state.refresh_tokens.retain(|_, (_, issued)| *issued >= cutoff);
        state
            .access_tokens
            .retain(|_, stored| stored.token.expires_at.map_or(true, |at| at > now));
        let after = state.refresh_tokens.len() + state.access_tokens.len();
        Ok((before - after) as u64)
    }
}

#[async_trait]
impl UserMutations for MemoryIndexStore {
    async fn create_user(&self, user: &NewUser) -> StoreResult<i64> {
        let mut state = self.mutate("create_user").await?;
        if state.users.values().any(|existing| existing.username == user.username) {
            return Err(StoreError::permanent(format!(
                "username {} already exists",
                user.username
            )));
        }
        let id = state.next_id();
        state.users.insert(id, user.clone());
        Ok(id)
    }

    async fn update_user(&self, user: &UserUpdate) -> StoreResult<u64> {
        let mut state = self.mutate("update_user").await?;
        Ok(match state.users.get_mut(&user.id) {
            Some(existing) => {
                existing.first_name = user.first_name.clone();
                existing.last_name = user.last_name.clone();
                existing.email = user.email.clone();
                1
            }
            None => 0,
        })
    }

    async fn delete_users(&self, user_ids: &[i64]) -> StoreResult<u64> {
        let mut state = self.mutate("delete_users").await?;
        let before = state.users.len();
        state.users.retain(|id, _| !user_ids.contains(id));
        state
            .group_members
            .retain(|(_, user)| !user_ids.contains(user));
        state
            .user_properties
            .retain(|(user, _), _| !user_ids.contains(user));
        Ok((before - state.users.len()) as u64)
    }

    async fn enable_users(&self, user_ids: &[i64], enabled: bool) -> StoreResult<u64> {
        let mut state = self.mutate("enable_users").await?;
        let mut touched = 0;
        for (_, user) in state
            .users
            .iter_mut()
            .filter(|(id, _)| user_ids.contains(id))
        {
            user.enabled = enabled;
            touched += 1;
        }
        Ok(touched)
    }

    async fn set_user_password(&self, username: &str, password_hash: &str) -> StoreResult<u64> {
        let mut state = self.mutate("set_user_password").await?;
        let mut touched = 0;
        for user in state
            .users
            .values_mut()
            .filter(|user| user.username == username)
        {
            user.password_hash = Some(password_hash.to_string());
            touched += 1;
        }
        Ok(touched)
    }

    async fn update_user_properties(
        &self,
        user_id: i64,
        site_id: &SiteId,
        properties: &UserProperties,
    ) -> StoreResult<()> {
        let mut state = self.mutate("update_user_properties").await?;
        state
            .user_properties
            .entry((user_id, site_id.clone()))
            .or_default()
            .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn delete_user_properties(&self, user_id: i64, site_id: &SiteId, keys: &[String]) -> StoreResult<()> {
        let mut state = self.mutate("delete_user_properties").await?;
        if let Some(properties) = state.user_properties.get_mut(&(user_id, site_id.clone())) {
            properties.retain(|key, _| !keys.contains(key));
        }
        Ok(())
    }
}

#[async_trait]
impl GroupMutations for MemoryIndexStore {
    async fn create_group(&self, group: &NewGroup) -> StoreResult<i64> {
        let mut state = self.mutate("create_group").await?;
        if state
            .groups
            .values()
            .any(|existing| existing.org_id == group.org_id && existing.name == group.name)
        {
            return Err(StoreError::permanent(format!("group {} already exists", group.name)));
        }
        let id = state.next_id();
        state.groups.insert(id, group.clone());
        Ok(id)
    }

    async fn update_group(&self, group: &GroupUpdate) -> StoreResult<u64> {
        let mut state = self.mutate("update_group").await?;
        Ok(match state.groups.get_mut(&group.id) {
            Some(existing) => {
                existing.name = group.name.clone();
                existing.description = group.description.clone();
                1
            }
            None => 0,
        })
    }

    async fn delete_groups(&self, group_ids: &[i64]) -> StoreResult<u64> {
        let mut state = self.mutate("delete_groups").await?;
        let before = state.groups.len();
        state.groups.retain(|id, _| !group_ids.contains(id));
        state
            .group_members
            .retain(|(group, _)| !group_ids.contains(group));
        Ok((before - state.groups.len()) as u64)
    }

    async fn add_group_members(&self, group_id: i64, user_ids: &[i64]) -> StoreResult<u64> {
        let mut state = self.mutate("add_group_members").await?;
        if !state.groups.contains_key(&group_id) {
            return Err(StoreError::permanent(format!("group {group_id} does not exist")));
        }
        let mut added = 0;
        for user_id in user_ids {
            if state.group_members.insert((group_id, *user_id)) {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn remove_group_members(&self, group_id: i64, user_ids: &[i64]) -> StoreResult<u64> {
        let mut state = self.mutate("remove_group_members").await?;
        let mut removed = 0;
        for user_id in user_ids {
            if state.group_members.remove(&(group_id, *user_id)) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl RemoteRepositoryMutations for MemoryIndexStore {
    async fn insert_remote_repository(&self, remote: &RemoteRepository) -> StoreResult<i64> {
        let mut state = self.mutate("insert_remote_repository").await?;
        if state.remotes.values().any(|existing| {
            existing.site_id == remote.site_id && existing.remote_name == remote.remote_name
        }) {
            return Err(StoreError::permanent(format!(
                "remote {} already exists for {}",
                remote.remote_name, remote.site_id
            )));
        }
        let id = state.next_id();
        state.remotes.insert(id, remote.clone());
        Ok(id)
    }

    async fn delete_remote_repository(&self, site_id: &SiteId, remote_name: &str) -> StoreResult<u64> {
        let mut state = self.mutate("delete_remote_repository").await?;
        let before = state.remotes.len();
        state.remotes.retain(|_, remote| {
            !(&remote.site_id == site_id && remote.remote_name == remote_name)
        });
        Ok((before - state.remotes.len()) as u64)
    }

    async fn delete_remote_repositories_for_site(&self, site_id: &SiteId) -> StoreResult<u64> {
        let mut state = self.mutate("delete_remote_repositories_for_site").await?;
        let before = state.remotes.len();
        state.remotes.retain(|_, remote| &remote.site_id != site_id);
        Ok((before - state.remotes.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn site(site_id: &str) -> SiteRecord {
        SiteRecord {
            id: 1,
            site_id: SiteId::new(site_id),
            site_uuid: "7b1d3c3e-0000-4000-8000-000000000001".into(),
            name: site_id.into(),
            description: None,
            state: SiteState::Ready,
            enabled: true,
            publishing_enabled: true,
            publishing_status: None,
            publishing_lock_owner: None,
            publishing_lock_heartbeat: None,
            last_commit_id: None,
            last_verified_commit_id: Some(CommitId::new("c0")),
            last_synced_commit_id: None,
        }
    }

    fn item(site_id: &SiteId, path: &str) -> ItemRecord {
        ItemRecord {
            site_id: site_id.clone(),
            path: path.into(),
            preview_url: item_preview_url(path),
            states: ItemStates::NONE,
            system_type: item_system_type(path).into(),
            label: item_label(path),
            locked_by: None,
            last_modified_by: "jane".into(),
            last_modified_on: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap(),
            last_published_on: None,
            commit_id: Some(CommitId::new("c1")),
            previous_path: None,
        }
    }

    #[tokio::test]
    async fn watermark_compare_and_set_rejects_stale_expectation() {
        let store = MemoryIndexStore::new();
        store.seed_site(site("blog")).await;
        let blog = SiteId::new("blog");

        let stale = store
            .compare_and_set_last_verified_commit_id(&blog, None, &CommitId::new("c1"))
            .await
            .unwrap();
        assert_eq!(stale, 0);

        let applied = store
            .compare_and_set_last_verified_commit_id(&blog, Some(&CommitId::new("c0")), &CommitId::new("c1"))
            .await
            .unwrap();
        assert_eq!(applied, 1);
        let record = store.get_site(&blog).await.unwrap().unwrap();
        assert_eq!(record.last_verified_commit_id, Some(CommitId::new("c1")));
    }

    #[tokio::test]
    async fn upsert_keeps_state_bits_of_existing_rows() {
        let store = MemoryIndexStore::new();
        let blog = SiteId::new("blog");
        let path = "/site/website/about/index.xml";
        store.upsert_entry(&item(&blog, path)).await.unwrap();
        store
            .update_states_by_site_and_path_bulk(&blog, &[path.to_string()], ItemStates::NEW, ItemStates::NONE)
            .await
            .unwrap();

        let mut refreshed = item(&blog, path);
        refreshed.commit_id = Some(CommitId::new("c2"));
        store.upsert_entry(&refreshed).await.unwrap();

        let snapshot = store.snapshot().await;
        let row = &snapshot.items[&(blog, path.to_string())];
        assert!(row.states.contains(ItemStates::NEW));
        assert_eq!(row.commit_id, Some(CommitId::new("c2")));
    }

    #[tokio::test]
    async fn folder_move_rewrites_paths_and_preview_urls() {
        let store = MemoryIndexStore::new();
        let blog = SiteId::new("blog");
        store.upsert_entry(&item(&blog, "/site/website/news/index.xml")).await.unwrap();
        store
            .upsert_entry(&item(&blog, "/site/website/news/2026/index.xml"))
            .await
            .unwrap();
        store
            .upsert_entry(&item(&blog, "/site/website/newsletter/index.xml"))
            .await
            .unwrap();

        store
            .move_items(&MoveItems {
                site_id: blog.clone(),
                old_path: "/site/website/news".into(),
                new_path: "/site/website/press".into(),
                old_preview_url: Some("/news".into()),
                new_preview_url: Some("/press".into()),
                on_states: ItemStates::MODIFIED,
                off_states: ItemStates::NONE,
            })
            .await
            .unwrap();

        let snapshot = store.snapshot().await;
        let moved = &snapshot.items[&(blog.clone(), "/site/website/press/2026/index.xml".to_string())];
        assert_eq!(moved.preview_url.as_deref(), Some("/press/2026"));
        assert!(moved.states.contains(ItemStates::MODIFIED));
        assert!(snapshot
            .items
            .contains_key(&(blog.clone(), "/site/website/newsletter/index.xml".to_string())));
        assert!(!snapshot
            .items
            .contains_key(&(blog, "/site/website/news/index.xml".to_string())));
    }

    #[tokio::test]
    async fn dependency_moves_rewrite_both_ends() {
        let store = MemoryIndexStore::new();
        let blog = SiteId::new("blog");
        store
            .insert_dependencies(&[
                DependencyEdge::new(&blog, "/site/website/index.xml", "/site/components/a.xml"),
                DependencyEdge::new(&blog, "/site/components/a.xml", "/static-assets/a.png"),
            ])
            .await
            .unwrap();
        store
            .move_dependency(&blog, "/site/components/a.xml", "/site/components/b.xml")
            .await
            .unwrap();

        let snapshot = store.snapshot().await;
        assert!(snapshot.dependencies.iter().all(|edge| {
            edge.source_path != "/site/components/a.xml" && edge.target_path != "/site/components/a.xml"
        }));
        assert_eq!(snapshot.dependencies.len(), 2);
    }

    #[tokio::test]
    async fn audit_rows_with_commit_ids_are_not_duplicated() {
        let store = MemoryIndexStore::new();
        let entry = AuditEntry {
            site_id: SiteId::new("blog"),
            operation: siteindex_core::AuditOperation::Create,
            actor: "jane".into(),
            target_path: "/site/website/index.xml".into(),
            target_type: "page".into(),
            origin: siteindex_core::AUDIT_ORIGIN_GIT.into(),
            commit_id: Some(CommitId::new("c1")),
            performed_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap(),
        };
        let first = store.insert_audit_log(&entry).await.unwrap();
        let second = store.insert_audit_log(&entry).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.snapshot().await.audit.len(), 1);
    }

    #[tokio::test]
    async fn publishing_lock_is_exclusive_until_released() {
        let store = MemoryIndexStore::new();
        store.seed_site(site("blog")).await;
        let blog = SiteId::new("blog");
        let ttl = Duration::minutes(5);

        assert!(store.lock_publishing_for_site(&blog, "node-a", ttl).await.unwrap());
        assert!(!store.lock_publishing_for_site(&blog, "node-b", ttl).await.unwrap());
        store.unlock_publishing_for_site(&blog, "node-a").await.unwrap();
        assert!(store.lock_publishing_for_site(&blog, "node-b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn stale_publishing_lock_can_be_taken_over() {
        let store = MemoryIndexStore::new();
        let mut record = site("blog");
        record.publishing_lock_owner = Some("node-a".into());
        record.publishing_lock_heartbeat = Some(Utc::now() - Duration::minutes(10));
        store.seed_site(record).await;
        let blog = SiteId::new("blog");

        assert!(!store
            .lock_publishing_for_site(&blog, "node-b", Duration::minutes(30))
            .await
            .unwrap());
        assert!(store
            .lock_publishing_for_site(&blog, "node-b", Duration::minutes(5))
            .await
            .unwrap());
        let row = store.snapshot().await.sites[&blog].clone();
        assert_eq!(row.publishing_lock_owner.as_deref(), Some("node-b"));
        assert!(!store
            .lock_publishing_for_site(&blog, "node-a", Duration::minutes(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn targeted_faults_only_count_matching_operations() {
        let store = MemoryIndexStore::new();
        let blog = SiteId::new("blog");
        store
            .inject_fault(FaultPlan::new(1, 1, FaultKind::Transient).for_op("mark_git_log_processed"))
            .await;

        store.insert_git_log(&blog, &CommitId::new("c1"), false, false).await.unwrap();
        store.mark_git_log_processed(&blog, &CommitId::new("c1")).await.unwrap();
        let err = store
            .mark_git_log_processed(&blog, &CommitId::new("c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transient(_)));
        store.mark_git_log_processed(&blog, &CommitId::new("c1")).await.unwrap();
        assert_eq!(store.mutation_count().await, 3);
    }

    #[tokio::test]
    async fn cancel_workflow_only_touches_pending_requests() {
        let store = MemoryIndexStore::new();
        let blog = SiteId::new("blog");
        let request = |path: &str, state| PublishRequest {
            id: 0,
            site_id: blog.clone(),
            environment: "live".into(),
            path: path.into(),
            old_path: None,
            action: "NEW".into(),
            username: "jane".into(),
            package_id: "pkg-1".into(),
            state,
            scheduled_date: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap(),
            commit_id: None,
            completed_date: None,
        };
        store
            .insert_item_for_deployment(&request("/site/website/index.xml", PublishRequestState::ReadyForLive))
            .await
            .unwrap();
        store
            .insert_item_for_deployment(&request("/site/website/index.xml", PublishRequestState::Completed))
            .await
            .unwrap();

        store.cancel_workflow(&blog, "/site/website/index.xml").await.unwrap();

        let states: Vec<_> = store
            .snapshot()
            .await
            .publish_requests
            .into_iter()
            .map(|request| request.state)
            .collect();
        assert_eq!(states, vec![PublishRequestState::Cancelled, PublishRequestState::Completed]);
    }
}
