//! Retrying mutation facade.
//!
//! `RetryingIndexStore<S>` implements each capability trait for any backend
//! `S` that implements it, and routes every call through [`with_retry`]. It
//! holds no business logic and opens no transactions across calls.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use siteindex_core::{
    AccessToken, AuditEntry, AuditParam, ClusterMember, ClusterSiteSyncRepo, CommitId,
    DependencyEdge, GroupUpdate, ItemRecord, ItemStates, MoveItems, NavigationOrderSequence,
    NewGroup, NewSite, NewUser, PublishRequest, PublishRequestState, RemoteRepository, SiteId,
    SiteRecord, SiteState, UserProperties, UserUpdate, WorkflowEntry,
};

use crate::ops::{
    AuditMutations, ClusterMutations, DependencyMutations, GitLogMutations, GroupMutations,
    ItemMutations, NavigationMutations, PublishRequestMutations, RemoteRepositoryMutations,
    SecurityMutations, SiteMutations, SiteQueries, UserMutations, WorkflowMutations,
};
use crate::retry::{with_retry, RetryPolicy};
use crate::StoreResult;

#[derive(Debug)]
pub struct RetryingIndexStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingIndexStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The undecorated backend. Calls made through it are not retried.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn retry<'a, T, F, Fut>(&'a self, op: &'static str, mut call: F) -> StoreResult<T>
    where
        F: FnMut(&'a S) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let inner = &self.inner;
        with_retry(op, &self.policy, || call(inner)).await
    }
}

#[async_trait]
impl<S: SiteQueries> SiteQueries for RetryingIndexStore<S> {
    async fn get_site(&self, site_id: &SiteId) -> StoreResult<Option<SiteRecord>> {
        self.retry("site.get_site", move |s| s.get_site(site_id)).await
    }

    async fn list_sites(&self) -> StoreResult<Vec<SiteRecord>> {
        self.retry("site.list_sites", move |s| s.list_sites()).await
    }
}

#[async_trait]
impl<S: SiteMutations> SiteMutations for RetryingIndexStore<S> {
    async fn create_site(&self, site: &NewSite) -> StoreResult<bool> {
        self.retry("site.create_site", move |s| s.create_site(site)).await
    }

    async fn delete_site(&self, site_id: &SiteId, state: SiteState) -> StoreResult<bool> {
        self.retry("site.delete_site", move |s| s.delete_site(site_id, state))
            .await
    }

    async fn update_site(
        &self,
        site_id: &SiteId,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<u64> {
        self.retry("site.update_site", move |s| {
            s.update_site(site_id, name, description)
        })
        .await
    }

    async fn set_site_state(&self, site_id: &SiteId, state: SiteState) -> StoreResult<()> {
        self.retry("site.set_site_state", move |s| s.set_site_state(site_id, state))
            .await
    }

    async fn set_site_enabled(&self, site_id: &SiteId, enabled: bool) -> StoreResult<()> {
        self.retry("site.set_site_enabled", move |s| {
            s.set_site_enabled(site_id, enabled)
        })
        .await
    }

    async fn enable_site_publishing(&self, site_id: &SiteId, enabled: bool) -> StoreResult<()> {
        self.retry("site.enable_site_publishing", move |s| {
            s.enable_site_publishing(site_id, enabled)
        })
        .await
    }

    async fn update_site_publishing_status(&self, site_id: &SiteId, status: &str) -> StoreResult<()> {
        self.retry("site.update_site_publishing_status", move |s| {
            s.update_site_publishing_status(site_id, status)
        })
        .await
    }

    async fn update_site_last_commit_id(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()> {
        self.retry("site.update_site_last_commit_id", move |s| {
            s.update_site_last_commit_id(site_id, commit_id)
        })
        .await
    }

    async fn compare_and_set_last_verified_commit_id(
        &self,
        site_id: &SiteId,
        expected: Option<&CommitId>,
        next: &CommitId,
    ) -> StoreResult<u64> {
        self.retry("site.compare_and_set_last_verified_commit_id", move |s| {
            s.compare_and_set_last_verified_commit_id(site_id, expected, next)
        })
        .await
    }

    async fn update_site_last_synced_commit_id(
        &self,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()> {
        self.retry("site.update_site_last_synced_commit_id", move |s| {
            s.update_site_last_synced_commit_id(site_id, commit_id)
        })
        .await
    }

    async fn lock_publishing_for_site(
        &self,
        site_id: &SiteId,
        owner: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.retry("site.lock_publishing_for_site", move |s| {
            s.lock_publishing_for_site(site_id, owner, ttl)
        })
        .await
    }

    async fn unlock_publishing_for_site(&self, site_id: &SiteId, owner: &str) -> StoreResult<()> {
        self.retry("site.unlock_publishing_for_site", move |s| {
            s.unlock_publishing_for_site(site_id, owner)
        })
        .await
    }

    async fn update_publishing_lock_heartbeat(&self, site_id: &SiteId, owner: &str) -> StoreResult<()> {
        self.retry("site.update_publishing_lock_heartbeat", move |s| {
            s.update_publishing_lock_heartbeat(site_id, owner)
        })
        .await
    }

    async fn clear_publishing_lock_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        self.retry("site.clear_publishing_lock_for_site", move |s| {
            s.clear_publishing_lock_for_site(site_id)
        })
        .await
    }
}

#[async_trait]
impl<S: ItemMutations> ItemMutations for RetryingIndexStore<S> {
    async fn upsert_entry(&self, item: &ItemRecord) -> StoreResult<()> {
        self.retry("item.upsert_entry", move |s| s.upsert_entry(item)).await
    }

    async fn update_item(&self, item: &ItemRecord) -> StoreResult<u64> {
        self.retry("item.update_item", move |s| s.update_item(item)).await
    }

    async fn delete_by_id(&self, item_id: i64) -> StoreResult<()> {
        self.retry("item.delete_by_id", move |s| s.delete_by_id(item_id)).await
    }

    async fn delete_by_site_and_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        self.retry("item.delete_by_site_and_path", move |s| {
            s.delete_by_site_and_path(site_id, path)
        })
        .await
    }

    async fn delete_by_site_and_path_for_folder(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        self.retry("item.delete_by_site_and_path_for_folder", move |s| {
            s.delete_by_site_and_path_for_folder(site_id, path)
        })
        .await
    }

    async fn delete_items_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        self.retry("item.delete_items_for_site", move |s| {
            s.delete_items_for_site(site_id)
        })
        .await
    }

    async fn delete_items_for_site_and_paths(&self, site_id: &SiteId, paths: &[String]) -> StoreResult<()> {
        self.retry("item.delete_items_for_site_and_paths", move |s| {
            s.delete_items_for_site_and_paths(site_id, paths)
        })
        .await
    }

    async fn set_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        states: ItemStates,
    ) -> StoreResult<()> {
        self.retry("item.set_states_by_site_and_path_bulk", move |s| {
            s.set_states_by_site_and_path_bulk(site_id, paths, states)
        })
        .await
    }

    async fn reset_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        states: ItemStates,
    ) -> StoreResult<()> {
        self.retry("item.reset_states_by_site_and_path_bulk", move |s| {
            s.reset_states_by_site_and_path_bulk(site_id, paths, states)
        })
        .await
    }

    async fn update_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        on: ItemStates,
        off: ItemStates,
    ) -> StoreResult<()> {
        self.retry("item.update_states_by_site_and_path_bulk", move |s| {
            s.update_states_by_site_and_path_bulk(site_id, paths, on, off)
        })
        .await
    }

    async fn update_states_by_id_bulk(
        &self,
        item_ids: &[i64],
        on: ItemStates,
        off: ItemStates,
    ) -> StoreResult<()> {
        self.retry("item.update_states_by_id_bulk", move |s| {
            s.update_states_by_id_bulk(item_ids, on, off)
        })
        .await
    }

    async fn move_item(&self, site_id: &SiteId, old_path: &str, new_path: &str) -> StoreResult<()> {
        self.retry("item.move_item", move |s| s.move_item(site_id, old_path, new_path))
            .await
    }

    async fn move_items(&self, params: &MoveItems) -> StoreResult<()> {
        self.retry("item.move_items", move |s| s.move_items(params)).await
    }

    async fn clear_previous_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        self.retry("item.clear_previous_path", move |s| {
            s.clear_previous_path(site_id, path)
        })
        .await
    }

    async fn update_commit_id(&self, site_id: &SiteId, path: &str, commit_id: &CommitId) -> StoreResult<()> {
        self.retry("item.update_commit_id", move |s| {
            s.update_commit_id(site_id, path, commit_id)
        })
        .await
    }

    async fn update_last_published_on_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        published_on: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.retry("item.update_last_published_on_bulk", move |s| {
            s.update_last_published_on_bulk(site_id, paths, published_on)
        })
        .await
    }

    async fn lock_item_by_path(&self, site_id: &SiteId, path: &str, owner: &str) -> StoreResult<()> {
        self.retry("item.lock_item_by_path", move |s| {
            s.lock_item_by_path(site_id, path, owner)
        })
        .await
    }

    async fn unlock_item_by_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        self.retry("item.unlock_item_by_path", move |s| {
            s.unlock_item_by_path(site_id, path)
        })
        .await
    }
}

#[async_trait]
impl<S: WorkflowMutations> WorkflowMutations for RetryingIndexStore<S> {
    async fn insert_workflow_entry(&self, entry: &WorkflowEntry) -> StoreResult<()> {
        self.retry("workflow.insert_workflow_entry", move |s| {
            s.insert_workflow_entry(entry)
        })
        .await
    }

    async fn update_workflow_entry(&self, entry: &WorkflowEntry) -> StoreResult<()> {
        self.retry("workflow.update_workflow_entry", move |s| {
            s.update_workflow_entry(entry)
        })
        .await
    }

    async fn delete_workflow_entry(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        self.retry("workflow.delete_workflow_entry", move |s| {
            s.delete_workflow_entry(site_id, path)
        })
        .await
    }

    async fn delete_workflow_entries(&self, site_id: &SiteId, paths: &[String]) -> StoreResult<()> {
        self.retry("workflow.delete_workflow_entries", move |s| {
            s.delete_workflow_entries(site_id, paths)
        })
        .await
    }

    async fn delete_workflow_entries_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        self.retry("workflow.delete_workflow_entries_for_site", move |s| {
            s.delete_workflow_entries_for_site(site_id)
        })
        .await
    }
}

#[async_trait]
impl<S: DependencyMutations> DependencyMutations for RetryingIndexStore<S> {
    async fn insert_dependencies(&self, edges: &[DependencyEdge]) -> StoreResult<()> {
        self.retry("dependency.insert_dependencies", move |s| {
            s.insert_dependencies(edges)
        })
        .await
    }

    async fn delete_all_source_dependencies(&self, site_id: &SiteId, source_path: &str) -> StoreResult<()> {
        self.retry("dependency.delete_all_source_dependencies", move |s| {
            s.delete_all_source_dependencies(site_id, source_path)
        })
        .await
    }

    async fn delete_dependencies_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        self.retry("dependency.delete_dependencies_for_site", move |s| {
            s.delete_dependencies_for_site(site_id)
        })
        .await
    }

    async fn delete_dependencies_for_site_and_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        self.retry("dependency.delete_dependencies_for_site_and_path", move |s| {
            s.delete_dependencies_for_site_and_path(site_id, path)
        })
        .await
    }

    async fn move_dependency(&self, site_id: &SiteId, old_path: &str, new_path: &str) -> StoreResult<()> {
        self.retry("dependency.move_dependency", move |s| {
            s.move_dependency(site_id, old_path, new_path)
        })
        .await
    }
}

#[async_trait]
impl<S: NavigationMutations> NavigationMutations for RetryingIndexStore<S> {
    async fn insert_navigation_order_sequence(&self, sequence: &NavigationOrderSequence) -> StoreResult<()> {
        self.retry("navigation.insert_navigation_order_sequence", move |s| {
            s.insert_navigation_order_sequence(sequence)
        })
        .await
    }

    async fn update_navigation_order_sequence(&self, sequence: &NavigationOrderSequence) -> StoreResult<()> {
        self.retry("navigation.update_navigation_order_sequence", move |s| {
            s.update_navigation_order_sequence(sequence)
        })
        .await
    }

    async fn delete_navigation_order_sequences_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        self.retry("navigation.delete_navigation_order_sequences_for_site", move |s| {
            s.delete_navigation_order_sequences_for_site(site_id)
        })
        .await
    }
}

#[async_trait]
impl<S: AuditMutations> AuditMutations for RetryingIndexStore<S> {
    async fn insert_audit_log(&self, entry: &AuditEntry) -> StoreResult<i64> {
        self.retry("audit.insert_audit_log", move |s| s.insert_audit_log(entry))
            .await
    }

    async fn insert_audit_log_params(&self, audit_id: i64, params: &[AuditParam]) -> StoreResult<()> {
        self.retry("audit.insert_audit_log_params", move |s| {
            s.insert_audit_log_params(audit_id, params)
        })
        .await
    }

    async fn delete_audit_log_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        self.retry("audit.delete_audit_log_for_site", move |s| {
            s.delete_audit_log_for_site(site_id)
        })
        .await
    }
}

#[async_trait]
impl<S: GitLogMutations> GitLogMutations for RetryingIndexStore<S> {
    async fn insert_git_log(
        &self,
        site_id: &SiteId,
        commit_id: &CommitId,
        processed: bool,
        audited: bool,
    ) -> StoreResult<()> {
        self.retry("git_log.insert_git_log", move |s| {
            s.insert_git_log(site_id, commit_id, processed, audited)
        })
        .await
    }

    async fn upsert_git_log_list(
        &self,
        site_id: &SiteId,
        commit_ids: &[CommitId],
        processed: bool,
        audited: bool,
    ) -> StoreResult<()> {
        self.retry("git_log.upsert_git_log_list", move |s| {
            s.upsert_git_log_list(site_id, commit_ids, processed, audited)
        })
        .await
    }

    async fn mark_git_log_processed(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()> {
        self.retry("git_log.mark_git_log_processed", move |s| {
            s.mark_git_log_processed(site_id, commit_id)
        })
        .await
    }

    async fn mark_git_log_processed_bulk(&self, site_id: &SiteId, commit_ids: &[CommitId]) -> StoreResult<()> {
        self.retry("git_log.mark_git_log_processed_bulk", move |s| {
            s.mark_git_log_processed_bulk(site_id, commit_ids)
        })
        .await
    }

    async fn mark_git_log_audited(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()> {
        self.retry("git_log.mark_git_log_audited", move |s| {
            s.mark_git_log_audited(site_id, commit_id)
        })
        .await
    }

    async fn delete_git_log_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        self.retry("git_log.delete_git_log_for_site", move |s| {
            s.delete_git_log_for_site(site_id)
        })
        .await
    }
}

#[async_trait]
impl<S: ClusterMutations> ClusterMutations for RetryingIndexStore<S> {
    async fn add_cluster_member(&self, member: &ClusterMember) -> StoreResult<i64> {
        self.retry("cluster.add_cluster_member", move |s| s.add_cluster_member(member))
            .await
    }

    async fn update_cluster_member(&self, member: &ClusterMember) -> StoreResult<u64> {
        self.retry("cluster.update_cluster_member", move |s| {
            s.update_cluster_member(member)
        })
        .await
    }

    async fn remove_cluster_members(&self, member_ids: &[i64]) -> StoreResult<u64> {
        self.retry("cluster.remove_cluster_members", move |s| {
            s.remove_cluster_members(member_ids)
        })
        .await
    }

    async fn update_cluster_node_heartbeat(&self, local_address: &str) -> StoreResult<u64> {
        self.retry("cluster.update_cluster_node_heartbeat", move |s| {
            s.update_cluster_node_heartbeat(local_address)
        })
        .await
    }

    async fn insert_cluster_site_sync_repo(&self, repo: &ClusterSiteSyncRepo) -> StoreResult<()> {
        self.retry("cluster.insert_cluster_site_sync_repo", move |s| {
            s.insert_cluster_site_sync_repo(repo)
        })
        .await
    }

    async fn update_cluster_node_last_verified_commit_id(
        &self,
        cluster_node_id: i64,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()> {
        self.retry("cluster.update_cluster_node_last_verified_commit_id", move |s| {
            s.update_cluster_node_last_verified_commit_id(cluster_node_id, site_id, commit_id)
        })
        .await
    }

    async fn update_cluster_node_last_synced_commit_id(
        &self,
        cluster_node_id: i64,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()> {
        self.retry("cluster.update_cluster_node_last_synced_commit_id", move |s| {
            s.update_cluster_node_last_synced_commit_id(cluster_node_id, site_id, commit_id)
        })
        .await
    }
}

#[async_trait]
impl<S: PublishRequestMutations> PublishRequestMutations for RetryingIndexStore<S> {
    async fn insert_item_for_deployment(&self, request: &PublishRequest) -> StoreResult<i64> {
        self.retry("publish_request.insert_item_for_deployment", move |s| {
            s.insert_item_for_deployment(request)
        })
        .await
    }

    async fn cancel_workflow(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        self.retry("publish_request.cancel_workflow", move |s| {
            s.cancel_workflow(site_id, path)
        })
        .await
    }

    async fn cancel_packages(&self, site_id: &SiteId, package_ids: &[String]) -> StoreResult<()> {
        self.retry("publish_request.cancel_packages", move |s| {
            s.cancel_packages(site_id, package_ids)
        })
        .await
    }

    async fn update_item_deployment_state(
        &self,
        request_id: i64,
        state: PublishRequestState,
    ) -> StoreResult<()> {
        self.retry("publish_request.update_item_deployment_state", move |s| {
            s.update_item_deployment_state(request_id, state)
        })
        .await
    }

    async fn mark_publish_request_completed(
        &self,
        request_id: i64,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.retry("publish_request.mark_publish_request_completed", move |s| {
            s.mark_publish_request_completed(request_id, completed_at)
        })
        .await
    }

    async fn reset_publish_request_processing_queue(
        &self,
        site_id: &SiteId,
        from: PublishRequestState,
        to: PublishRequestState,
    ) -> StoreResult<()> {
        self.retry("publish_request.reset_publish_request_processing_queue", move |s| {
            s.reset_publish_request_processing_queue(site_id, from, to)
        })
        .await
    }

    async fn delete_deployment_data_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        self.retry("publish_request.delete_deployment_data_for_site", move |s| {
            s.delete_deployment_data_for_site(site_id)
        })
        .await
    }
}

#[async_trait]
impl<S: SecurityMutations> SecurityMutations for RetryingIndexStore<S> {
    async fn upsert_refresh_token(&self, user_id: i64, token: &str) -> StoreResult<()> {
        self.retry("security.upsert_refresh_token", move |s| {
            s.upsert_refresh_token(user_id, token)
        })
        .await
    }

    async fn delete_refresh_token(&self, user_id: i64) -> StoreResult<()> {
        self.retry("security.delete_refresh_token", move |s| {
            s.delete_refresh_token(user_id)
        })
        .await
    }

    async fn create_access_token(&self, user_id: i64, token: &AccessToken) -> StoreResult<i64> {
        self.retry("security.create_access_token", move |s| {
            s.create_access_token(user_id, token)
        })
        .await
    }

    async fn update_access_token(&self, user_id: i64, token_id: i64, enabled: bool) -> StoreResult<()> {
        self.retry("security.update_access_token", move |s| {
            s.update_access_token(user_id, token_id, enabled)
        })
        .await
    }

    async fn delete_access_token(&self, user_id: i64, token_id: i64) -> StoreResult<()> {
        self.retry("security.delete_access_token", move |s| {
            s.delete_access_token(user_id, token_id)
        })
        .await
    }

    async fn delete_expired_tokens(&self, max_age: Duration) -> StoreResult<u64> {
        self.retry("security.delete_expired_tokens", move |s| {
            s.delete_expired_tokens(max_age)
        })
        .await
    }
}

#[async_trait]
impl<S: UserMutations> UserMutations for RetryingIndexStore<S> {
    async fn create_user(&self, user: &NewUser) -> StoreResult<i64> {
        self.retry("user.create_user", move |s| s.create_user(user)).await
    }

    async fn update_user(&self, user: &UserUpdate) -> StoreResult<u64> {
        self.retry("user.update_user", move |s| s.update_user(user)).await
    }

    async fn delete_users(&self, user_ids: &[i64]) -> StoreResult<u64> {
        self.retry("user.delete_users", move |s| s.delete_users(user_ids)).await
    }

    async fn enable_users(&self, user_ids: &[i64], enabled: bool) -> StoreResult<u64> {
        self.retry("user.enable_users", move |s| s.enable_users(user_ids, enabled))
            .await
    }

    async fn set_user_password(&self, username: &str, password_hash: &str) -> StoreResult<u64> {
        self.retry("user.set_user_password", move |s| {
            s.set_user_password(username, password_hash)
        })
        .await
    }

    async fn update_user_properties(
        &self,
        user_id: i64,
        site_id: &SiteId,
        properties: &UserProperties,
    ) -> StoreResult<()> {
        self.retry("user.update_user_properties", move |s| {
            s.update_user_properties(user_id, site_id, properties)
        })
        .await
    }

    async fn delete_user_properties(&self, user_id: i64, site_id: &SiteId, keys: &[String]) -> StoreResult<()> {
        self.retry("user.delete_user_properties", move |s| {
            s.delete_user_properties(user_id, site_id, keys)
        })
        .await
    }
}

#[async_trait]
impl<S: GroupMutations> GroupMutations for RetryingIndexStore<S> {
    async fn create_group(&self, group: &NewGroup) -> StoreResult<i64> {
        self.retry("group.create_group", move |s| s.create_group(group)).await
    }

    async fn update_group(&self, group: &GroupUpdate) -> StoreResult<u64> {
        self.retry("group.update_group", move |s| s.update_group(group)).await
    }

    async fn delete_groups(&self, group_ids: &[i64]) -> StoreResult<u64> {
        self.retry("group.delete_groups", move |s| s.delete_groups(group_ids))
            .await
    }

    async fn add_group_members(&self, group_id: i64, user_ids: &[i64]) -> StoreResult<u64> {
        self.retry("group.add_group_members", move |s| {
            s.add_group_members(group_id, user_ids)
        })
        .await
    }

    async fn remove_group_members(&self, group_id: i64, user_ids: &[i64]) -> StoreResult<u64> {
        self.retry("group.remove_group_members", move |s| {
            s.remove_group_members(group_id, user_ids)
        })
        .await
    }
}

#[async_trait]
impl<S: RemoteRepositoryMutations> RemoteRepositoryMutations for RetryingIndexStore<S> {
    async fn insert_remote_repository(&self, remote: &RemoteRepository) -> StoreResult<i64> {
        self.retry("remote_repository.insert_remote_repository", move |s| {
            s.insert_remote_repository(remote)
        })
        .await
    }

    async fn delete_remote_repository(&self, site_id: &SiteId, remote_name: &str) -> StoreResult<u64> {
        self.retry("remote_repository.delete_remote_repository", move |s| {
            s.delete_remote_repository(site_id, remote_name)
        })
        .await
    }

    async fn delete_remote_repositories_for_site(&self, site_id: &SiteId) -> StoreResult<u64> {
        self.retry("remote_repository.delete_remote_repositories_for_site", move |s| {
            s.delete_remote_repositories_for_site(site_id)
        })
        .await
    }
}
