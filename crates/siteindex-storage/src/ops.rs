//! Index store capabilities, one trait per projection kind.
//!
//! Every method performs exactly one storage operation. Value-returning
//! methods return the affected row count (`u64`) or a generated id (`i64`).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use siteindex_core::{
    AccessToken, AuditEntry, AuditParam, ClusterMember, ClusterSiteSyncRepo, CommitId,
    DependencyEdge, GroupUpdate, ItemRecord, ItemStates, MoveItems, NavigationOrderSequence,
    NewGroup, NewSite, NewUser, PublishRequest, PublishRequestState, RemoteRepository, SiteId,
    SiteRecord, SiteState, UserProperties, UserUpdate, WorkflowEntry,
};

use crate::StoreResult;

#[async_trait]
pub trait SiteQueries: Send + Sync {
    async fn get_site(&self, site_id: &SiteId) -> StoreResult<Option<SiteRecord>>;

    async fn list_sites(&self) -> StoreResult<Vec<SiteRecord>>;
}

#[async_trait]
pub trait SiteMutations: Send + Sync {
    /// Returns false when a site with the same id already exists.
    async fn create_site(&self, site: &NewSite) -> StoreResult<bool>;

    /// Marks the site with `state` (normally `Deleted`); returns false if absent.
    async fn delete_site(&self, site_id: &SiteId, state: SiteState) -> StoreResult<bool>;

    async fn update_site(
        &self,
        site_id: &SiteId,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<u64>;

    async fn set_site_state(&self, site_id: &SiteId, state: SiteState) -> StoreResult<()>;

    async fn set_site_enabled(&self, site_id: &SiteId, enabled: bool) -> StoreResult<()>;

    async fn enable_site_publishing(&self, site_id: &SiteId, enabled: bool) -> StoreResult<()>;

    async fn update_site_publishing_status(&self, site_id: &SiteId, status: &str) -> StoreResult<()>;

    async fn update_site_last_commit_id(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()>;

    /// Conditional watermark update: only applies when the stored
    /// last-verified commit equals `expected` (absent included). Returns the
    /// number of rows changed, so 0 means another writer got there first.
    async fn compare_and_set_last_verified_commit_id(
        &self,
        site_id: &SiteId,
        expected: Option<&CommitId>,
        next: &CommitId,
    ) -> StoreResult<u64>;

    async fn update_site_last_synced_commit_id(
        &self,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()>;

    /// Takes the publishing lock if it is free, already held by `owner`, or
    /// its heartbeat is older than `ttl`.
    async fn lock_publishing_for_site(
        &self,
        site_id: &SiteId,
        owner: &str,
        ttl: Duration,
    ) -> StoreResult<bool>;

    async fn unlock_publishing_for_site(&self, site_id: &SiteId, owner: &str) -> StoreResult<()>;

    async fn update_publishing_lock_heartbeat(&self, site_id: &SiteId, owner: &str) -> StoreResult<()>;

    async fn clear_publishing_lock_for_site(&self, site_id: &SiteId) -> StoreResult<()>;
}

#[async_trait]
pub trait ItemMutations: Send + Sync {
    /// Inserts or refreshes the row for `(site, path)`; state bits of an
    /// existing row are left alone.
    async fn upsert_entry(&self, item: &ItemRecord) -> StoreResult<()>;

    /// Full overwrite of an existing row, state bits included.
    async fn update_item(&self, item: &ItemRecord) -> StoreResult<u64>;

    async fn delete_by_id(&self, item_id: i64) -> StoreResult<()>;

    async fn delete_by_site_and_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()>;

    /// Deletes a folder row and everything below it.
    async fn delete_by_site_and_path_for_folder(&self, site_id: &SiteId, path: &str) -> StoreResult<()>;

    async fn delete_items_for_site(&self, site_id: &SiteId) -> StoreResult<()>;

    async fn delete_items_for_site_and_paths(&self, site_id: &SiteId, paths: &[String]) -> StoreResult<()>;

    async fn set_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        states: ItemStates,
    ) -> StoreResult<()>;

    async fn reset_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        states: ItemStates,
    ) -> StoreResult<()>;

    async fn update_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        on: ItemStates,
        off: ItemStates,
    ) -> StoreResult<()>;

    async fn update_states_by_id_bulk(
        &self,
        item_ids: &[i64],
        on: ItemStates,
        off: ItemStates,
    ) -> StoreResult<()>;

    /// Moves one row; a row already sitting at `new_path` is replaced.
    async fn move_item(&self, site_id: &SiteId, old_path: &str, new_path: &str) -> StoreResult<()>;

    async fn move_items(&self, params: &MoveItems) -> StoreResult<()>;

    async fn clear_previous_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()>;

    async fn update_commit_id(&self, site_id: &SiteId, path: &str, commit_id: &CommitId) -> StoreResult<()>;

    async fn update_last_published_on_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        published_on: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn lock_item_by_path(&self, site_id: &SiteId, path: &str, owner: &str) -> StoreResult<()>;

    async fn unlock_item_by_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait WorkflowMutations: Send + Sync {
    async fn insert_workflow_entry(&self, entry: &WorkflowEntry) -> StoreResult<()>;

    async fn update_workflow_entry(&self, entry: &WorkflowEntry) -> StoreResult<()>;

    async fn delete_workflow_entry(&self, site_id: &SiteId, path: &str) -> StoreResult<()>;

    async fn delete_workflow_entries(&self, site_id: &SiteId, paths: &[String]) -> StoreResult<()>;

    async fn delete_workflow_entries_for_site(&self, site_id: &SiteId) -> StoreResult<()>;
}

#[async_trait]
pub trait DependencyMutations: Send + Sync {
    /// Edges that already exist are left as they are.
    async fn insert_dependencies(&self, edges: &[DependencyEdge]) -> StoreResult<()>;

    async fn delete_all_source_dependencies(&self, site_id: &SiteId, source_path: &str) -> StoreResult<()>;

    async fn delete_dependencies_for_site(&self, site_id: &SiteId) -> StoreResult<()>;

    /// Deletes edges where `path` is either the source or the target.
    async fn delete_dependencies_for_site_and_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()>;

    /// Rewrites `old_path` to `new_path` on both ends of every edge.
    async fn move_dependency(&self, site_id: &SiteId, old_path: &str, new_path: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait NavigationMutations: Send + Sync {
    /// Keeps the existing row when the folder already has a sequence.
    async fn insert_navigation_order_sequence(&self, sequence: &NavigationOrderSequence) -> StoreResult<()>;

    async fn update_navigation_order_sequence(&self, sequence: &NavigationOrderSequence) -> StoreResult<()>;

    async fn delete_navigation_order_sequences_for_site(&self, site_id: &SiteId) -> StoreResult<()>;
}

#[async_trait]
pub trait AuditMutations: Send + Sync {
    /// Returns the id of the audit row. Entries carrying a commit id are
    /// unique per (site, commit, target, operation); re-inserting one returns
    /// the existing id.
    async fn insert_audit_log(&self, entry: &AuditEntry) -> StoreResult<i64>;

    async fn insert_audit_log_params(&self, audit_id: i64, params: &[AuditParam]) -> StoreResult<()>;

    async fn delete_audit_log_for_site(&self, site_id: &SiteId) -> StoreResult<()>;
}

#[async_trait]
pub trait GitLogMutations: Send + Sync {
    /// No-op when the commit is already mirrored.
    async fn insert_git_log(
        &self,
        site_id: &SiteId,
        commit_id: &CommitId,
        processed: bool,
        audited: bool,
    ) -> StoreResult<()>;

    async fn upsert_git_log_list(
        &self,
        site_id: &SiteId,
        commit_ids: &[CommitId],
        processed: bool,
        audited: bool,
    ) -> StoreResult<()>;

    async fn mark_git_log_processed(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()>;

    async fn mark_git_log_processed_bulk(&self, site_id: &SiteId, commit_ids: &[CommitId]) -> StoreResult<()>;

    async fn mark_git_log_audited(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()>;

    async fn delete_git_log_for_site(&self, site_id: &SiteId) -> StoreResult<()>;
}

#[async_trait]
pub trait ClusterMutations: Send + Sync {
    async fn add_cluster_member(&self, member: &ClusterMember) -> StoreResult<i64>;

    async fn update_cluster_member(&self, member: &ClusterMember) -> StoreResult<u64>;

    async fn remove_cluster_members(&self, member_ids: &[i64]) -> StoreResult<u64>;

    async fn update_cluster_node_heartbeat(&self, local_address: &str) -> StoreResult<u64>;

    async fn insert_cluster_site_sync_repo(&self, repo: &ClusterSiteSyncRepo) -> StoreResult<()>;

    async fn update_cluster_node_last_verified_commit_id(
        &self,
        cluster_node_id: i64,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()>;

    async fn update_cluster_node_last_synced_commit_id(
        &self,
        cluster_node_id: i64,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait PublishRequestMutations: Send + Sync {
    async fn insert_item_for_deployment(&self, request: &PublishRequest) -> StoreResult<i64>;

    /// Cancels pending (ready-for-live) requests for one path.
    async fn cancel_workflow(&self, site_id: &SiteId, path: &str) -> StoreResult<()>;

    async fn cancel_packages(&self, site_id: &SiteId, package_ids: &[String]) -> StoreResult<()>;

    async fn update_item_deployment_state(
        &self,
        request_id: i64,
        state: PublishRequestState,
    ) -> StoreResult<()>;

    async fn mark_publish_request_completed(
        &self,
        request_id: i64,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Moves every request of the site in `from` back to `to`.
    async fn reset_publish_request_processing_queue(
        &self,
        site_id: &SiteId,
        from: PublishRequestState,
        to: PublishRequestState,
    ) -> StoreResult<()>;

    async fn delete_deployment_data_for_site(&self, site_id: &SiteId) -> StoreResult<()>;
}

#[async_trait]
pub trait SecurityMutations: Send + Sync {
    async fn upsert_refresh_token(&self, user_id: i64, token: &str) -> StoreResult<()>;

    async fn delete_refresh_token(&self, user_id: i64) -> StoreResult<()>;

    async fn create_access_token(&self, user_id: i64, token: &AccessToken) -> StoreResult<i64>;

    async fn update_access_token(&self, user_id: i64, token_id: i64, enabled: bool) -> StoreResult<()>;

    async fn delete_access_token(&self, user_id: i64, token_id: i64) -> StoreResult<()>;

    /// Drops refresh tokens older than `max_age` and expired access tokens.
    async fn delete_expired_tokens(&self, max_age: Duration) -> StoreResult<u64>;
}

#[async_trait]
pub trait UserMutations: Send + Sync {
    async fn create_user(&self, user: &NewUser) -> StoreResult<i64>;

    async fn update_user(&self, user: &UserUpdate) -> StoreResult<u64>;

    async fn delete_users(&self, user_ids: &[i64]) -> StoreResult<u64>;

    async fn enable_users(&self, user_ids: &[i64], enabled: bool) -> StoreResult<u64>;

    async fn set_user_password(&self, username: &str, password_hash: &str) -> StoreResult<u64>;

    async fn update_user_properties(
        &self,
        user_id: i64,
        site_id: &SiteId,
        properties: &UserProperties,
    ) -> StoreResult<()>;

    async fn delete_user_properties(&self, user_id: i64, site_id: &SiteId, keys: &[String]) -> StoreResult<()>;
}

#[async_trait]
pub trait GroupMutations: Send + Sync {
    async fn create_group(&self, group: &NewGroup) -> StoreResult<i64>;

    async fn update_group(&self, group: &GroupUpdate) -> StoreResult<u64>;

    async fn delete_groups(&self, group_ids: &[i64]) -> StoreResult<u64>;

    async fn add_group_members(&self, group_id: i64, user_ids: &[i64]) -> StoreResult<u64>;

    async fn remove_group_members(&self, group_id: i64, user_ids: &[i64]) -> StoreResult<u64>;
}

#[async_trait]
pub trait RemoteRepositoryMutations: Send + Sync {
    async fn insert_remote_repository(&self, remote: &RemoteRepository) -> StoreResult<i64>;

    async fn delete_remote_repository(&self, site_id: &SiteId, remote_name: &str) -> StoreResult<u64>;

    async fn delete_remote_repositories_for_site(&self, site_id: &SiteId) -> StoreResult<u64>;
}

/// Everything the index store offers.
pub trait IndexStore:
    SiteQueries
    + SiteMutations
    + ItemMutations
    + WorkflowMutations
    + DependencyMutations
    + NavigationMutations
    + AuditMutations
    + GitLogMutations
    + ClusterMutations
    + PublishRequestMutations
    + SecurityMutations
    + UserMutations
    + GroupMutations
    + RemoteRepositoryMutations
{
}

impl<T> IndexStore for T where
    T: SiteQueries
        + SiteMutations
        + ItemMutations
        + WorkflowMutations
        + DependencyMutations
        + NavigationMutations
        + AuditMutations
        + GitLogMutations
        + ClusterMutations
        + PublishRequestMutations
        + SecurityMutations
        + UserMutations
        + GroupMutations
        + RemoteRepositoryMutations
{
}
