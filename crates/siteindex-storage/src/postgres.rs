//! Postgres backend. Every operation is a single statement, except the moves,
//! which run their statements inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use siteindex_core::{
    item_label, item_preview_url, item_system_type, AccessToken, AuditEntry, AuditParam,
    ClusterMember, ClusterSiteSyncRepo, CommitId, DependencyEdge, GroupUpdate, ItemRecord,
    ItemStates, MoveItems, NavigationOrderSequence, NewGroup, NewSite, NewUser, PublishRequest,
    PublishRequestState, RemoteRepository, SiteId, SiteRecord, SiteState, UserProperties,
    UserUpdate, WorkflowEntry,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::ops::{
    AuditMutations, ClusterMutations, DependencyMutations, GitLogMutations, GroupMutations,
    ItemMutations, NavigationMutations, PublishRequestMutations, RemoteRepositoryMutations,
    SecurityMutations, SiteMutations, SiteQueries, UserMutations, WorkflowMutations,
};
use crate::retry::RetryDisposition;
use crate::{StoreError, StoreResult};

/// Maps a Postgres SQLSTATE to a retry disposition. Serialization failures,
/// deadlocks, lock-not-available, statement cancellation, too many connections
/// and the whole connection-exception class are transient.
pub fn classify_sqlstate(code: &str) -> RetryDisposition {
    match code {
        "40001" | "40P01" | "55P03" | "57014" | "53300" => RetryDisposition::Retryable,
        _ if code.starts_with("08") => RetryDisposition::Retryable,
        _ => RetryDisposition::NonRetryable,
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let disposition = match &err {
            sqlx::Error::Database(db_err) => db_err
                .code()
                .as_deref()
                .map_or(RetryDisposition::NonRetryable, classify_sqlstate),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => RetryDisposition::Retryable,
            _ => RetryDisposition::NonRetryable,
        };
        match disposition {
            RetryDisposition::Retryable => StoreError::Transient(err.to_string()),
            RetryDisposition::NonRetryable => StoreError::Permanent(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgIndexStore {
    pool: PgPool,
}

impl PgIndexStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::permanent(format!("running migrations: {err}")))?;
        info!("index store migrations applied");
        Ok(())
    }
}

fn site_from_row(row: &PgRow) -> StoreResult<SiteRecord> {
    let state: String = row.try_get("state")?;
    let state = SiteState::parse(&state)
        .ok_or_else(|| StoreError::permanent(format!("unknown site state {state:?}")))?;
    let commit = |column: &str| -> StoreResult<Option<CommitId>> {
        Ok(row.try_get::<Option<String>, _>(column)?.map(CommitId::from))
    };
    Ok(SiteRecord {
        id: row.try_get("id")?,
        site_id: SiteId::from(row.try_get::<String, _>("site_id")?),
        site_uuid: row.try_get("site_uuid")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        state,
        enabled: row.try_get("enabled")?,
        publishing_enabled: row.try_get("publishing_enabled")?,
        publishing_status: row.try_get("publishing_status")?,
        publishing_lock_owner: row.try_get("publishing_lock_owner")?,
        publishing_lock_heartbeat: row.try_get("publishing_lock_heartbeat")?,
        last_commit_id: commit("last_commit_id")?,
        last_verified_commit_id: commit("last_verified_commit_id")?,
        last_synced_commit_id: commit("last_synced_commit_id")?,
    })
}

fn state_bits(states: ItemStates) -> i64 {
    states.bits() as i64
}

fn commit_id_strings(ids: &[CommitId]) -> Vec<String> {
    ids.iter().map(|id| id.as_str().to_string()).collect()
}

#[async_trait]
impl SiteQueries for PgIndexStore {
    async fn get_site(&self, site_id: &SiteId) -> StoreResult<Option<SiteRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, site_id, site_uuid, name, description, state, enabled,
                   publishing_enabled, publishing_status, publishing_lock_owner,
                   publishing_lock_heartbeat, last_commit_id, last_verified_commit_id,
                   last_synced_commit_id
              FROM site
             WHERE site_id = $1
            "#,
        )
        .bind(site_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(site_from_row).transpose()
    }

    async fn list_sites(&self) -> StoreResult<Vec<SiteRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, site_id, site_uuid, name, description, state, enabled,
                   publishing_enabled, publishing_status, publishing_lock_owner,
                   publishing_lock_heartbeat, last_commit_id, last_verified_commit_id,
                   last_synced_commit_id
              FROM site
             ORDER BY site_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(site_from_row).collect()
    }
}

#[async_trait]
impl SiteMutations for PgIndexStore {
    async fn create_site(&self, site: &NewSite) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO site (site_id, site_uuid, name, description, state)
            VALUES ($1, $2, $3, $4, 'CREATING')
            ON CONFLICT (site_id) DO NOTHING
            "#,
        )
        .bind(site.site_id.as_str())
        .bind(&site.site_uuid)
        .bind(&site.name)
        .bind(site.description.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_site(&self, site_id: &SiteId, state: SiteState) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE site SET state = $2 WHERE site_id = $1")
            .bind(site_id.as_str())
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_site(
        &self,
        site_id: &SiteId,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE site SET name = $2, description = $3 WHERE site_id = $1")
            .bind(site_id.as_str())
            .bind(name)
            .bind(description)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_site_state(&self, site_id: &SiteId, state: SiteState) -> StoreResult<()> {
        sqlx::query("UPDATE site SET state = $2 WHERE site_id = $1")
            .bind(site_id.as_str())
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_site_enabled(&self, site_id: &SiteId, enabled: bool) -> StoreResult<()> {
        sqlx::query("UPDATE site SET enabled = $2 WHERE site_id = $1")
            .bind(site_id.as_str())
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn enable_site_publishing(&self, site_id: &SiteId, enabled: bool) -> StoreResult<()> {
        sqlx::query("UPDATE site SET publishing_enabled = $2 WHERE site_id = $1")
            .bind(site_id.as_str())
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_site_publishing_status(&self, site_id: &SiteId, status: &str) -> StoreResult<()> {
        sqlx::query("UPDATE site SET publishing_status = $2 WHERE site_id = $1")
            .bind(site_id.as_str())
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_site_last_commit_id(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()> {
        sqlx::query("UPDATE site SET last_commit_id = $2 WHERE site_id = $1")
            .bind(site_id.as_str())
            .bind(commit_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn compare_and_set_last_verified_commit_id(
        &self,
        site_id: &SiteId,
        expected: Option<&CommitId>,
        next: &CommitId,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE site
               SET last_verified_commit_id = $3
             WHERE site_id = $1
               AND last_verified_commit_id IS NOT DISTINCT FROM $2::text
            "#,
        )
        .bind(site_id.as_str())
        .bind(expected.map(CommitId::as_str))
        .bind(next.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_site_last_synced_commit_id(
        &self,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE site SET last_synced_commit_id = $2 WHERE site_id = $1")
            .bind(site_id.as_str())
            .bind(commit_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn lock_publishing_for_site(
        &self,
        site_id: &SiteId,
        owner: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE site
               SET publishing_lock_owner = $2,
                   publishing_lock_heartbeat = $3
             WHERE site_id = $1
               AND (publishing_lock_owner IS NULL
                    OR publishing_lock_owner = $2
                    OR publishing_lock_heartbeat IS NULL
                    OR publishing_lock_heartbeat < $4)
            "#,
        )
        .bind(site_id.as_str())
        .bind(owner)
        .bind(now)
        .bind(now - ttl)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unlock_publishing_for_site(&self, site_id: &SiteId, owner: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE site
               SET publishing_lock_owner = NULL,
                   publishing_lock_heartbeat = NULL
             WHERE site_id = $1 AND publishing_lock_owner = $2
            "#,
        )
        .bind(site_id.as_str())
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_publishing_lock_heartbeat(&self, site_id: &SiteId, owner: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE site
               SET publishing_lock_heartbeat = NOW()
             WHERE site_id = $1 AND publishing_lock_owner = $2
            "#,
        )
        .bind(site_id.as_str())
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_publishing_lock_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE site
               SET publishing_lock_owner = NULL,
                   publishing_lock_heartbeat = NULL
             WHERE site_id = $1
            "#,
        )
        .bind(site_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ItemMutations for PgIndexStore {
    async fn upsert_entry(&self, item: &ItemRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO item (site_id, path, preview_url, state, system_type, label, locked_by,
                              last_modified_by, last_modified_on, last_published_on, commit_id,
                              previous_path)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (site_id, path) DO UPDATE
               SET preview_url = EXCLUDED.preview_url,
                   system_type = EXCLUDED.system_type,
                   label = EXCLUDED.label,
                   last_modified_by = EXCLUDED.last_modified_by,
                   last_modified_on = EXCLUDED.last_modified_on,
                   commit_id = EXCLUDED.commit_id
            "#,
        )
        .bind(item.site_id.as_str())
        .bind(&item.path)
        .bind(item.preview_url.as_deref())
        .bind(state_bits(item.states))
        .bind(&item.system_type)
        .bind(&item.label)
        .bind(item.locked_by.as_deref())
        .bind(&item.last_modified_by)
        .bind(item.last_modified_on)
        .bind(item.last_published_on)
        .bind(item.commit_id.as_ref().map(CommitId::as_str))
        .bind(item.previous_path.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_item(&self, item: &ItemRecord) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE item
               SET preview_url = $3, state = $4, system_type = $5, label = $6, locked_by = $7,
                   last_modified_by = $8, last_modified_on = $9, last_published_on = $10,
                   commit_id = $11, previous_path = $12
             WHERE site_id = $1 AND path = $2
            "#,
        )
        .bind(item.site_id.as_str())
        .bind(&item.path)
        .bind(item.preview_url.as_deref())
        .bind(state_bits(item.states))
        .bind(&item.system_type)
        .bind(&item.label)
        .bind(item.locked_by.as_deref())
        .bind(&item.last_modified_by)
        .bind(item.last_modified_on)
        .bind(item.last_published_on)
        .bind(item.commit_id.as_ref().map(CommitId::as_str))
        .bind(item.previous_path.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_by_id(&self, item_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM item WHERE id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_site_and_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM item WHERE site_id = $1 AND path = $2")
            .bind(site_id.as_str())
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_site_and_path_for_folder(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            DELETE FROM item
             WHERE site_id = $1
               AND (path = $2 OR starts_with(path, $2 || '/'))
            "#,
        )
        .bind(site_id.as_str())
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_items_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        sqlx::query("DELETE FROM item WHERE site_id = $1")
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_items_for_site_and_paths(&self, site_id: &SiteId, paths: &[String]) -> StoreResult<()> {
        sqlx::query("DELETE FROM item WHERE site_id = $1 AND path = ANY($2)")
            .bind(site_id.as_str())
            .bind(paths)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        states: ItemStates,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE item SET state = $3 WHERE site_id = $1 AND path = ANY($2)")
            .bind(site_id.as_str())
            .bind(paths)
            .bind(state_bits(states))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        states: ItemStates,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE item SET state = state & ~$3 WHERE site_id = $1 AND path = ANY($2)")
            .bind(site_id.as_str())
            .bind(paths)
            .bind(state_bits(states))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_states_by_site_and_path_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        on: ItemStates,
        off: ItemStates,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE item SET state = (state | $3) & ~$4 WHERE site_id = $1 AND path = ANY($2)",
        )
        .bind(site_id.as_str())
        .bind(paths)
        .bind(state_bits(on))
        .bind(state_bits(off))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_states_by_id_bulk(
        &self,
        item_ids: &[i64],
        on: ItemStates,
        off: ItemStates,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE item SET state = (state | $2) & ~$3 WHERE id = ANY($1)")
            .bind(item_ids)
            .bind(state_bits(on))
            .bind(state_bits(off))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn move_item(&self, site_id: &SiteId, old_path: &str, new_path: &str) -> StoreResult<()> {
        if old_path == new_path {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM item
             WHERE site_id = $1 AND path = $3
               AND EXISTS (SELECT 1 FROM item WHERE site_id = $1 AND path = $2)
            "#,
        )
        .bind(site_id.as_str())
        .bind(old_path)
        .bind(new_path)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE item
               SET path = $3, previous_path = $2, preview_url = $4, system_type = $5, label = $6
             WHERE site_id = $1 AND path = $2
            "#,
        )
        .bind(site_id.as_str())
        .bind(old_path)
        .bind(new_path)
        .bind(item_preview_url(new_path))
        .bind(item_system_type(new_path))
        .bind(item_label(new_path))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn move_items(&self, params: &MoveItems) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM item
             WHERE site_id = $1
               AND path IN (SELECT $3 || substring(path FROM char_length($2) + 1)
                              FROM item
                             WHERE site_id = $1
                               AND (path = $2 OR starts_with(path, $2 || '/')))
            "#,
        )
        .bind(params.site_id.as_str())
        .bind(&params.old_path)
        .bind(&params.new_path)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE item
               SET path = $3 || substring(path FROM char_length($2) + 1),
                   previous_path = path,
                   preview_url = CASE
                       WHEN $4::text IS NOT NULL AND $5::text IS NOT NULL
                            AND starts_with(preview_url, $4::text)
                       THEN $5::text || substring(preview_url FROM char_length($4::text) + 1)
                       ELSE preview_url
                   END,
                   state = (state | $6) & ~$7
             WHERE site_id = $1
               AND (path = $2 OR starts_with(path, $2 || '/'))
            "#,
        )
        .bind(params.site_id.as_str())
        .bind(&params.old_path)
        .bind(&params.new_path)
        .bind(params.old_preview_url.as_deref())
        .bind(params.new_preview_url.as_deref())
        .bind(state_bits(params.on_states))
        .bind(state_bits(params.off_states))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear_previous_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        sqlx::query("UPDATE item SET previous_path = NULL WHERE site_id = $1 AND path = $2")
            .bind(site_id.as_str())
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_commit_id(&self, site_id: &SiteId, path: &str, commit_id: &CommitId) -> StoreResult<()> {
        sqlx::query("UPDATE item SET commit_id = $3 WHERE site_id = $1 AND path = $2")
            .bind(site_id.as_str())
            .bind(path)
            .bind(commit_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_last_published_on_bulk(
        &self,
        site_id: &SiteId,
        paths: &[String],
        published_on: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE item SET last_published_on = $3 WHERE site_id = $1 AND path = ANY($2)")
            .bind(site_id.as_str())
            .bind(paths)
            .bind(published_on)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn lock_item_by_path(&self, site_id: &SiteId, path: &str, owner: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE item SET locked_by = $3, state = state | $4 WHERE site_id = $1 AND path = $2",
        )
        .bind(site_id.as_str())
        .bind(path)
        .bind(owner)
        .bind(state_bits(ItemStates::USER_LOCKED))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unlock_item_by_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE item SET locked_by = NULL, state = state & ~$3 WHERE site_id = $1 AND path = $2",
        )
        .bind(site_id.as_str())
        .bind(path)
        .bind(state_bits(ItemStates::USER_LOCKED))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkflowMutations for PgIndexStore {
    async fn insert_workflow_entry(&self, entry: &WorkflowEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow (site_id, path, state, submitter, reviewer, submitter_comment,
                                  publishing_target, schedule)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.site_id.as_str())
        .bind(&entry.path)
        .bind(&entry.state)
        .bind(&entry.submitter)
        .bind(entry.reviewer.as_deref())
        .bind(entry.submitter_comment.as_deref())
        .bind(entry.publishing_target.as_deref())
        .bind(entry.schedule)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_workflow_entry(&self, entry: &WorkflowEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE workflow
               SET state = $3, submitter = $4, reviewer = $5, submitter_comment = $6,
                   publishing_target = $7, schedule = $8
             WHERE site_id = $1 AND path = $2
            "#,
        )
        .bind(entry.site_id.as_str())
        .bind(&entry.path)
        .bind(&entry.state)
        .bind(&entry.submitter)
        .bind(entry.reviewer.as_deref())
        .bind(entry.submitter_comment.as_deref())
        .bind(entry.publishing_target.as_deref())
        .bind(entry.schedule)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_workflow_entry(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM workflow WHERE site_id = $1 AND path = $2")
            .bind(site_id.as_str())
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_workflow_entries(&self, site_id: &SiteId, paths: &[String]) -> StoreResult<()> {
        sqlx::query("DELETE FROM workflow WHERE site_id = $1 AND path = ANY($2)")
            .bind(site_id.as_str())
            .bind(paths)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_workflow_entries_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        sqlx::query("DELETE FROM workflow WHERE site_id = $1")
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DependencyMutations for PgIndexStore {
    async fn insert_dependencies(&self, edges: &[DependencyEdge]) -> StoreResult<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let sites: Vec<String> = edges.iter().map(|e| e.site_id.as_str().to_string()).collect();
        let sources: Vec<String> = edges.iter().map(|e| e.source_path.clone()).collect();
        let targets: Vec<String> = edges.iter().map(|e| e.target_path.clone()).collect();
        let kinds: Vec<String> = edges.iter().map(|e| e.kind.clone()).collect();
        sqlx::query(
            r#"
            INSERT INTO dependency (site_id, source_path, target_path, kind)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
            ON CONFLICT (site_id, source_path, target_path) DO NOTHING
            "#,
        )
        .bind(sites)
        .bind(sources)
        .bind(targets)
        .bind(kinds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_all_source_dependencies(&self, site_id: &SiteId, source_path: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM dependency WHERE site_id = $1 AND source_path = $2")
            .bind(site_id.as_str())
            .bind(source_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_dependencies_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        sqlx::query("DELETE FROM dependency WHERE site_id = $1")
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_dependencies_for_site_and_path(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM dependency WHERE site_id = $1 AND (source_path = $2 OR target_path = $2)",
        )
        .bind(site_id.as_str())
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn move_dependency(&self, site_id: &SiteId, old_path: &str, new_path: &str) -> StoreResult<()> {
        if old_path == new_path {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        // Rewrite whatever does not collide, then drop the leftovers at the old path.
        sqlx::query(
            r#"
            UPDATE dependency d
               SET source_path = $3
             WHERE d.site_id = $1 AND d.source_path = $2
               AND NOT EXISTS (SELECT 1 FROM dependency x
                                WHERE x.site_id = $1 AND x.source_path = $3
                                  AND x.target_path = d.target_path)
            "#,
        )
        .bind(site_id.as_str())
        .bind(old_path)
        .bind(new_path)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE dependency d
               SET target_path = $3
             WHERE d.site_id = $1 AND d.target_path = $2
               AND NOT EXISTS (SELECT 1 FROM dependency x
                                WHERE x.site_id = $1 AND x.target_path = $3
                                  AND x.source_path = d.source_path)
            "#,
        )
        .bind(site_id.as_str())
        .bind(old_path)
        .bind(new_path)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM dependency WHERE site_id = $1 AND (source_path = $2 OR target_path = $2)",
        )
        .bind(site_id.as_str())
        .bind(old_path)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl NavigationMutations for PgIndexStore {
    async fn insert_navigation_order_sequence(&self, sequence: &NavigationOrderSequence) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO navigation_order_sequence (folder_id, site_id, path, max_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (folder_id) DO NOTHING
            "#,
        )
        .bind(sequence.folder_id)
        .bind(sequence.site_id.as_str())
        .bind(&sequence.path)
        .bind(sequence.max_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_navigation_order_sequence(&self, sequence: &NavigationOrderSequence) -> StoreResult<()> {
        sqlx::query(
            "UPDATE navigation_order_sequence SET path = $2, max_count = $3 WHERE folder_id = $1",
        )
        .bind(sequence.folder_id)
        .bind(&sequence.path)
        .bind(sequence.max_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_navigation_order_sequences_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        sqlx::query("DELETE FROM navigation_order_sequence WHERE site_id = $1")
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditMutations for PgIndexStore {
    async fn insert_audit_log(&self, entry: &AuditEntry) -> StoreResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO audit (site_id, operation, actor, target_path, target_type, origin,
                               commit_id, performed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (site_id, commit_id, target_path, operation) WHERE commit_id IS NOT NULL
            DO UPDATE SET commit_id = EXCLUDED.commit_id
            RETURNING id
            "#,
        )
        .bind(entry.site_id.as_str())
        .bind(entry.operation.as_str())
        .bind(&entry.actor)
        .bind(&entry.target_path)
        .bind(&entry.target_type)
        .bind(&entry.origin)
        .bind(entry.commit_id.as_ref().map(CommitId::as_str))
        .bind(entry.performed_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert_audit_log_params(&self, audit_id: i64, params: &[AuditParam]) -> StoreResult<()> {
        if params.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
        let values: Vec<String> = params.iter().map(|p| p.value.clone()).collect();
        sqlx::query(
            r#"
            INSERT INTO audit_parameters (audit_id, name, value)
            SELECT $1, * FROM UNNEST($2::text[], $3::text[])
            "#,
        )
        .bind(audit_id)
        .bind(names)
        .bind(values)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_audit_log_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        sqlx::query("DELETE FROM audit WHERE site_id = $1")
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl GitLogMutations for PgIndexStore {
    async fn insert_git_log(
        &self,
        site_id: &SiteId,
        commit_id: &CommitId,
        processed: bool,
        audited: bool,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO git_log (site_id, commit_id, processed, audited)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (site_id, commit_id) DO NOTHING
            "#,
        )
        .bind(site_id.as_str())
        .bind(commit_id.as_str())
        .bind(processed)
        .bind(audited)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_git_log_list(
        &self,
        site_id: &SiteId,
        commit_ids: &[CommitId],
        processed: bool,
        audited: bool,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO git_log (site_id, commit_id, processed, audited)
            SELECT $1, commit_id, $3, $4 FROM UNNEST($2::text[]) AS c(commit_id)
            ON CONFLICT (site_id, commit_id) DO UPDATE
               SET processed = EXCLUDED.processed,
                   audited = EXCLUDED.audited
            "#,
        )
        .bind(site_id.as_str())
        .bind(commit_id_strings(commit_ids))
        .bind(processed)
        .bind(audited)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_git_log_processed(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()> {
        sqlx::query("UPDATE git_log SET processed = TRUE WHERE site_id = $1 AND commit_id = $2")
            .bind(site_id.as_str())
            .bind(commit_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_git_log_processed_bulk(&self, site_id: &SiteId, commit_ids: &[CommitId]) -> StoreResult<()> {
        sqlx::query(
            "UPDATE git_log SET processed = TRUE WHERE site_id = $1 AND commit_id = ANY($2)",
        )
        .bind(site_id.as_str())
        .bind(commit_id_strings(commit_ids))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_git_log_audited(&self, site_id: &SiteId, commit_id: &CommitId) -> StoreResult<()> {
        sqlx::query("UPDATE git_log SET audited = TRUE WHERE site_id = $1 AND commit_id = $2")
            .bind(site_id.as_str())
            .bind(commit_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_git_log_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        sqlx::query("DELETE FROM git_log WHERE site_id = $1")
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterMutations for PgIndexStore {
    async fn add_cluster_member(&self, member: &ClusterMember) -> StoreResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO cluster (local_address, state, git_url, git_remote_name, heartbeat)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&member.local_address)
        .bind(&member.state)
        .bind(&member.git_url)
        .bind(&member.git_remote_name)
        .bind(member.heartbeat)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_cluster_member(&self, member: &ClusterMember) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE cluster
               SET local_address = $2, state = $3, git_url = $4, git_remote_name = $5,
                   heartbeat = $6
             WHERE id = $1
            "#,
        )
        .bind(member.id)
        .bind(&member.local_address)
        .bind(&member.state)
        .bind(&member.git_url)
        .bind(&member.git_remote_name)
        .bind(member.heartbeat)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn remove_cluster_members(&self, member_ids: &[i64]) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM cluster WHERE id = ANY($1)")
            .bind(member_ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_cluster_node_heartbeat(&self, local_address: &str) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE cluster SET heartbeat = NOW() WHERE local_address = $1")
            .bind(local_address)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_cluster_site_sync_repo(&self, repo: &ClusterSiteSyncRepo) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_site_sync_repo (cluster_node_id, site_id, node_last_commit_id,
                                                node_last_verified_commit_id,
                                                node_last_synced_commit_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (cluster_node_id, site_id) DO NOTHING
            "#,
        )
        .bind(repo.cluster_node_id)
        .bind(repo.site_id.as_str())
        .bind(repo.node_last_commit_id.as_ref().map(CommitId::as_str))
        .bind(repo.node_last_verified_commit_id.as_ref().map(CommitId::as_str))
        .bind(repo.node_last_synced_commit_id.as_ref().map(CommitId::as_str))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_cluster_node_last_verified_commit_id(
        &self,
        cluster_node_id: i64,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_site_sync_repo (cluster_node_id, site_id, node_last_verified_commit_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (cluster_node_id, site_id) DO UPDATE
               SET node_last_verified_commit_id = EXCLUDED.node_last_verified_commit_id
            "#,
        )
        .bind(cluster_node_id)
        .bind(site_id.as_str())
        .bind(commit_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_cluster_node_last_synced_commit_id(
        &self,
        cluster_node_id: i64,
        site_id: &SiteId,
        commit_id: &CommitId,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_site_sync_repo (cluster_node_id, site_id, node_last_synced_commit_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (cluster_node_id, site_id) DO UPDATE
               SET node_last_synced_commit_id = EXCLUDED.node_last_synced_commit_id
            "#,
        )
        .bind(cluster_node_id)
        .bind(site_id.as_str())
        .bind(commit_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PublishRequestMutations for PgIndexStore {
    async fn insert_item_for_deployment(&self, request: &PublishRequest) -> StoreResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO publish_request (site_id, environment, path, old_path, action, username,
                                         package_id, state, scheduled_date, commit_id,
                                         completed_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(request.site_id.as_str())
        .bind(&request.environment)
        .bind(&request.path)
        .bind(request.old_path.as_deref())
        .bind(&request.action)
        .bind(&request.username)
        .bind(&request.package_id)
        .bind(request.state.as_str())
        .bind(request.scheduled_date)
        .bind(request.commit_id.as_ref().map(CommitId::as_str))
        .bind(request.completed_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn cancel_workflow(&self, site_id: &SiteId, path: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE publish_request
               SET state = $3
             WHERE site_id = $1 AND path = $2 AND state = $4
            "#,
        )
        .bind(site_id.as_str())
        .bind(path)
        .bind(PublishRequestState::Cancelled.as_str())
        .bind(PublishRequestState::ReadyForLive.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_packages(&self, site_id: &SiteId, package_ids: &[String]) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE publish_request
               SET state = $3
             WHERE site_id = $1 AND package_id = ANY($2) AND state = $4
            "#,
        )
        .bind(site_id.as_str())
        .bind(package_ids)
        .bind(PublishRequestState::Cancelled.as_str())
        .bind(PublishRequestState::ReadyForLive.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_item_deployment_state(
        &self,
        request_id: i64,
        state: PublishRequestState,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE publish_request SET state = $2 WHERE id = $1")
            .bind(request_id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_publish_request_completed(
        &self,
        request_id: i64,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE publish_request SET state = $2, completed_date = $3 WHERE id = $1")
            .bind(request_id)
            .bind(PublishRequestState::Completed.as_str())
            .bind(completed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_publish_request_processing_queue(
        &self,
        site_id: &SiteId,
        from: PublishRequestState,
        to: PublishRequestState,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE publish_request SET state = $3 WHERE site_id = $1 AND state = $2")
            .bind(site_id.as_str())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_deployment_data_for_site(&self, site_id: &SiteId) -> StoreResult<()> {
        sqlx::query("DELETE FROM publish_request WHERE site_id = $1")
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SecurityMutations for PgIndexStore {
    async fn upsert_refresh_token(&self, user_id: i64, token: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_token (user_id, token, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE
               SET token = EXCLUDED.token, created_at = EXCLUDED.created_at
            "#,
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_refresh_token(&self, user_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM refresh_token WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_access_token(&self, user_id: i64, token: &AccessToken) -> StoreResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO access_token (user_id, label, expires_at, enabled)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(&token.label)
        .bind(token.expires_at)
        .bind(token.enabled)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_access_token(&self, user_id: i64, token_id: i64, enabled: bool) -> StoreResult<()> {
        sqlx::query("UPDATE access_token SET enabled = $3 WHERE id = $2 AND user_id = $1")
            .bind(user_id)
            .bind(token_id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_access_token(&self, user_id: i64, token_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM access_token WHERE id = $2 AND user_id = $1")
            .bind(user_id)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired_tokens(&self, max_age: Duration) -> StoreResult<u64> {
        let removed = sqlx::query_scalar::<_, i64>(
            r#"
            WITH refresh AS (
                DELETE FROM refresh_token WHERE created_at < $1 RETURNING 1
            ), access AS (
                DELETE FROM access_token WHERE expires_at IS NOT NULL AND expires_at <= NOW()
                RETURNING 1
            )
            SELECT (SELECT COUNT(*) FROM refresh) + (SELECT COUNT(*) FROM access)
            "#,
        )
        .bind(Utc::now() - max_age)
        .fetch_one(&self.pool)
        .await?;
        Ok(removed.max(0) as u64)
    }
}

#[async_trait]
impl UserMutations for PgIndexStore {
    async fn create_user(&self, user: &NewUser) -> StoreResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (username, first_name, last_name, email, enabled,
                               externally_managed, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(user.enabled)
        .bind(user.externally_managed)
        .bind(user.password_hash.as_deref())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_user(&self, user: &UserUpdate) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE users SET first_name = $2, last_name = $3, email = $4 WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_users(&self, user_ids: &[i64]) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM users WHERE id = ANY($1)")
            .bind(user_ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn enable_users(&self, user_ids: &[i64], enabled: bool) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE users SET enabled = $2 WHERE id = ANY($1)")
            .bind(user_ids)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_user_password(&self, username: &str, password_hash: &str) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE username = $1")
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_user_properties(
        &self,
        user_id: i64,
        site_id: &SiteId,
        properties: &UserProperties,
    ) -> StoreResult<()> {
        let keys: Vec<String> = properties.keys().cloned().collect();
        let values: Vec<String> = properties.values().cloned().collect();
        sqlx::query(
            r#"
            INSERT INTO user_properties (user_id, site_id, key, value)
            SELECT $1, $2, key, value FROM UNNEST($3::text[], $4::text[]) AS p(key, value)
            ON CONFLICT (user_id, site_id, key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(user_id)
        .bind(site_id.as_str())
        .bind(keys)
        .bind(values)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_user_properties(&self, user_id: i64, site_id: &SiteId, keys: &[String]) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM user_properties WHERE user_id = $1 AND site_id = $2 AND key = ANY($3)",
        )
        .bind(user_id)
        .bind(site_id.as_str())
        .bind(keys)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl GroupMutations for PgIndexStore {
    async fn create_group(&self, group: &NewGroup) -> StoreResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO user_group (org_id, name, description) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(group.org_id)
        .bind(&group.name)
        .bind(group.description.as_deref())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_group(&self, group: &GroupUpdate) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE user_group SET name = $2, description = $3 WHERE id = $1")
            .bind(group.id)
            .bind(&group.name)
            .bind(group.description.as_deref())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_groups(&self, group_ids: &[i64]) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM user_group WHERE id = ANY($1)")
            .bind(group_ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn add_group_members(&self, group_id: i64, user_ids: &[i64]) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO group_user (group_id, user_id)
            SELECT $1, user_id FROM UNNEST($2::bigint[]) AS u(user_id)
            ON CONFLICT (group_id, user_id) DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(user_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn remove_group_members(&self, group_id: i64, user_ids: &[i64]) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM group_user WHERE group_id = $1 AND user_id = ANY($2)")
            .bind(group_id)
            .bind(user_ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RemoteRepositoryMutations for PgIndexStore {
    async fn insert_remote_repository(&self, remote: &RemoteRepository) -> StoreResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO remote_repository (site_id, remote_name, remote_url,
                                           authentication_type, remote_username)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(remote.site_id.as_str())
        .bind(&remote.remote_name)
        .bind(&remote.remote_url)
        .bind(&remote.authentication_type)
        .bind(remote.remote_username.as_deref())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn delete_remote_repository(&self, site_id: &SiteId, remote_name: &str) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM remote_repository WHERE site_id = $1 AND remote_name = $2")
                .bind(site_id.as_str())
                .bind(remote_name)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn delete_remote_repositories_for_site(&self, site_id: &SiteId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM remote_repository WHERE site_id = $1")
            .bind(site_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
