use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use siteindex_core::{
    ChangeKind, Commit, CommitId, ItemStates, PathChange, SiteId, SiteRecord, SiteState,
};
use siteindex_repo::{IdentityMarker, MemoryRepositoryProvider, RepoResult, RepositoryProvider};
use siteindex_storage::{
    BackoffPolicy, FaultKind, FaultPlan, IndexSnapshot, MemoryIndexStore, RetryPolicy,
    RetryingIndexStore, SiteMutations, SiteRegistry, StoreError,
};
use siteindex_sync::{
    ClockScheduler, RecurringTask, RepositorySyncTask, RunStatus, SiteSource, SiteTask,
    SyncError, SyncOutcome, SYNC_TASK_NAME,
};
use tokio::sync::Semaphore;

const TOKEN: &str = "7d3f1c2a-9b8e-4f6d-a5c4-1e2b3c4d5e6f";

type Store = RetryingIndexStore<MemoryIndexStore>;

fn site() -> SiteId {
    SiteId::new("editorial")
}

fn site_record(site_id: &SiteId, id: i64) -> SiteRecord {
    SiteRecord {
        id,
        site_id: site_id.clone(),
        site_uuid: TOKEN.to_string(),
        name: site_id.to_string(),
        description: None,
        state: SiteState::Ready,
        enabled: true,
        publishing_enabled: true,
        publishing_status: None,
        publishing_lock_owner: None,
        publishing_lock_heartbeat: None,
        last_commit_id: None,
        last_verified_commit_id: None,
        last_synced_commit_id: None,
    }
}

fn commit(n: u32, changes: Vec<PathChange>) -> Commit {
    Commit {
        id: CommitId::new(format!("c{n}")),
        author: "dana".into(),
        timestamp: Utc
            .with_ymd_and_hms(2026, 4, 1, 8, n, 0)
            .single()
            .unwrap(),
        message: format!("change {n}"),
        changes,
        audited: false,
        processed: false,
    }
}

/// Four commits touching pages, components, assets, a rename and a delete.
fn history() -> Vec<Commit> {
    vec![
        commit(
            1,
            vec![
                PathChange::added("/site/website/index.xml").with_references(vec![
                    "/site/components/header.xml".into(),
                    "/static-assets/css/main.css".into(),
                ]),
                PathChange::added("/site/components/header.xml"),
                PathChange::added("/static-assets/css/main.css"),
            ],
        ),
        commit(
            2,
            vec![
                PathChange::added("/site/website/about/index.xml")
                    .with_references(vec!["/site/components/header.xml".into()]),
                PathChange::modified("/site/components/header.xml"),
            ],
        ),
        commit(
            3,
            vec![
                PathChange::renamed(
                    "/site/website/about/index.xml",
                    "/site/website/company/index.xml",
                )
                .with_references(vec!["/site/components/header.xml".into()]),
                PathChange::deleted("/static-assets/css/main.css"),
            ],
        ),
        commit(
            4,
            vec![PathChange::modified("/site/website/index.xml")
                .with_references(vec!["/site/components/header.xml".into()])],
        ),
    ]
}

struct Harness {
    store: Arc<Store>,
    repo: Arc<MemoryRepositoryProvider>,
    task: RepositorySyncTask<MemoryRepositoryProvider, MemoryIndexStore>,
}

impl Harness {
    async fn new(marker: Option<&str>, retries: usize) -> Self {
        let store = Arc::new(RetryingIndexStore::new(
            MemoryIndexStore::new(),
            RetryPolicy::new(BackoffPolicy::immediate(retries)),
        ));
        store.inner().seed_site(site_record(&site(), 1)).await;
        let repo = Arc::new(MemoryRepositoryProvider::new());
        repo.add_site(&site(), marker).await;
        let task = RepositorySyncTask::new(Arc::clone(&repo), Arc::clone(&store));
        Self { store, repo, task }
    }

    async fn with_history(commits: &[Commit]) -> Self {
        let harness = Self::new(Some(&format!("# identity\n{TOKEN}\n")), 3).await;
        for commit in commits {
            harness.repo.push_commit(&site(), commit.clone()).await;
        }
        harness
    }

    async fn snapshot(&self) -> IndexSnapshot {
        self.store.inner().snapshot().await
    }

    async fn watermark(&self) -> Option<CommitId> {
        self.task
            .registry()
            .last_verified_watermark(&site())
            .await
            .unwrap()
    }
}

async fn clean_snapshot() -> IndexSnapshot {
    let harness = Harness::with_history(&history()).await;
    harness.task.bootstrap_site(&site()).await.unwrap();
    harness.snapshot().await
}

#[tokio::test]
async fn identity_mismatch_skips_without_touching_the_index() {
    let harness = Harness::new(Some("# restored from another backup\nsome-other-token\n"), 3).await;
    for commit in history() {
        harness.repo.push_commit(&site(), commit).await;
    }
    let mut record = site_record(&site(), 1);
    record.last_verified_commit_id = Some(CommitId::new("c1"));
    harness.store.inner().seed_site(record).await;
    let before = harness.snapshot().await;

    let outcome = harness.task.sync_site(&site()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::IdentityMismatch);
    assert_eq!(harness.store.inner().mutation_count().await, 0);
    assert_eq!(harness.snapshot().await, before);

    let outcome = harness.task.bootstrap_site(&site()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::IdentityMismatch);
    assert_eq!(harness.watermark().await, Some(CommitId::new("c1")));
}

#[tokio::test]
async fn missing_marker_is_skipped_like_a_mismatch() {
    let harness = Harness::new(None, 3).await;
    harness.repo.push_commit(&site(), history()[0].clone()).await;

    let outcome = harness.task.bootstrap_site(&site()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::MarkerUnreadable);
    assert_eq!(harness.store.inner().mutation_count().await, 0);
    assert_eq!(harness.watermark().await, None);
}

#[tokio::test]
async fn unknown_and_unsynced_sites_are_skipped() {
    let harness = Harness::with_history(&history()).await;

    let outcome = harness.task.sync_site(&SiteId::new("ghost")).await.unwrap();
    assert_eq!(outcome, SyncOutcome::SiteMissing);

    let outcome = harness.task.sync_site(&site()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::NoWatermark);
    assert_eq!(harness.store.inner().mutation_count().await, 0);
}

#[tokio::test]
async fn incremental_sync_advances_to_the_newest_commit() {
    let commits = history();
    let harness = Harness::with_history(&commits[..1]).await;
    let outcome = harness.task.bootstrap_site(&site()).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Synced {
            applied: 1,
            watermark: CommitId::new("c1")
        }
    );

    for commit in &commits[1..] {
        harness.repo.push_commit(&site(), commit.clone()).await;
    }
    let outcome = harness.task.sync_site(&site()).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Synced {
            applied: 3,
            watermark: CommitId::new("c4")
        }
    );
    assert_eq!(harness.watermark().await, Some(CommitId::new("c4")));

    let snapshot = harness.snapshot().await;
    let record = &snapshot.sites[&site()];
    assert_eq!(record.last_synced_commit_id, Some(CommitId::new("c4")));

    let renamed = &snapshot.items[&(site(), "/site/website/company/index.xml".to_string())];
    assert_eq!(
        renamed.previous_path.as_deref(),
        Some("/site/website/about/index.xml")
    );
    assert!(renamed.states.contains(ItemStates::MODIFIED));
    assert!(!snapshot
        .items
        .contains_key(&(site(), "/site/website/about/index.xml".to_string())));
    assert!(!snapshot
        .items
        .contains_key(&(site(), "/static-assets/css/main.css".to_string())));
    assert!(snapshot
        .dependencies
        .iter()
        .all(|edge| edge.target_path != "/static-assets/css/main.css"));
    assert!(snapshot.git_log.values().all(|log| log.processed && log.audited));

    let outcome = harness.task.sync_site(&site()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::UpToDate);
}

#[tokio::test]
async fn incremental_runs_match_a_full_replay() {
    let commits = history();
    let harness = Harness::with_history(&commits[..2]).await;
    harness.task.bootstrap_site(&site()).await.unwrap();
    for commit in &commits[2..] {
        harness.repo.push_commit(&site(), commit.clone()).await;
    }
    harness.task.sync_site(&site()).await.unwrap();

    assert_eq!(harness.snapshot().await, clean_snapshot().await);
}

#[tokio::test]
async fn absorbed_transient_failure_leaves_the_same_end_state() {
    for skip in [0, 5, 17, 30] {
        let harness = Harness::with_history(&history()).await;
        harness
            .store
            .inner()
            .inject_fault(FaultPlan::new(skip, 2, FaultKind::Transient))
            .await;

        let outcome = harness.task.bootstrap_site(&site()).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Synced {
                applied: 4,
                watermark: CommitId::new("c4")
            },
            "fault after {skip} mutations"
        );
        assert_eq!(harness.snapshot().await, clean_snapshot().await);
    }
}

#[tokio::test]
async fn exhausted_retries_stop_at_the_last_applied_commit_and_resume() {
    let harness = Harness::with_history(&history()).await;
    // Commits 1 and 2 finish; every attempt to close commit 3 fails.
    harness
        .store
        .inner()
        .inject_fault(
            FaultPlan::new(2, 10, FaultKind::Transient).for_op("mark_git_log_processed"),
        )
        .await;

    let err = harness.task.bootstrap_site(&site()).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Storage(StoreError::RetriesExhausted {
            op: "git_log.mark_git_log_processed",
            attempts: 4,
            ..
        })
    ));
    assert_eq!(harness.watermark().await, Some(CommitId::new("c2")));

    harness.store.inner().clear_fault().await;
    let outcome = harness.task.sync_site(&site()).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Synced {
            applied: 2,
            watermark: CommitId::new("c4")
        }
    );
    assert_eq!(harness.snapshot().await, clean_snapshot().await);
}

#[tokio::test]
async fn failed_final_write_is_finished_by_the_next_idle_run() {
    let harness = Harness::with_history(&history()).await;
    harness
        .store
        .inner()
        .inject_fault(
            FaultPlan::new(0, 1, FaultKind::Permanent).for_op("update_site_last_synced_commit_id"),
        )
        .await;

    let err = harness.task.bootstrap_site(&site()).await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(StoreError::Permanent(_))));
    assert_eq!(harness.watermark().await, Some(CommitId::new("c4")));
    let row = harness.snapshot().await.sites[&site()].clone();
    assert_eq!(row.last_synced_commit_id, None);

    harness.store.inner().clear_fault().await;
    let outcome = harness.task.sync_site(&site()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::UpToDate);
    let row = harness.snapshot().await.sites[&site()].clone();
    assert_eq!(row.last_synced_commit_id, Some(CommitId::new("c4")));

    let writes = harness.store.inner().mutation_count().await;
    assert_eq!(harness.task.sync_site(&site()).await.unwrap(), SyncOutcome::UpToDate);
    assert_eq!(harness.store.inner().mutation_count().await, writes);
}

#[tokio::test]
async fn cluster_node_rows_follow_the_site_watermarks() {
    let commits = history();
    let mut harness = Harness::with_history(&commits[..2]).await;
    harness.task = RepositorySyncTask::new(Arc::clone(&harness.repo), Arc::clone(&harness.store))
        .with_cluster_node(Some(1));

    harness.task.bootstrap_site(&site()).await.unwrap();
    let row = harness.snapshot().await.cluster_sync[&(1, site())].clone();
    assert_eq!(row.node_last_verified_commit_id, Some(CommitId::new("c2")));
    assert_eq!(row.node_last_synced_commit_id, Some(CommitId::new("c2")));

    for commit in &commits[2..] {
        harness.repo.push_commit(&site(), commit.clone()).await;
    }
    harness.task.sync_site(&site()).await.unwrap();

    let snapshot = harness.snapshot().await;
    assert_eq!(snapshot.cluster_sync.len(), 1);
    let row = &snapshot.cluster_sync[&(1, site())];
    assert_eq!(row.node_last_verified_commit_id, Some(CommitId::new("c4")));
    assert_eq!(row.node_last_synced_commit_id, Some(CommitId::new("c4")));
    assert_eq!(
        snapshot.sites[&site()].last_synced_commit_id,
        Some(CommitId::new("c4"))
    );
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let harness = Harness::with_history(&history()).await;
    harness
        .store
        .inner()
        .inject_fault(FaultPlan::new(0, 1, FaultKind::Permanent).for_op("move_item"))
        .await;

    let err = harness.task.bootstrap_site(&site()).await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(StoreError::Permanent(_))));
    assert_eq!(harness.watermark().await, Some(CommitId::new("c2")));
}

#[tokio::test]
async fn untranslatable_commit_stops_the_run() {
    let mut commits = history();
    commits[2].changes.push(PathChange {
        path: "/site/website/conflicted.xml".into(),
        kind: ChangeKind::Unsupported {
            status: "Conflicted".into(),
        },
        references: Vec::new(),
    });
    let harness = Harness::with_history(&commits).await;

    let err = harness.task.bootstrap_site(&site()).await.unwrap_err();
    match err {
        SyncError::Translation { commit, .. } => assert_eq!(commit, CommitId::new("c3")),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(harness.watermark().await, Some(CommitId::new("c2")));
}

/// Provider that lets another writer move the watermark while the log is read.
struct RacingProvider {
    inner: Arc<MemoryRepositoryProvider>,
    store: Arc<Store>,
}

#[async_trait]
impl RepositoryProvider for RacingProvider {
    async fn identity_marker(&self, site_id: &SiteId) -> RepoResult<IdentityMarker> {
        self.inner.identity_marker(site_id).await
    }

    async fn commits_after(
        &self,
        site_id: &SiteId,
        watermark: Option<&CommitId>,
    ) -> RepoResult<Vec<Commit>> {
        let commits = self.inner.commits_after(site_id, watermark).await?;
        self.store
            .inner()
            .compare_and_set_last_verified_commit_id(
                site_id,
                watermark,
                &CommitId::new("other-node"),
            )
            .await
            .unwrap();
        Ok(commits)
    }
}

#[tokio::test]
async fn concurrent_watermark_move_is_a_conflict() {
    let commits = history();
    let harness = Harness::with_history(&commits[..1]).await;
    harness.task.bootstrap_site(&site()).await.unwrap();
    for commit in &commits[1..] {
        harness.repo.push_commit(&site(), commit.clone()).await;
    }

    let racing = RepositorySyncTask::new(
        Arc::new(RacingProvider {
            inner: Arc::clone(&harness.repo),
            store: Arc::clone(&harness.store),
        }),
        Arc::clone(&harness.store),
    );
    let outcome = racing.sync_site(&site()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Conflict { applied: 0 });
    assert_eq!(harness.watermark().await, Some(CommitId::new("other-node")));
}

#[tokio::test]
async fn bootstrap_refuses_an_already_synced_site() {
    let harness = Harness::with_history(&history()).await;
    harness.task.bootstrap_site(&site()).await.unwrap();
    let count = harness.store.inner().mutation_count().await;

    let outcome = harness.task.bootstrap_site(&site()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Conflict { applied: 0 });
    assert_eq!(harness.store.inner().mutation_count().await, count);
}

#[tokio::test]
async fn scheduler_runs_sync_on_staggered_ticks() {
    let harness = Harness::with_history(&history()).await;
    harness.task.bootstrap_site(&site()).await.unwrap();
    let disabled = SiteId::new("archive");
    let mut archived = site_record(&disabled, 2);
    archived.enabled = false;
    harness.store.inner().seed_site(archived).await;

    let registry = SiteRegistry::new(Arc::clone(&harness.store));
    let sync: Arc<dyn SiteTask> = Arc::new(harness.task);
    let mut scheduler = ClockScheduler::new(Arc::new(registry), Duration::from_secs(30));
    scheduler.register(RecurringTask::new(SYNC_TASK_NAME, 3, 1, sync).unwrap());

    let mut fired = Vec::new();
    for _ in 0..9 {
        let report = scheduler.tick().await.unwrap();
        let tick = report.tick;
        let runs = report.join().await;
        if !runs.is_empty() {
            assert_eq!(runs.len(), 1);
            assert_eq!(runs[0].site, site());
            assert_eq!(runs[0].status, RunStatus::Completed);
            fired.push(tick);
        }
    }
    assert_eq!(fired, vec![2, 5, 8]);
}

#[tokio::test]
async fn failed_sync_surfaces_once_in_the_run_report() {
    let harness = Harness::with_history(&history()).await;
    harness.task.bootstrap_site(&site()).await.unwrap();
    harness
        .repo
        .push_commit(
            &site(),
            commit(5, vec![PathChange::modified("/site/website/index.xml")]),
        )
        .await;
    harness
        .store
        .inner()
        .inject_fault(FaultPlan::new(0, 1, FaultKind::Permanent).for_op("upsert_entry"))
        .await;

    let registry = SiteRegistry::new(Arc::clone(&harness.store));
    let sync: Arc<dyn SiteTask> = Arc::new(harness.task);
    let mut scheduler = ClockScheduler::new(Arc::new(registry), Duration::from_secs(30));
    scheduler.register(RecurringTask::new(SYNC_TASK_NAME, 1, 0, sync).unwrap());

    let runs = scheduler.tick().await.unwrap().join().await;
    assert_eq!(runs.len(), 1);
    match &runs[0].status {
        RunStatus::Failed(message) => assert!(message.contains("injected fault in upsert_entry"), "{message}"),
        other => panic!("unexpected status {other:?}"),
    }
    assert!(!scheduler.is_in_flight(SYNC_TASK_NAME, &site()));
}

struct FixedSites(Vec<SiteId>);

#[async_trait]
impl SiteSource for FixedSites {
    async fn sites(&self) -> anyhow::Result<Vec<SiteId>> {
        Ok(self.0.clone())
    }
}

struct Gated {
    gate: Arc<Semaphore>,
    started: AtomicUsize,
}

#[async_trait]
impl SiteTask for Gated {
    async fn run(&self, _site_id: &SiteId) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await?;
        Ok(())
    }
}

#[tokio::test]
async fn in_flight_site_is_skipped_not_queued() {
    let gate = Arc::new(Semaphore::new(0));
    let task = Arc::new(Gated {
        gate: Arc::clone(&gate),
        started: AtomicUsize::new(0),
    });
    let blog = SiteId::new("blog");
    let mut scheduler = ClockScheduler::new(
        Arc::new(FixedSites(vec![blog.clone()])),
        Duration::from_secs(60),
    );
    scheduler.register(RecurringTask::new("sync", 1, 0, task.clone()).unwrap());

    let first = scheduler.tick().await.unwrap();
    assert_eq!(first.dispatched, 1);
    assert!(scheduler.is_in_flight("sync", &blog));

    let second = scheduler.tick().await.unwrap();
    assert_eq!(second.dispatched, 0);
    assert_eq!(second.skipped_in_flight, 1);

    gate.add_permits(10);
    let runs = first.join().await;
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert!(!scheduler.is_in_flight("sync", &blog));

    let third = scheduler.tick().await.unwrap();
    assert_eq!(third.dispatched, 1);
    third.join().await;
    assert_eq!(task.started.load(Ordering::SeqCst), 2);
}

struct PanicsOn(SiteId);

#[async_trait]
impl SiteTask for PanicsOn {
    async fn run(&self, site_id: &SiteId) -> anyhow::Result<()> {
        if *site_id == self.0 {
            panic!("corrupt index state for {site_id}");
        }
        Ok(())
    }
}

#[tokio::test]
async fn a_panicking_site_does_not_affect_others() {
    let (a, b) = (SiteId::new("a"), SiteId::new("b"));
    let mut scheduler = ClockScheduler::new(
        Arc::new(FixedSites(vec![a.clone(), b.clone()])),
        Duration::from_secs(60),
    );
    scheduler.register(RecurringTask::new("sync", 1, 0, Arc::new(PanicsOn(a.clone()))).unwrap());

    for _ in 0..2 {
        let mut runs = scheduler.tick().await.unwrap().join().await;
        runs.sort_by(|x, y| x.site.cmp(&y.site));
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status, RunStatus::Panicked);
        assert_eq!(runs[1].site, b);
        assert_eq!(runs[1].status, RunStatus::Completed);
    }
}

struct Slow;

#[async_trait]
impl SiteTask for Slow {
    async fn run(&self, _site_id: &SiteId) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn overlong_run_is_abandoned() {
    let site = SiteId::new("slow");
    let mut scheduler = ClockScheduler::new(
        Arc::new(FixedSites(vec![site.clone()])),
        Duration::from_secs(5),
    );
    scheduler.register(RecurringTask::new("sync", 1, 0, Arc::new(Slow)).unwrap());

    let runs = scheduler.tick().await.unwrap().join().await;
    assert_eq!(runs[0].status, RunStatus::TimedOut);
    assert!(!scheduler.is_in_flight("sync", &site));
}
