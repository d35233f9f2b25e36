//! Clock-driven, staggered per-site task scheduling.
//!
//! A single ticker drives every registered [`RecurringTask`]. On tick `N`
//! (counted from 0 for the lifetime of one [`ClockScheduler`]) a task runs for
//! a site iff `(N + offset) % interval == 0`. Sites are listed fresh on every
//! tick; each eligible (task, site) pair runs on its own tokio task, guarded so
//! that a pair never has two runs in flight.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use siteindex_core::SiteId;
use siteindex_storage::{SiteMutations, SiteQueries, SiteRegistry};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::SyncError;

/// Work executed for one site on an eligible tick.
#[async_trait]
pub trait SiteTask: Send + Sync {
    async fn run(&self, site_id: &SiteId) -> Result<()>;
}

/// Sites a tick fans out over.
#[async_trait]
pub trait SiteSource: Send + Sync {
    async fn sites(&self) -> Result<Vec<SiteId>>;
}

#[async_trait]
impl<S> SiteSource for SiteRegistry<S>
where
    S: SiteQueries + SiteMutations + 'static,
{
    async fn sites(&self) -> Result<Vec<SiteId>> {
        self.schedulable_sites()
            .await
            .context("listing schedulable sites")
    }
}

pub fn is_eligible(tick: u64, interval: u64, offset: u64) -> bool {
    interval > 0 && (tick % interval + offset % interval) % interval == 0
}

/// Process-local tick counter. Starts at 0 and is never persisted.
#[derive(Debug, Default)]
pub struct CycleCounter(AtomicU64);

impl CycleCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the next tick to run.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Claims the next tick id.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct RecurringTask {
    name: String,
    interval: u64,
    offset: u64,
    task: Arc<dyn SiteTask>,
}

impl RecurringTask {
    pub fn new(
        name: impl Into<String>,
        interval: u64,
        offset: u64,
        task: Arc<dyn SiteTask>,
    ) -> Result<Self, SyncError> {
        let name = name.into();
        if interval == 0 {
            return Err(SyncError::Config(format!(
                "task {name}: interval must be at least one cycle"
            )));
        }
        Ok(Self {
            name,
            interval,
            offset: offset % interval,
            task,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_due(&self, tick: u64) -> bool {
        is_eligible(tick, self.interval, self.offset)
    }
}

impl std::fmt::Debug for RecurringTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecurringTask")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed(String),
    Panicked,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteRun {
    pub task: String,
    pub site: SiteId,
    pub tick: u64,
    pub status: RunStatus,
}

#[derive(Debug)]
pub struct TickReport {
    pub tick: u64,
    pub dispatched: usize,
    pub skipped_in_flight: usize,
    pub handles: Vec<JoinHandle<SiteRun>>,
}

impl TickReport {
    /// Waits for every run dispatched by this tick.
    pub async fn join(self) -> Vec<SiteRun> {
        let mut runs = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(run) => runs.push(run),
                Err(err) => warn!(tick = self.tick, error = %err, "site run supervisor lost"),
            }
        }
        runs
    }
}

type InFlightKey = (String, SiteId);

#[derive(Debug, Default)]
struct InFlight(Mutex<HashSet<InFlightKey>>);

impl InFlight {
    fn try_acquire(self: &Arc<Self>, task: &str, site: &SiteId) -> Option<InFlightGuard> {
        let key = (task.to_string(), site.clone());
        let mut running = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            registry: Arc::clone(self),
            key,
        })
    }

    fn contains(&self, task: &str, site: &SiteId) -> bool {
        let running = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        running.contains(&(task.to_string(), site.clone()))
    }
}

/// Releases the (task, site) slot when the run is over, however it ended.
struct InFlightGuard {
    registry: Arc<InFlight>,
    key: InFlightKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut running = self
            .registry
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        running.remove(&self.key);
    }
}

pub struct ClockScheduler {
    sites: Arc<dyn SiteSource>,
    tasks: Vec<RecurringTask>,
    counter: CycleCounter,
    in_flight: Arc<InFlight>,
    run_timeout: Duration,
}

impl ClockScheduler {
    pub fn new(sites: Arc<dyn SiteSource>, run_timeout: Duration) -> Self {
        Self {
            sites,
            tasks: Vec::new(),
            counter: CycleCounter::new(),
            in_flight: Arc::default(),
            run_timeout,
        }
    }

    pub fn register(&mut self, task: RecurringTask) {
        info!(
            task = task.name(),
            interval = task.interval(),
            offset = task.offset(),
            "registered recurring task"
        );
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &[RecurringTask] {
        &self.tasks
    }

    pub fn counter(&self) -> &CycleCounter {
        &self.counter
    }

    pub fn is_in_flight(&self, task: &str, site: &SiteId) -> bool {
        self.in_flight.contains(task, site)
    }

    /// Runs one tick: claims the next tick id, lists sites and dispatches every
    /// due (task, site) pair without waiting for it.
    pub async fn tick(&self) -> Result<TickReport> {
        let tick = self.counter.advance();
        let mut report = TickReport {
            tick,
            dispatched: 0,
            skipped_in_flight: 0,
            handles: Vec::new(),
        };

        let due: Vec<&RecurringTask> = self.tasks.iter().filter(|t| t.is_due(tick)).collect();
        if due.is_empty() {
            return Ok(report);
        }
        let sites = self
            .sites
            .sites()
            .await
            .with_context(|| format!("enumerating sites for tick {tick}"))?;

        for task in due {
            for site in &sites {
                let Some(guard) = self.in_flight.try_acquire(task.name(), site) else {
                    debug!(tick, task = task.name(), site = %site, "previous run still in flight; skipping");
                    report.skipped_in_flight += 1;
                    continue;
                };
                report.handles.push(tokio::spawn(supervise(
                    Arc::clone(&task.task),
                    task.name().to_string(),
                    site.clone(),
                    tick,
                    self.run_timeout,
                    guard,
                )));
                report.dispatched += 1;
            }
        }

        debug!(
            tick,
            dispatched = report.dispatched,
            skipped = report.skipped_in_flight,
            "tick dispatched"
        );
        Ok(report)
    }

    /// Starts the periodic ticker. Dropping or shutting down the returned
    /// scheduler stops ticking; runs already dispatched finish on their own.
    pub async fn start(self: Arc<Self>, interval: Duration) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let scheduler = Arc::clone(&self);
        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let scheduler = Arc::clone(&scheduler);
            Box::pin(async move {
                if let Err(err) = scheduler.tick().await {
                    warn!(error = %format!("{err:#}"), "scheduler tick failed");
                }
            })
        })
        .with_context(|| format!("creating tick job every {interval:?}"))?;
        sched.add(job).await.context("adding tick job")?;
        sched.start().await.context("starting scheduler")?;
        info!(interval_ms = interval.as_millis() as u64, "scheduler started");
        Ok(sched)
    }
}

async fn supervise(
    task: Arc<dyn SiteTask>,
    name: String,
    site: SiteId,
    tick: u64,
    budget: Duration,
    guard: InFlightGuard,
) -> SiteRun {
    let run_site = site.clone();
    let mut work = tokio::spawn(async move { task.run(&run_site).await });

    let status = match tokio::time::timeout(budget, &mut work).await {
        Ok(Ok(Ok(()))) => RunStatus::Completed,
        Ok(Ok(Err(err))) => {
            warn!(task = %name, site = %site, tick, error = %format!("{err:#}"), "site run failed");
            RunStatus::Failed(format!("{err:#}"))
        }
        Ok(Err(join_err)) if join_err.is_panic() => {
            error!(task = %name, site = %site, tick, "site run panicked");
            RunStatus::Panicked
        }
        Ok(Err(join_err)) => RunStatus::Failed(join_err.to_string()),
        Err(_) => {
            warn!(task = %name, site = %site, tick, budget_ms = budget.as_millis() as u64, "site run timed out; abandoning");
            work.abort();
            let _ = work.await;
            RunStatus::TimedOut
        }
    };

    drop(guard);
    SiteRun {
        task: name,
        site,
        tick,
        status,
    }
}
